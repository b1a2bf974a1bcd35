//! Shallow structural analysis of RDF graphs.
//!
//! Drift detection only needs counts: how many triples a graph holds and
//! which classes, properties and SHACL shapes it declares. The built-in
//! [`TurtleParser`] reads Turtle and N-Triples far enough to answer that; it
//! does not resolve relative IRIs, interpret literals or reason over the
//! ontology.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Extensions of files treated as RDF graphs.
pub const RDF_EXTENSIONS: &[&str] = &["ttl", "n3", "nt", "rdf", "owl", "jsonld"];

const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
const OWL: &str = "http://www.w3.org/2002/07/owl#";
const SHACL: &str = "http://www.w3.org/ns/shacl#";

/// Whether `path` has an RDF extension.
pub fn is_rdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| RDF_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Whether `content` starts like a Turtle or N-Triples document.
pub fn looks_like_rdf(content: &str) -> bool {
    let Some(first) = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
    else {
        return false;
    };

    let lower = first.to_ascii_lowercase();
    lower.starts_with("@prefix")
        || lower.starts_with("@base")
        || lower.starts_with("prefix ")
        || lower.starts_with("base ")
        || first.starts_with('<')
        || first.starts_with("_:")
}

/// Structural summary of a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStructure {
    pub triples: usize,
    pub classes: BTreeSet<String>,
    pub properties: BTreeSet<String>,
    /// Shape IRI to the number of triples describing it.
    pub shapes: BTreeMap<String, usize>,
}

/// Parses RDF content into a [`GraphStructure`].
pub trait RdfParser: Send + Sync {
    fn parse(&self, content: &str) -> Result<GraphStructure>;
}

/// Built-in Turtle / N-Triples parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct TurtleParser;

impl RdfParser for TurtleParser {
    fn parse(&self, content: &str) -> Result<GraphStructure> {
        let tokens = tokenize(content)?;
        let mut parser = Parser::new(&tokens);
        parser.document()?;
        Ok(summarize(&parser.triples))
    }
}

/// Differences between two graph summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureDelta {
    pub triples_before: usize,
    pub triples_after: usize,
    pub classes_added: Vec<String>,
    pub classes_removed: Vec<String>,
    pub properties_added: Vec<String>,
    pub properties_removed: Vec<String>,
    pub shapes_added: Vec<String>,
    pub shapes_removed: Vec<String>,
    /// Shapes present in both graphs whose description changed size.
    pub shapes_redefined: Vec<String>,
}

impl StructureDelta {
    pub fn between(before: &GraphStructure, after: &GraphStructure) -> Self {
        let shapes_redefined = before
            .shapes
            .iter()
            .filter(|(shape, count)| after.shapes.get(*shape).is_some_and(|c| c != *count))
            .map(|(shape, _)| shape.clone())
            .collect();

        Self {
            triples_before: before.triples,
            triples_after: after.triples,
            classes_added: difference(&after.classes, &before.classes),
            classes_removed: difference(&before.classes, &after.classes),
            properties_added: difference(&after.properties, &before.properties),
            properties_removed: difference(&before.properties, &after.properties),
            shapes_added: keys_difference(&after.shapes, &before.shapes),
            shapes_removed: keys_difference(&before.shapes, &after.shapes),
            shapes_redefined,
        }
    }

    /// Absolute change in triple count.
    pub fn triple_delta(&self) -> usize {
        self.triples_before.abs_diff(self.triples_after)
    }

    pub fn shapes_changed(&self) -> bool {
        !self.shapes_added.is_empty()
            || !self.shapes_removed.is_empty()
            || !self.shapes_redefined.is_empty()
    }

    /// Shape changes or a triple delta above `threshold`.
    pub fn is_high_impact(&self, threshold: usize) -> bool {
        self.shapes_changed() || self.triple_delta() > threshold
    }

    /// Human-readable notes, most significant first.
    pub fn notes(&self, threshold: usize) -> Vec<String> {
        let mut notes = Vec::new();
        if self.shapes_changed() {
            notes.push(format!(
                "SHACL shapes changed ({} added, {} removed, {} redefined)",
                self.shapes_added.len(),
                self.shapes_removed.len(),
                self.shapes_redefined.len()
            ));
        }
        if self.triple_delta() > threshold {
            notes.push(format!(
                "Large triple count change: {} -> {}",
                self.triples_before, self.triples_after
            ));
        }
        if !self.classes_added.is_empty() || !self.classes_removed.is_empty() {
            notes.push(format!(
                "Classes: {} added, {} removed",
                self.classes_added.len(),
                self.classes_removed.len()
            ));
        }
        if !self.properties_added.is_empty() || !self.properties_removed.is_empty() {
            notes.push(format!(
                "Properties: {} added, {} removed",
                self.properties_added.len(),
                self.properties_removed.len()
            ));
        }
        notes
    }
}

fn difference(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Vec<String> {
    a.difference(b).cloned().collect()
}

fn keys_difference(a: &BTreeMap<String, usize>, b: &BTreeMap<String, usize>) -> Vec<String> {
    a.keys().filter(|k| !b.contains_key(*k)).cloned().collect()
}

fn summarize(triples: &[Triple]) -> GraphStructure {
    let rdf_type = format!("{}type", RDF);
    let subclass_of = format!("{}subClassOf", RDFS);
    let class_types = [format!("{}Class", RDFS), format!("{}Class", OWL)];
    let property_types = [
        format!("{}Property", RDF),
        format!("{}ObjectProperty", OWL),
        format!("{}DatatypeProperty", OWL),
        format!("{}AnnotationProperty", OWL),
    ];
    let shape_types = [format!("{}NodeShape", SHACL), format!("{}PropertyShape", SHACL)];

    let mut structure = GraphStructure {
        triples: triples.len(),
        ..GraphStructure::default()
    };

    for (subject, predicate, object) in triples {
        if *predicate == rdf_type {
            if class_types.contains(object) {
                structure.classes.insert(subject.clone());
            } else if property_types.contains(object) {
                structure.properties.insert(subject.clone());
            } else if shape_types.contains(object) {
                structure.shapes.insert(subject.clone(), 0);
            }
        } else if *predicate == subclass_of {
            structure.classes.insert(subject.clone());
        }
    }

    for (subject, _, _) in triples {
        if let Some(count) = structure.shapes.get_mut(subject) {
            *count += 1;
        }
    }

    structure
}

type Triple = (String, String, String);

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Iri(String),
    Literal(String),
    Word(String),
    Punct(char),
}

/// Deepest blank node or collection nesting accepted.
const MAX_NESTING: usize = 64;

const STOP_CHARS: &str = "<>\"';,[]()#";

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '<' => {
                let (iri, next) = read_iri(&chars, i)?;
                tokens.push(Token::Iri(iri));
                i = next;
            }
            '"' | '\'' => {
                let (literal, mut next) = read_string(&chars, i)?;
                if chars.get(next) == Some(&'@') {
                    next += 1;
                    while next < chars.len()
                        && (chars[next].is_ascii_alphanumeric() || chars[next] == '-')
                    {
                        next += 1;
                    }
                } else if chars.get(next) == Some(&'^') && chars.get(next + 1) == Some(&'^') {
                    next += 2;
                    next = if chars.get(next) == Some(&'<') {
                        read_iri(&chars, next)?.1
                    } else {
                        read_word_end(&chars, next)
                    };
                }
                tokens.push(Token::Literal(literal));
                i = next;
            }
            '.' | ';' | ',' | '[' | ']' | '(' | ')' => {
                tokens.push(Token::Punct(c));
                i += 1;
            }
            _ => {
                let end = read_word_end(&chars, i);
                if end == i {
                    return Err(Error::rdf_syntax(format!("unexpected character '{}'", c)));
                }
                let mut word: String = chars[i..end].iter().collect();
                // A trailing dot terminates the statement
                let mut dots = 0;
                while word.len() > 1 && word.ends_with('.') {
                    word.pop();
                    dots += 1;
                }
                tokens.push(Token::Word(word));
                tokens.extend(std::iter::repeat_n(Token::Punct('.'), dots));
                i = end;
            }
        }
    }

    Ok(tokens)
}

fn read_iri(chars: &[char], start: usize) -> Result<(String, usize)> {
    let mut end = start + 1;
    while end < chars.len() && chars[end] != '>' {
        if chars[end].is_whitespace() {
            return Err(Error::rdf_syntax("whitespace in IRI"));
        }
        end += 1;
    }
    if end >= chars.len() {
        return Err(Error::rdf_syntax("unterminated IRI"));
    }
    Ok((chars[start + 1..end].iter().collect(), end + 1))
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let long = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = if long { start + 3 } else { start + 1 };
    let mut value = String::new();

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            if let Some(&escaped) = chars.get(i + 1) {
                value.push(escaped);
            }
            i += 2;
            continue;
        }
        if long {
            if c == quote && chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return Ok((value, i + 3));
            }
        } else if c == quote {
            return Ok((value, i + 1));
        } else if c == '\n' {
            return Err(Error::rdf_syntax("newline in string literal"));
        }
        value.push(c);
        i += 1;
    }

    Err(Error::rdf_syntax("unterminated string literal"))
}

fn read_word_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && !chars[end].is_whitespace() && !STOP_CHARS.contains(chars[end]) {
        end += 1;
    }
    end
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    prefixes: HashMap<String, String>,
    blank_nodes: usize,
    depth: usize,
    triples: Vec<Triple>,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            prefixes: HashMap::new(),
            blank_nodes: 0,
            depth: 0,
            triples: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&'t Token> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| Error::rdf_syntax("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn at_punct(&self, c: char) -> bool {
        self.peek() == Some(&Token::Punct(c))
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        match self.next()? {
            Token::Punct(p) if *p == c => Ok(()),
            other => Err(Error::rdf_syntax(format!(
                "expected '{}', found {:?}",
                c, other
            ))),
        }
    }

    fn document(&mut self) -> Result<()> {
        while let Some(token) = self.peek() {
            match token {
                Token::Word(w) if w == "@prefix" || w.eq_ignore_ascii_case("prefix") => {
                    let turtle_style = w.starts_with('@');
                    self.pos += 1;
                    self.prefix_directive(turtle_style)?;
                }
                Token::Word(w) if w == "@base" || w.eq_ignore_ascii_case("base") => {
                    let turtle_style = w.starts_with('@');
                    self.pos += 1;
                    match self.next()? {
                        Token::Iri(_) => {}
                        other => {
                            return Err(Error::rdf_syntax(format!(
                                "expected IRI after base, found {:?}",
                                other
                            )));
                        }
                    }
                    if turtle_style {
                        self.expect_punct('.')?;
                    }
                }
                _ => {
                    self.statement()?;
                    self.expect_punct('.')?;
                }
            }
        }
        Ok(())
    }

    fn prefix_directive(&mut self, turtle_style: bool) -> Result<()> {
        let name = match self.next()? {
            Token::Word(w) if w.ends_with(':') => w.trim_end_matches(':').to_string(),
            other => {
                return Err(Error::rdf_syntax(format!(
                    "expected prefix name, found {:?}",
                    other
                )));
            }
        };
        let iri = match self.next()? {
            Token::Iri(iri) => iri.clone(),
            other => {
                return Err(Error::rdf_syntax(format!(
                    "expected namespace IRI, found {:?}",
                    other
                )));
            }
        };
        self.prefixes.insert(name, iri);
        if turtle_style {
            self.expect_punct('.')?;
        }
        Ok(())
    }

    fn statement(&mut self) -> Result<()> {
        if self.at_punct('[') {
            let subject = self.blank_node_property_list()?;
            if self.at_punct('.') {
                return Ok(());
            }
            return self.predicate_object_list(&subject);
        }
        let subject = self.term()?;
        self.predicate_object_list(&subject)
    }

    fn predicate_object_list(&mut self, subject: &str) -> Result<()> {
        loop {
            let predicate = self.verb()?;
            self.object_list(subject, &predicate)?;

            let mut separated = false;
            while self.at_punct(';') {
                self.pos += 1;
                separated = true;
            }
            if !separated || matches!(self.peek(), None | Some(Token::Punct('.' | ']'))) {
                return Ok(());
            }
        }
    }

    fn object_list(&mut self, subject: &str, predicate: &str) -> Result<()> {
        loop {
            let object = self.term()?;
            self.triples
                .push((subject.to_string(), predicate.to_string(), object));
            if self.at_punct(',') {
                self.pos += 1;
            } else {
                return Ok(());
            }
        }
    }

    fn verb(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Word(w)) if w == "a" => {
                self.pos += 1;
                Ok(format!("{}type", RDF))
            }
            Some(Token::Iri(_) | Token::Word(_)) => self.term(),
            other => Err(Error::rdf_syntax(format!(
                "expected predicate, found {:?}",
                other
            ))),
        }
    }

    fn term(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Punct('[')) => self.blank_node_property_list(),
            Some(Token::Punct('(')) => self.collection(),
            _ => match self.next()? {
                Token::Iri(iri) => Ok(iri.clone()),
                Token::Literal(value) => Ok(format!("\"{}\"", value)),
                Token::Word(word) => self.resolve_word(word),
                Token::Punct(p) => Err(Error::rdf_syntax(format!("unexpected '{}'", p))),
            },
        }
    }

    fn resolve_word(&self, word: &str) -> Result<String> {
        if word.starts_with("_:") {
            return Ok(word.to_string());
        }
        if word == "true"
            || word == "false"
            || word.starts_with(|c: char| c.is_ascii_digit() || c == '+' || c == '-')
        {
            return Ok(format!("\"{}\"", word));
        }
        let (prefix, local) = word
            .split_once(':')
            .ok_or_else(|| Error::rdf_syntax(format!("unexpected token '{}'", word)))?;
        let namespace = self
            .prefixes
            .get(prefix)
            .ok_or_else(|| Error::rdf_syntax(format!("undeclared prefix '{}:'", prefix)))?;
        Ok(format!("{}{}", namespace, local))
    }

    fn fresh_blank_node(&mut self) -> String {
        self.blank_nodes += 1;
        format!("_:b{}", self.blank_nodes)
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(Error::rdf_syntax(format!(
                "nesting deeper than {} levels",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn blank_node_property_list(&mut self) -> Result<String> {
        self.nested(|p| {
            p.expect_punct('[')?;
            let node = p.fresh_blank_node();
            if !p.at_punct(']') {
                p.predicate_object_list(&node)?;
            }
            p.expect_punct(']')?;
            Ok(node)
        })
    }

    fn collection(&mut self) -> Result<String> {
        self.nested(Self::collection_items)
    }

    fn collection_items(&mut self) -> Result<String> {
        self.expect_punct('(')?;
        let node = self.fresh_blank_node();
        let first = format!("{}first", RDF);
        while !self.at_punct(')') {
            if self.peek().is_none() {
                return Err(Error::rdf_syntax("unterminated collection"));
            }
            let item = self.term()?;
            self.triples.push((node.clone(), first.clone(), item));
        }
        self.expect_punct(')')?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONTOLOGY: &str = r#"
@prefix ex: <http://example.org/> .
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix sh: <http://www.w3.org/ns/shacl#> .

# Classes
ex:Person a rdfs:Class ;
    rdfs:label "Person"@en .
ex:Employee rdfs:subClassOf ex:Person .
ex:name a rdf:Property .

ex:PersonShape a sh:NodeShape ;
    sh:targetClass ex:Person ;
    sh:property [ sh:path ex:name ; sh:minCount 1 ] .
"#;

    fn parse(content: &str) -> GraphStructure {
        TurtleParser.parse(content).unwrap()
    }

    #[test]
    fn test_is_rdf_path() {
        assert!(is_rdf_path(Path::new("data.ttl")));
        assert!(is_rdf_path(Path::new("rules/onto.OWL")));
        assert!(!is_rdf_path(Path::new("page.njk")));
        assert!(!is_rdf_path(Path::new("ttl")));
    }

    #[test]
    fn test_looks_like_rdf() {
        assert!(looks_like_rdf(ONTOLOGY));
        assert!(looks_like_rdf("PREFIX ex: <http://example.org/>\nex:a ex:b ex:c ."));
        assert!(looks_like_rdf("<http://a> <http://b> <http://c> ."));
        assert!(!looks_like_rdf("original content"));
        assert!(!looks_like_rdf("# only a comment\n"));
    }

    #[test]
    fn test_parse_structure() {
        let graph = parse(ONTOLOGY);
        assert_eq!(graph.triples, 9);
        assert!(graph.classes.contains("http://example.org/Person"));
        assert!(graph.classes.contains("http://example.org/Employee"));
        assert!(graph.properties.contains("http://example.org/name"));
        assert_eq!(graph.shapes.get("http://example.org/PersonShape"), Some(&3));
    }

    #[test]
    fn test_parse_ntriples() {
        let graph = parse(
            "<http://a> <http://b> \"x\"^^<http://www.w3.org/2001/XMLSchema#string> .\n\
             <http://a> <http://c> _:n1 .\n",
        );
        assert_eq!(graph.triples, 2);
    }

    #[test]
    fn test_parse_sparql_prefix_and_lists() {
        let graph = parse(
            "PREFIX ex: <http://example.org/>\n\
             ex:a ex:items ( ex:x ex:y 3 ), ex:z ;\n\
                  ex:flag true .",
        );
        // items -> list, items -> z, flag, plus one rdf:first per item
        assert_eq!(graph.triples, 6);
    }

    #[test]
    fn test_long_string() {
        let graph = parse(
            "@prefix ex: <http://example.org/> .\nex:a ex:doc \"\"\"multi\nline \"quoted\" \"\"\" .",
        );
        assert_eq!(graph.triples, 1);
    }

    #[test]
    fn test_syntax_errors() {
        for bad in [
            "ex:a ex:b ex:c .",
            "@prefix ex: <http://example.org/> .\nex:a ex:b \"open .",
            "@prefix ex: <http://example.org/> .\nex:a ex:b ex:c",
            "<http://a> <http://b> .",
            "@prefix ex: <http://example.org/ .",
        ] {
            assert!(TurtleParser.parse(bad).is_err(), "accepted: {}", bad);
        }
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let depth = 10_000;
        let hostile = format!(
            "@prefix ex: <http://example.org/> .\nex:a ex:b {}ex:c{} .",
            "[ ex:p ".repeat(depth),
            " ]".repeat(depth)
        );
        assert!(TurtleParser.parse(&hostile).is_err());

        let lists = format!(
            "@prefix ex: <http://example.org/> .\nex:a ex:b {}{} .",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        assert!(TurtleParser.parse(&lists).is_err());

        let shallow = format!(
            "@prefix ex: <http://example.org/> .\nex:a ex:b {}ex:c{} .",
            "[ ex:p ".repeat(8),
            " ]".repeat(8)
        );
        assert_eq!(parse(&shallow).triples, 9);
    }

    #[test]
    fn test_delta_shape_redefinition() {
        let before = parse(ONTOLOGY);
        let after = parse(&ONTOLOGY.replace(
            "sh:targetClass ex:Person ;",
            "sh:targetClass ex:Person ;\n    sh:closed true ;",
        ));
        let delta = StructureDelta::between(&before, &after);
        assert_eq!(delta.shapes_redefined, vec!["http://example.org/PersonShape"]);
        assert!(delta.is_high_impact(100));
        assert!(delta.notes(100)[0].contains("SHACL"));
    }

    #[test]
    fn test_delta_triple_threshold() {
        let before = parse("@prefix ex: <http://example.org/> .\nex:a ex:b ex:c .");
        let mut big = String::from("@prefix ex: <http://example.org/> .\n");
        for i in 0..150 {
            big.push_str(&format!("ex:s{} ex:p ex:o .\n", i));
        }
        let after = parse(&big);
        let delta = StructureDelta::between(&before, &after);
        assert_eq!(delta.triple_delta(), 149);
        assert!(delta.is_high_impact(100));
        assert!(!delta.is_high_impact(200));
    }

    #[test]
    fn test_delta_classes_low_impact() {
        let before = parse(ONTOLOGY);
        let after = parse(&format!("{}\nex:Manager a rdfs:Class .", ONTOLOGY));
        let delta = StructureDelta::between(&before, &after);
        assert_eq!(delta.classes_added, vec!["http://example.org/Manager"]);
        assert!(!delta.is_high_impact(100));
        assert_eq!(delta.notes(100).len(), 1);
    }
}
