//! Recursive-descent parser for circuit strings.
//!
//! ```text
//! circuit := series
//! series  := term ('-' term)*
//! term    := 'p' '(' series (',' series)* ')' | ident
//! ident   := [A-Za-z][A-Za-z0-9_]*
//! ```
//!
//! Whitespace is ignored. Identifiers resolve to registered elements after
//! stripping digits and underscores, so `R0`, `R_ct1` and `CPE2` name a
//! resistor, an `Rct` element and a constant phase element respectively.

use std::collections::HashSet;

use thiserror::Error;

use super::elements::ElementRegistry;
use super::network::{Circuit, ConnectionKind, ElementSlot, Network, Node};

/// Errors raised while parsing a circuit string. Positions are byte offsets
/// into the original input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The input contains no elements.
    #[error("circuit string is empty")]
    Empty,
    /// A character that does not fit the grammar at this point.
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar {
        /// Offending character.
        ch: char,
        /// Byte offset.
        pos: usize,
    },
    /// The input ended in the middle of a term.
    #[error("unexpected end of circuit string, expected {expected}")]
    UnexpectedEnd {
        /// What the parser was looking for.
        expected: &'static str,
    },
    /// `p()` without branches.
    #[error("parallel block at position {pos} has no branches")]
    EmptyParallel {
        /// Byte offset of the `p`.
        pos: usize,
    },
    /// Identifier whose element kind is not registered.
    #[error("unknown element '{identifier}' at position {pos}")]
    UnknownElement {
        /// Identifier as written.
        identifier: String,
        /// Byte offset.
        pos: usize,
    },
    /// The same identifier names two elements.
    #[error("element names must be unique, '{0}' appears more than once")]
    DuplicateElement(String),
}

struct Parser<'a> {
    tokens: Vec<(usize, char)>,
    cursor: usize,
    registry: &'a ElementRegistry,
    slots: Vec<ElementSlot>,
    seen: HashSet<String>,
    next_offset: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &str, registry: &'a ElementRegistry) -> Self {
        Self {
            tokens: input.char_indices().filter(|(_, c)| !c.is_whitespace()).collect(),
            cursor: 0,
            registry,
            slots: Vec::new(),
            seen: HashSet::new(),
            next_offset: 0,
        }
    }

    fn peek(&self) -> Option<(usize, char)> {
        self.tokens.get(self.cursor).copied()
    }

    fn bump(&mut self) {
        self.cursor += 1;
    }

    fn expect(&mut self, wanted: char, expected: &'static str) -> Result<(), ParseError> {
        match self.peek() {
            Some((_, c)) if c == wanted => {
                self.bump();
                Ok(())
            }
            Some((pos, ch)) => Err(ParseError::UnexpectedChar { ch, pos }),
            None => Err(ParseError::UnexpectedEnd { expected }),
        }
    }

    fn series(&mut self) -> Result<Node, ParseError> {
        let mut terms = vec![self.term()?];
        while let Some((_, '-')) = self.peek() {
            self.bump();
            terms.push(self.term()?);
        }
        Ok(collapse(ConnectionKind::Series, terms))
    }

    fn term(&mut self) -> Result<Node, ParseError> {
        let (start, first) = self
            .peek()
            .ok_or(ParseError::UnexpectedEnd { expected: "an element or 'p('" })?;
        if !first.is_ascii_alphabetic() {
            return Err(ParseError::UnexpectedChar { ch: first, pos: start });
        }
        let mut identifier = String::new();
        while let Some((_, c)) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                identifier.push(c);
                self.bump();
            } else {
                break;
            }
        }

        if identifier == "p" && matches!(self.peek(), Some((_, '('))) {
            self.bump();
            return self.parallel(start);
        }
        self.element(identifier, start)
    }

    fn parallel(&mut self, start: usize) -> Result<Node, ParseError> {
        if let Some((_, ')')) = self.peek() {
            return Err(ParseError::EmptyParallel { pos: start });
        }
        let mut branches = vec![self.series()?];
        while let Some((_, ',')) = self.peek() {
            self.bump();
            branches.push(self.series()?);
        }
        self.expect(')', "')'")?;
        Ok(collapse(ConnectionKind::Parallel, branches))
    }

    fn element(&mut self, identifier: String, pos: usize) -> Result<Node, ParseError> {
        let element = self
            .registry
            .resolve(&identifier)
            .ok_or_else(|| ParseError::UnknownElement { identifier: identifier.clone(), pos })?;
        if !self.seen.insert(identifier.clone()) {
            return Err(ParseError::DuplicateElement(identifier));
        }
        let slot = ElementSlot::new(identifier, element, self.next_offset);
        self.next_offset += slot.num_params();
        self.slots.push(slot.clone());
        Ok(Node::Element(slot))
    }
}

/// A single member needs no network wrapper.
fn collapse(connection: ConnectionKind, mut members: Vec<Node>) -> Node {
    if members.len() == 1 {
        members.remove(0)
    } else {
        Node::Network(Network::new(connection, members))
    }
}

/// Parses `input` against `registry`.
pub fn parse_circuit(input: &str, registry: &ElementRegistry) -> Result<Circuit, ParseError> {
    let mut parser = Parser::new(input, registry);
    if parser.tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    let root = parser.series()?;
    if let Some((pos, ch)) = parser.peek() {
        return Err(ParseError::UnexpectedChar { ch, pos });
    }
    let normalized: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(Circuit::from_parts(normalized, root, parser.slots))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<Circuit, ParseError> {
        parse_circuit(input, &ElementRegistry::builtin())
    }

    #[test]
    fn parses_nested_randles_circuit() {
        let circuit = parse("R0-p(R1-Wo1, CPE1)").expect("valid circuit");
        assert_eq!(circuit.element_names(), vec!["R0", "R1", "Wo1", "CPE1"]);
        assert_eq!(circuit.num_params(), 6);
        assert_eq!(circuit.to_string(), "R0-p(R1-Wo1,CPE1)");
        match circuit.root() {
            Node::Network(net) => {
                assert_eq!(net.connection_kind(), ConnectionKind::Series);
                assert_eq!(net.len(), 2);
            }
            Node::Element(_) => panic!("expected a series network"),
        }
    }

    #[test]
    fn single_element_is_a_bare_node() {
        let circuit = parse("R_0").expect("valid circuit");
        assert!(matches!(circuit.root(), Node::Element(_)));
    }

    #[test]
    fn reports_unknown_elements_with_position() {
        let err = parse("R0-X1").unwrap_err();
        assert_eq!(err, ParseError::UnknownElement { identifier: "X1".into(), pos: 3 });
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let err = parse("R1-p(R1,C1)").unwrap_err();
        assert_eq!(err, ParseError::DuplicateElement("R1".into()));
    }

    #[test]
    fn rejects_malformed_structure() {
        assert_eq!(parse("   ").unwrap_err(), ParseError::Empty);
        assert_eq!(parse("p()").unwrap_err(), ParseError::EmptyParallel { pos: 0 });
        assert!(matches!(parse("p(R1,C1"), Err(ParseError::UnexpectedEnd { .. })));
        assert!(matches!(parse("R1-"), Err(ParseError::UnexpectedEnd { .. })));
        assert_eq!(parse("R1)").unwrap_err(), ParseError::UnexpectedChar { ch: ')', pos: 2 });
        assert_eq!(parse("R1--C1").unwrap_err(), ParseError::UnexpectedChar { ch: '-', pos: 3 });
    }
}
