use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::errors::{EisError, Result};
use crate::math::{CScalar, Scalar, ONE};

use super::elements::{Element, ElementError, ElementRegistry};
use super::parser::{parse_circuit, ParseError};

/// Connection topology for a collection of circuit nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Series connection (impedances add linearly).
    Series,
    /// Parallel connection (admittances add linearly).
    Parallel,
}

/// A named element instance inside a circuit, bound to its slice of the
/// flat parameter vector.
#[derive(Clone)]
pub struct ElementSlot {
    identifier: String,
    element: Arc<dyn Element>,
    offset: usize,
}

impl ElementSlot {
    pub(crate) fn new(identifier: String, element: Arc<dyn Element>, offset: usize) -> Self {
        Self { identifier, element, offset }
    }

    /// Identifier as written in the circuit string (e.g. `CPE1`).
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The element model.
    #[must_use]
    pub fn element(&self) -> &dyn Element {
        self.element.as_ref()
    }

    /// Index of the first parameter in the flat parameter vector.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of parameters this element consumes.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.element.num_params()
    }

    /// Names of this element's parameters: `R0`, or `Wo1_0`, `Wo1_1`.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<String> {
        match self.num_params() {
            1 => vec![self.identifier.clone()],
            n => (0..n).map(|i| format!("{}_{i}", self.identifier)).collect(),
        }
    }

    fn impedance(&self, params: &[Scalar], omega: Scalar) -> CScalar {
        let end = self.offset + self.num_params();
        self.element.impedance(&params[self.offset..end], omega)
    }
}

impl fmt::Debug for ElementSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementSlot")
            .field("identifier", &self.identifier)
            .field("kind", &self.element.name())
            .field("offset", &self.offset)
            .finish()
    }
}

/// Node of a circuit tree.
#[derive(Debug, Clone)]
pub enum Node {
    /// A single element.
    Element(ElementSlot),
    /// A group of nodes sharing a connection style.
    Network(Network),
}

impl Node {
    /// Impedance of this subtree. `params` is the full circuit parameter vector.
    #[must_use]
    pub fn impedance(&self, params: &[Scalar], omega: Scalar) -> CScalar {
        match self {
            Self::Element(slot) => slot.impedance(params, omega),
            Self::Network(network) => network.impedance(params, omega),
        }
    }
}

/// Aggregate that groups nodes with a shared connection style.
#[derive(Debug, Clone)]
pub struct Network {
    connection: ConnectionKind,
    members: Vec<Node>,
}

impl Network {
    /// Creates a network.
    #[must_use]
    pub fn new(connection: ConnectionKind, members: Vec<Node>) -> Self {
        Self { connection, members }
    }

    /// Returns the aggregate impedance for the network.
    ///
    /// In parallel, a zero-impedance branch shorts the network and an
    /// infinite branch carries no current.
    #[must_use]
    pub fn impedance(&self, params: &[Scalar], omega: Scalar) -> CScalar {
        match self.connection {
            ConnectionKind::Series => self
                .members
                .iter()
                .map(|m| m.impedance(params, omega))
                .sum(),
            ConnectionKind::Parallel => {
                let mut admittance = CScalar::default();
                for member in &self.members {
                    let z = member.impedance(params, omega);
                    if z.re.is_nan() || z.im.is_nan() {
                        return z;
                    }
                    if z.norm() == 0.0 {
                        return CScalar::default();
                    }
                    if z.re.is_infinite() || z.im.is_infinite() {
                        continue;
                    }
                    admittance += ONE / z;
                }

                if admittance.norm() == 0.0 {
                    CScalar::new(Scalar::INFINITY, 0.0)
                } else {
                    ONE / admittance
                }
            }
        }
    }

    /// Returns the connection topology.
    #[must_use]
    pub fn connection_kind(&self) -> ConnectionKind {
        self.connection
    }

    /// Member nodes in circuit-string order.
    #[must_use]
    pub fn members(&self) -> &[Node] {
        &self.members
    }

    /// Returns the number of members in the network.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true when no members are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn builtin_registry() -> &'static ElementRegistry {
    static REGISTRY: OnceLock<ElementRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ElementRegistry::builtin)
}

/// A parsed equivalent circuit: its topology plus the flat parameter layout.
#[derive(Clone)]
pub struct Circuit {
    source: String,
    root: Node,
    slots: Vec<ElementSlot>,
}

impl Circuit {
    /// Parses a circuit string using the built-in elements.
    pub fn parse(input: &str) -> std::result::Result<Self, ParseError> {
        parse_circuit(input, builtin_registry())
    }

    /// Parses a circuit string against a custom registry.
    pub fn parse_with_registry(
        input: &str,
        registry: &ElementRegistry,
    ) -> std::result::Result<Self, ParseError> {
        parse_circuit(input, registry)
    }

    pub(crate) fn from_parts(source: String, root: Node, slots: Vec<ElementSlot>) -> Self {
        Self { source, root, slots }
    }

    /// Normalised circuit string (whitespace removed).
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Root of the circuit tree.
    #[must_use]
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Element instances in parameter order.
    #[must_use]
    pub fn elements(&self) -> &[ElementSlot] {
        &self.slots
    }

    /// Identifiers of the elements in parameter order.
    #[must_use]
    pub fn element_names(&self) -> Vec<&str> {
        self.slots.iter().map(ElementSlot::identifier).collect()
    }

    /// Total number of parameters.
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.slots.iter().map(ElementSlot::num_params).sum()
    }

    /// Parameter names in parameter order.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<String> {
        self.slots.iter().flat_map(ElementSlot::parameter_names).collect()
    }

    /// Parameter units in parameter order.
    #[must_use]
    pub fn parameter_units(&self) -> Vec<String> {
        self.slots
            .iter()
            .flat_map(|s| s.element.units().into_iter().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    /// Default fitting bounds in parameter order.
    #[must_use]
    pub fn default_bounds(&self) -> Vec<(Scalar, Scalar)> {
        self.slots.iter().flat_map(|s| s.element.default_bounds()).collect()
    }

    /// Impedance at one angular frequency. `params` must hold
    /// [`Circuit::num_params`] values; use [`Circuit::impedance`] for checked
    /// evaluation.
    #[must_use]
    pub fn impedance_at(&self, params: &[Scalar], omega: Scalar) -> CScalar {
        self.root.impedance(params, omega)
    }

    /// Evaluates the circuit at every frequency in `freqs` (Hz).
    pub fn impedance(&self, params: &[Scalar], freqs: &[Scalar]) -> Result<Vec<CScalar>> {
        self.check_parameters(params)?;
        check_frequencies(freqs)?;
        Ok(freqs
            .iter()
            .map(|&f| self.impedance_at(params, crate::constants::angular_frequency(f)))
            .collect())
    }

    pub(crate) fn check_parameters(&self, params: &[Scalar]) -> Result<()> {
        if params.len() != self.num_params() {
            return Err(ElementError::ParameterCount {
                name: self.source.clone(),
                expected: self.num_params(),
                found: params.len(),
            }
            .into());
        }
        if let Some(&value) = params.iter().find(|v| !v.is_finite()) {
            return Err(ElementError::NonFinite { name: self.source.clone(), value }.into());
        }
        Ok(())
    }
}

/// Frequencies must be finite and strictly positive.
pub(crate) fn check_frequencies(freqs: &[Scalar]) -> Result<()> {
    match freqs.iter().find(|f| !(f.is_finite() && **f > 0.0)) {
        Some(f) => Err(EisError::InvalidData(format!(
            "frequencies must be positive and finite, got {f}"
        ))),
        None => Ok(()),
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Circuit")
            .field("source", &self.source)
            .field("elements", &self.element_names())
            .field("num_params", &self.num_params())
            .finish()
    }
}

impl std::str::FromStr for Circuit {
    type Err = ParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}
