//! Equivalent circuit elements, the circuit-string grammar and evaluation.

/// Frequency sweeps over parsed circuits.
pub mod analysis;
/// Element models and the element registry.
pub mod elements;
/// Circuit trees and parameter layout.
pub mod network;
/// Circuit string parser.
pub mod parser;

pub use analysis::{sweep_circuit_impedance, FrequencyPoint};
pub use elements::{Builtin, Element, ElementError, ElementRegistry, FnElement};
pub use network::{Circuit, ConnectionKind, ElementSlot, Network, Node};
pub use parser::ParseError;
