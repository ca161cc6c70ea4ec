//! Circuit element models and the registry that resolves element names.
//!
//! Every element maps a flat slice of real parameters and an angular
//! frequency to a complex impedance. Built-in elements cover the common EIS
//! catalogue; additional models can be registered at runtime with
//! [`FnElement`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::constants::{SINH_CUTOFF, SINH_SATURATION};
use crate::math::{coth, modified_bessel_ratio, tanh, CScalar, Scalar, J, ONE};

/// Errors raised while registering or evaluating elements.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ElementError {
    /// `s` and `p` name the series and parallel operators.
    #[error("cannot redefine elements 's' (series) or 'p' (parallel), got '{0}'")]
    Reserved(String),
    /// Element names are matched after stripping digits and underscores, so
    /// only ASCII letters are allowed.
    #[error("element name '{0}' must consist of ASCII letters only")]
    InvalidName(String),
    /// Registration would replace an existing element.
    #[error("element {0} already exists; register with overwrite = true to replace it")]
    AlreadyExists(String),
    /// Wrong number of parameters supplied to an element or circuit.
    #[error("in {name}, expected {expected} parameters but got {found}")]
    ParameterCount {
        /// Element or circuit being evaluated.
        name: String,
        /// Required parameter count.
        expected: usize,
        /// Supplied parameter count.
        found: usize,
    },
    /// Parameter or frequency is NaN or infinite.
    #[error("in {name}, value {value} is not a finite number")]
    NonFinite {
        /// Element or circuit being evaluated.
        name: String,
        /// Offending value.
        value: Scalar,
    },
}

/// Trait implemented by all circuit elements.
pub trait Element: Send + Sync {
    /// Registry name of the element kind (e.g. `CPE`).
    fn name(&self) -> &str;

    /// Number of real parameters the element consumes.
    fn num_params(&self) -> usize;

    /// Units of each parameter, `num_params` entries long.
    fn units(&self) -> Vec<&str>;

    /// Returns the impedance at angular frequency `omega` (rad/s).
    ///
    /// `params` must hold exactly [`Element::num_params`] values.
    fn impedance(&self, params: &[Scalar], omega: Scalar) -> CScalar;

    /// Default fitting bounds per parameter. Non-negative and unbounded above.
    fn default_bounds(&self) -> Vec<(Scalar, Scalar)> {
        vec![(0.0, Scalar::INFINITY); self.num_params()]
    }

    /// Validates the parameter slice before evaluating.
    fn checked_impedance(&self, params: &[Scalar], omega: Scalar) -> Result<CScalar, ElementError> {
        if params.len() != self.num_params() {
            return Err(ElementError::ParameterCount {
                name: self.name().to_string(),
                expected: self.num_params(),
                found: params.len(),
            });
        }
        if let Some(&value) = params.iter().chain(std::iter::once(&omega)).find(|v| !v.is_finite()) {
            return Err(ElementError::NonFinite { name: self.name().to_string(), value });
        }
        Ok(self.impedance(params, omega))
    }
}

/// The built-in element catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// Resistor, `Z = R`.
    R,
    /// Capacitor, `Z = 1 / (jωC)`.
    C,
    /// Inductor, `Z = jωL`.
    L,
    /// Semi-infinite Warburg, `Z = A_W (1 - j) / √ω`.
    W,
    /// Open (finite-space) Warburg, `Z = Z0 coth√(jωτ) / √(jωτ)`.
    Wo,
    /// Short (finite-length) Warburg, `Z = Z0 tanh√(jωτ) / √(jωτ)`.
    Ws,
    /// Constant phase element, `Z = 1 / (Q (jω)^α)`.
    Cpe,
    /// Modified inductance, `Z = L (jω)^α`.
    La,
    /// Gerischer, `Z = R_G / √(1 + jωt_G)`.
    G,
    /// Finite-length Gerischer.
    Gs,
    /// RC element used by the lin-KK test, `Z = R / (1 + jωτ)`.
    K,
    /// Cole-Cole relaxation, `Z = R / (1 + (jωτ)^γ)`.
    Zarc,
    /// Simplified transmission-line model with a CPE interface.
    Tlmq,
    /// Macrohomogeneous porous electrode (Paasch et al.).
    T,
    /// Porous electrode with planar diffusion, `Z_D = A_W / (s tanh s)`.
    Tdp,
    /// Porous electrode with spherical diffusion, `Z_D = A_W tanh s / (s - tanh s)`.
    Tds,
    /// Porous electrode with cylindrical diffusion, `Z_D = A_W I0(s) / (s I1(s))`.
    Tdc,
}

impl Builtin {
    /// Every built-in element.
    pub const ALL: [Builtin; 17] = [
        Self::R,
        Self::C,
        Self::L,
        Self::W,
        Self::Wo,
        Self::Ws,
        Self::Cpe,
        Self::La,
        Self::G,
        Self::Gs,
        Self::K,
        Self::Zarc,
        Self::Tlmq,
        Self::T,
        Self::Tdp,
        Self::Tds,
        Self::Tdc,
    ];

    fn unit_table(self) -> &'static [&'static str] {
        match self {
            Self::R => &["Ohm"],
            Self::C => &["F"],
            Self::L => &["H"],
            Self::W => &["Ohm sec^-1/2"],
            Self::Wo | Self::Ws | Self::G | Self::K => &["Ohm", "sec"],
            Self::Cpe => &["Ohm^-1 sec^a", ""],
            Self::La => &["H sec", ""],
            Self::Gs | Self::Zarc => &["Ohm", "sec", ""],
            Self::Tlmq => &["Ohm", "F sec^(gamma - 1)", ""],
            Self::T => &["Ohm-m^2", "Ohm-m^2", "", "sec"],
            Self::Tdp | Self::Tds | Self::Tdc => &["Ohm-m^2", "Ohm-m^2", "", "sec", "m^2", "s"],
        }
    }
}

impl Element for Builtin {
    fn name(&self) -> &str {
        match self {
            Self::R => "R",
            Self::C => "C",
            Self::L => "L",
            Self::W => "W",
            Self::Wo => "Wo",
            Self::Ws => "Ws",
            Self::Cpe => "CPE",
            Self::La => "La",
            Self::G => "G",
            Self::Gs => "Gs",
            Self::K => "K",
            Self::Zarc => "Zarc",
            Self::Tlmq => "TLMQ",
            Self::T => "T",
            Self::Tdp => "TDP",
            Self::Tds => "TDS",
            Self::Tdc => "TDC",
        }
    }

    fn num_params(&self) -> usize {
        self.unit_table().len()
    }

    fn units(&self) -> Vec<&str> {
        self.unit_table().to_vec()
    }

    fn impedance(&self, p: &[Scalar], omega: Scalar) -> CScalar {
        let jw = J * omega;
        match self {
            Self::R => CScalar::new(p[0], 0.0),
            Self::C => ONE / (jw * p[0]),
            Self::L => jw * p[0],
            Self::W => CScalar::new(p[0], -p[0]) / omega.sqrt(),
            Self::Wo => {
                let s = (jw * p[1]).sqrt();
                p[0] * coth(s) / s
            }
            Self::Ws => {
                let s = (jw * p[1]).sqrt();
                p[0] * tanh(s) / s
            }
            Self::Cpe => ONE / (p[0] * jw.powf(p[1])),
            Self::La => p[0] * jw.powf(p[1]),
            Self::G => p[0] / (ONE + jw * p[1]).sqrt(),
            Self::Gs => {
                let s = (ONE + jw * p[1]).sqrt();
                p[0] / (s * tanh(s * p[2]))
            }
            Self::K => p[0] / (ONE + jw * p[1]),
            Self::Zarc => p[0] / (ONE + (jw * p[1]).powf(p[2])),
            Self::Tlmq => {
                let zs = ONE / (p[1] * jw.powf(p[2]));
                (zs * p[0]).sqrt() * coth((p[0] / zs).sqrt())
            }
            Self::T => {
                let beta = (jw * p[3] + p[2]).sqrt();
                porous_electrode(p[0], p[1], beta)
            }
            Self::Tdp | Self::Tds | Self::Tdc => {
                let (a, b) = (p[0], p[1]);
                let sum = a + b;
                let (r_ct, c_dl) = (sum / p[2], p[3] / sum);
                let s = (jw * p[5]).sqrt();
                let (r_pore, z_d) = match self {
                    Self::Tdp => (a, p[4] / (tanh(s) * s)),
                    Self::Tds => (spherical_pore_resistance(a, b), p[4] * tanh(s) / (s - tanh(s))),
                    _ => (a, p[4] / (s * bessel_i1_over_i0(s))),
                };
                let beta = (jw * (r_pore * c_dl) + r_pore / (z_d + r_ct)).sqrt();
                porous_electrode(a, b, beta)
            }
        }
    }

    fn default_bounds(&self) -> Vec<(Scalar, Scalar)> {
        let mut bounds = vec![(0.0, Scalar::INFINITY); self.num_params()];
        if matches!(self, Self::Cpe | Self::La) {
            bounds[1].1 = 1.0;
        }
        bounds
    }
}

/// `A coth β / β + B / (β sinh β)`, saturating `sinh` for large `Re β`.
fn porous_electrode(a: Scalar, b: Scalar, beta: CScalar) -> CScalar {
    let sinh = if beta.re < SINH_CUTOFF {
        beta.sinh()
    } else {
        CScalar::new(SINH_SATURATION, 0.0)
    };
    a / (beta * tanh(beta)) + b / (beta * sinh)
}

/// Pore resistance of the spherical-diffusion model.
///
/// `A + B = R1 + R2` and `A - B = (R1 - R2)^2 / (R1 + R2)`; the pore
/// resistance is the larger root.
fn spherical_pore_resistance(a: Scalar, b: Scalar) -> Scalar {
    let sum = a + b;
    (sum + ((a - b) * sum).sqrt()) / 2.0
}

/// `I1(s) / I0(s)`, taken as `1` once `Re s` reaches the sinh cutoff.
fn bessel_i1_over_i0(s: CScalar) -> CScalar {
    if s.re < SINH_CUTOFF {
        modified_bessel_ratio(s)
    } else {
        ONE
    }
}

/// Custom element backed by a closure.
pub struct FnElement {
    name: String,
    units: Vec<String>,
    bounds: Option<Vec<(Scalar, Scalar)>>,
    func: Box<dyn Fn(&[Scalar], Scalar) -> CScalar + Send + Sync>,
}

impl FnElement {
    /// Creates an element whose parameter count is `units.len()`.
    pub fn new<F>(name: impl Into<String>, units: &[&str], func: F) -> Self
    where
        F: Fn(&[Scalar], Scalar) -> CScalar + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            units: units.iter().map(|u| (*u).to_string()).collect(),
            bounds: None,
            func: Box::new(func),
        }
    }

    /// Overrides the default fitting bounds.
    #[must_use]
    pub fn with_bounds(mut self, bounds: Vec<(Scalar, Scalar)>) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

impl Element for FnElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_params(&self) -> usize {
        self.units.len()
    }

    fn units(&self) -> Vec<&str> {
        self.units.iter().map(String::as_str).collect()
    }

    fn impedance(&self, params: &[Scalar], omega: Scalar) -> CScalar {
        (self.func)(params, omega)
    }

    fn default_bounds(&self) -> Vec<(Scalar, Scalar)> {
        match &self.bounds {
            Some(b) if b.len() == self.num_params() => b.clone(),
            _ => vec![(0.0, Scalar::INFINITY); self.num_params()],
        }
    }
}

impl fmt::Debug for FnElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnElement")
            .field("name", &self.name)
            .field("units", &self.units)
            .finish()
    }
}

/// Strips digits and underscores from an identifier: `CPE1` -> `CPE`.
#[must_use]
pub fn element_kind_from_name(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_ascii_digit() && *c != '_')
        .collect()
}

/// Name-indexed collection of elements available to the circuit parser.
#[derive(Clone)]
pub struct ElementRegistry {
    elements: HashMap<String, Arc<dyn Element>>,
}

impl ElementRegistry {
    /// Registry without any elements.
    #[must_use]
    pub fn empty() -> Self {
        Self { elements: HashMap::new() }
    }

    /// Registry populated with the built-in catalogue.
    #[must_use]
    pub fn builtin() -> Self {
        let elements = Builtin::ALL
            .iter()
            .map(|b| (b.name().to_string(), Arc::new(*b) as Arc<dyn Element>))
            .collect();
        Self { elements }
    }

    /// Adds an element.
    ///
    /// Fails when the name is reserved or malformed, or when it already
    /// exists and `overwrite` is false.
    pub fn register<E>(&mut self, element: E, overwrite: bool) -> Result<(), ElementError>
    where
        E: Element + 'static,
    {
        let name = element.name().to_string();
        if name == "s" || name == "p" {
            return Err(ElementError::Reserved(name));
        }
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ElementError::InvalidName(name));
        }
        if self.elements.contains_key(&name) && !overwrite {
            return Err(ElementError::AlreadyExists(name));
        }
        tracing::debug!(element = %name, overwrite, "registering circuit element");
        self.elements.insert(name, Arc::new(element));
        Ok(())
    }

    /// Looks up an element kind by its exact registry name.
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<dyn Element>> {
        self.elements.get(kind).cloned()
    }

    /// Resolves a circuit identifier (`Wo1`, `R_0`) to its element kind.
    #[must_use]
    pub fn resolve(&self, identifier: &str) -> Option<Arc<dyn Element>> {
        self.get(&element_kind_from_name(identifier))
    }

    /// Returns true when `kind` is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.elements.contains_key(kind)
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.elements.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true when no elements are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl Default for ElementRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ElementRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementRegistry")
            .field("elements", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use approx::assert_relative_eq;

    use super::*;

    const OMEGA: Scalar = 2.0 * PI * 10.0;

    fn z(element: Builtin, params: &[Scalar]) -> CScalar {
        element.checked_impedance(params, OMEGA).expect("valid parameters")
    }

    #[test]
    fn resistor_impedance_is_real() {
        let value = z(Builtin::R, &[100.0]);
        assert_relative_eq!(value.re, 100.0);
        assert_relative_eq!(value.im, 0.0);
    }

    #[test]
    fn capacitor_and_inductor_are_reactive() {
        let c = z(Builtin::C, &[1.0e-6]);
        assert_relative_eq!(c.re, 0.0, epsilon = 1.0e-12);
        assert_relative_eq!(c.im, -1.0 / (OMEGA * 1.0e-6), max_relative = 1.0e-12);
        let l = z(Builtin::L, &[1.0e-3]);
        assert_relative_eq!(l.im, OMEGA * 1.0e-3, max_relative = 1.0e-12);
    }

    #[test]
    fn warburg_has_forty_five_degree_phase() {
        let w = z(Builtin::W, &[2.0]);
        assert_relative_eq!(w.re, -w.im, max_relative = 1.0e-12);
        assert_relative_eq!(w.re, 2.0 / OMEGA.sqrt(), max_relative = 1.0e-12);
    }

    #[test]
    fn cpe_with_unit_exponent_is_a_capacitor() {
        let cpe = z(Builtin::Cpe, &[1.0e-6, 1.0]);
        let c = z(Builtin::C, &[1.0e-6]);
        assert_relative_eq!(cpe.re, c.re, epsilon = 1.0e-6);
        assert_relative_eq!(cpe.im, c.im, max_relative = 1.0e-9);
    }

    #[test]
    fn zarc_with_unit_exponent_matches_k() {
        let zarc = z(Builtin::Zarc, &[50.0, 1.0e-3, 1.0]);
        let k = z(Builtin::K, &[50.0, 1.0e-3]);
        assert_relative_eq!(zarc.re, k.re, max_relative = 1.0e-9);
        assert_relative_eq!(zarc.im, k.im, max_relative = 1.0e-9);
    }

    #[test]
    fn finite_warburgs_approach_resistance_at_low_frequency() {
        let low = 1.0e-9;
        let ws = Builtin::Ws.impedance(&[10.0, 1.0], low);
        assert_relative_eq!(ws.re, 10.0, max_relative = 1.0e-6);
        let wo = Builtin::Wo.impedance(&[10.0, 1.0], low);
        assert!(wo.im < 0.0, "open Warburg is capacitive at low frequency");
    }

    #[test]
    fn gerischer_is_resistive_at_dc_limit() {
        let g = Builtin::G.impedance(&[5.0, 1.0e-3], 1.0e-9);
        assert_relative_eq!(g.re, 5.0, max_relative = 1.0e-9);
    }

    #[test]
    fn porous_electrode_survives_large_beta() {
        let t = Builtin::T.impedance(&[1.0, 0.5, 2.0e4, 1.0], 1.0e6);
        assert!(t.re.is_finite() && t.im.is_finite());
    }

    #[test]
    fn spherical_pore_resistance_is_larger_root() {
        let (r1, r2) = (3.0, 1.0);
        let a = (r1 * r1 + r2 * r2) / (r1 + r2);
        let b = 2.0 * r1 * r2 / (r1 + r2);
        assert_relative_eq!(spherical_pore_resistance(a, b), r1, max_relative = 1.0e-12);
    }

    const PORE: [Scalar; 6] = [2.5, 1.5, 1.0, 2.0, 3.0, 0.5];

    #[test]
    fn diffusion_porous_electrodes_match_reference_values() {
        let omega = 2.0 * PI;
        for (element, re, im) in [
            (Builtin::Tdp, 0.521_440_342, -0.637_851_608),
            (Builtin::Tds, 0.488_649_184, -0.560_102_615),
            (Builtin::Tdc, 0.518_118_574, -0.634_291_801),
        ] {
            let value = element.checked_impedance(&PORE, omega).expect("valid parameters");
            assert_relative_eq!(value.re, re, epsilon = 1.0e-8);
            assert_relative_eq!(value.im, im, epsilon = 1.0e-8);
        }
    }

    #[test]
    fn planar_diffusion_uses_a_as_pore_resistance() {
        let omega = 2.0 * PI;
        let [a, b, k, tau, aw, tau_d] = PORE;
        let s = (J * omega * tau_d).sqrt();
        let z_d = aw / (s.tanh() * s);
        let beta = (J * omega * (a * tau / (a + b)) + a / (z_d + (a + b) / k)).sqrt();
        let expected = a / (beta * beta.tanh()) + b / (beta * beta.sinh());
        let value = Builtin::Tdp.impedance(&PORE, omega);
        assert_relative_eq!(value.re, expected.re, max_relative = 1.0e-12);
        assert_relative_eq!(value.im, expected.im, max_relative = 1.0e-12);
    }

    #[test]
    fn cylindrical_diffusion_approaches_planar_at_high_frequency() {
        for omega in [3.0e4, 1.0e6] {
            let cylindrical = Builtin::Tdc.impedance(&PORE, omega);
            let planar = Builtin::Tdp.impedance(&PORE, omega);
            assert!(cylindrical.re.is_finite() && cylindrical.im.is_finite());
            assert_relative_eq!(cylindrical.re, planar.re, max_relative = 1.0e-6);
            assert_relative_eq!(cylindrical.im, planar.im, max_relative = 1.0e-6);
        }
    }

    #[test]
    fn modified_inductance_scales_l_outside_the_power() {
        let (l, alpha) = (2.0e-3, 0.8);
        let value = z(Builtin::La, &[l, alpha]);
        let expected = l * (J * OMEGA).powf(alpha);
        assert_relative_eq!(value.re, expected.re, max_relative = 1.0e-12);
        assert_relative_eq!(value.im, expected.im, max_relative = 1.0e-12);
        let inside = (l * J * OMEGA).powf(alpha);
        assert!((value - inside).norm() > 1.0e-3 * value.norm());
    }

    #[test]
    fn checked_impedance_rejects_wrong_parameter_count() {
        let err = Builtin::Cpe.checked_impedance(&[1.0], OMEGA).unwrap_err();
        assert_eq!(
            err,
            ElementError::ParameterCount { name: "CPE".into(), expected: 2, found: 1 }
        );
    }

    #[test]
    fn default_bounds_cap_phase_exponents() {
        assert_eq!(Builtin::Cpe.default_bounds()[1], (0.0, 1.0));
        assert_eq!(Builtin::La.default_bounds()[1], (0.0, 1.0));
        assert_eq!(Builtin::Zarc.default_bounds()[2].1, Scalar::INFINITY);
    }

    #[test]
    fn element_kind_strips_digits_and_underscores() {
        assert_eq!(element_kind_from_name("CPE1"), "CPE");
        assert_eq!(element_kind_from_name("R_0"), "R");
        assert_eq!(element_kind_from_name("Wo12"), "Wo");
    }

    #[test]
    fn registry_guards_reserved_and_existing_names() {
        let mut registry = ElementRegistry::builtin();
        assert_eq!(registry.len(), Builtin::ALL.len());
        let make = |name: &str| FnElement::new(name, &["Ohm"], |p, _| CScalar::new(p[0], 0.0));

        assert!(matches!(registry.register(make("p"), true), Err(ElementError::Reserved(_))));
        assert!(matches!(registry.register(make("R2"), false), Err(ElementError::InvalidName(_))));
        assert!(matches!(registry.register(make("R"), false), Err(ElementError::AlreadyExists(_))));
        registry.register(make("R"), true).expect("overwrite allowed");
        registry.register(make("Rx"), false).expect("new name");
        assert!(registry.contains("Rx"));
        assert_eq!(registry.resolve("Rx_3").map(|e| e.num_params()), Some(1));
    }
}
