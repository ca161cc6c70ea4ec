use std::collections::BTreeMap;

use crate::circuits::Circuit;
use crate::math::Scalar;

use super::{Bounds, FitError};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Entry {
    Free(usize),
    Fixed(Scalar),
}

/// Maps the free parameters being optimised onto the full circuit parameter
/// vector, filling in held constants by name.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterLayout {
    entries: Vec<Entry>,
    free: usize,
}

impl ParameterLayout {
    /// Builds the layout for `circuit` with the named `constants` held fixed.
    pub fn new(circuit: &Circuit, constants: &BTreeMap<String, Scalar>) -> Result<Self, FitError> {
        let names = circuit.parameter_names();
        if let Some(unknown) = constants.keys().find(|k| !names.contains(*k)) {
            return Err(FitError::UnknownConstant(unknown.clone()));
        }
        let mut free = 0;
        let mut entries = Vec::with_capacity(names.len());
        for name in &names {
            match constants.get(name) {
                Some(&value) if !value.is_finite() => {
                    return Err(FitError::Data(format!("constant {name} = {value} is not finite")));
                }
                Some(&value) => entries.push(Entry::Fixed(value)),
                None => {
                    entries.push(Entry::Free(free));
                    free += 1;
                }
            }
        }
        Ok(Self { entries, free })
    }

    /// Number of free parameters.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free
    }

    /// Full parameter vector for a given set of free values.
    #[must_use]
    pub fn expand(&self, free: &[Scalar]) -> Vec<Scalar> {
        self.entries
            .iter()
            .map(|e| match *e {
                Entry::Free(i) => free[i],
                Entry::Fixed(v) => v,
            })
            .collect()
    }

    /// Keeps the items that correspond to free parameters.
    #[must_use]
    pub fn select_free<T: Clone>(&self, all: &[T]) -> Vec<T> {
        self.entries
            .iter()
            .zip(all)
            .filter(|(e, _)| matches!(e, Entry::Free(_)))
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Element default bounds restricted to the free parameters.
    #[must_use]
    pub fn default_bounds(&self, circuit: &Circuit) -> Bounds {
        let (lower, upper) = self.select_free(&circuit.default_bounds()).into_iter().unzip();
        Bounds { lower, upper }
    }
}
