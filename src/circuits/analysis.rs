use std::io::{self, Write};

use crate::errors::Result;
use crate::math::{CScalar, Scalar};

use super::network::Circuit;

/// Result of evaluating a circuit at a single frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyPoint {
    /// Linear frequency in Hz.
    pub frequency: Scalar,
    /// Complex impedance in ohms.
    pub impedance: CScalar,
}

impl FrequencyPoint {
    /// Pairs frequencies with impedances of the same length.
    #[must_use]
    pub fn zip(freqs: &[Scalar], impedances: &[CScalar]) -> Vec<Self> {
        freqs
            .iter()
            .zip(impedances)
            .map(|(&frequency, &impedance)| Self { frequency, impedance })
            .collect()
    }
}

/// Computes the impedance of `circuit` with parameters `params` across the
/// provided frequencies (Hz).
pub fn sweep_circuit_impedance(
    circuit: &Circuit,
    params: &[Scalar],
    freqs: &[Scalar],
) -> Result<Vec<FrequencyPoint>> {
    let z = circuit.impedance(params, freqs)?;
    Ok(FrequencyPoint::zip(freqs, &z))
}

/// Writes `FrequencyPoint` vector to a CSV writer.
pub fn write_frequency_points_csv<W: Write>(mut w: W, points: &[FrequencyPoint]) -> io::Result<()> {
    writeln!(w, "frequency,ReZ,ImZ")?;
    for p in points {
        writeln!(w, "{:.16e},{:.16e},{:.16e}", p.frequency, p.impedance.re, p.impedance.im)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn sweep_returns_one_point_per_frequency() {
        let circuit = Circuit::parse("R0").expect("valid");
        let data = sweep_circuit_impedance(&circuit, &[50.0], &[100.0, 1_000.0, 10_000.0])
            .expect("valid sweep");
        assert_eq!(data.len(), 3);
        for p in data {
            assert_relative_eq!(p.impedance.re, 50.0, epsilon = 1.0e-12);
        }
    }

    #[test]
    fn csv_has_header_and_rows() {
        let points = [FrequencyPoint { frequency: 10.0, impedance: CScalar::new(1.0, -2.0) }];
        let mut out = Vec::new();
        write_frequency_points_csv(&mut out, &points).expect("in-memory write");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "frequency,ReZ,ImZ");
        assert!(lines[1].starts_with("1.0000000000000000e1,"));
        assert_eq!(lines.len(), 2);
    }
}
