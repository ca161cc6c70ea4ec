//! Loading and trimming measured spectra.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::errors::{EisError, Result};
use crate::math::{CScalar, Scalar};

/// Reads a three column `frequency, Z_real, Z_imag` CSV file.
pub fn read_csv(path: impl AsRef<Path>) -> Result<(Vec<Scalar>, Vec<CScalar>)> {
    let path = path.as_ref();
    let (freqs, z) = read_csv_from_reader(File::open(path)?)?;
    tracing::debug!(path = %path.display(), points = freqs.len(), "loaded spectrum");
    Ok((freqs, z))
}

/// Reads spectrum rows from any reader. A first row that does not parse as
/// numbers is treated as a header; lines starting with `#` are skipped.
pub fn read_csv_from_reader<R: Read>(reader: R) -> Result<(Vec<Scalar>, Vec<CScalar>)> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut freqs = Vec::new();
    let mut z = Vec::new();
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        match parse_row(&record) {
            Some((f, value)) => {
                freqs.push(f);
                z.push(value);
            }
            None if row == 0 => continue,
            None => {
                let line = record.position().map_or(row + 1, |p| p.line() as usize);
                return Err(EisError::InvalidData(format!(
                    "line {line}: expected frequency, Z_real, Z_imag but got {:?}",
                    record.iter().collect::<Vec<_>>()
                )));
            }
        }
    }
    if freqs.is_empty() {
        return Err(EisError::InvalidData("no data rows found".into()));
    }
    Ok((freqs, z))
}

fn parse_row(record: &StringRecord) -> Option<(Scalar, CScalar)> {
    if record.len() < 3 {
        return None;
    }
    let mut values = record.iter().take(3).map(|v| v.parse::<Scalar>().ok());
    let f = values.next()??;
    let re = values.next()??;
    let im = values.next()??;
    Some((f, CScalar::new(re, im)))
}

/// Drops points whose imaginary impedance is non-negative (inductive region).
#[must_use]
pub fn ignore_below_x(freqs: &[Scalar], z: &[CScalar]) -> (Vec<Scalar>, Vec<CScalar>) {
    freqs.iter().zip(z).filter(|(_, v)| v.im < 0.0).map(|(f, v)| (*f, *v)).unzip()
}

/// Keeps points with `freq_min <= f <= freq_max`; either bound may be absent.
#[must_use]
pub fn crop_frequencies(
    freqs: &[Scalar],
    z: &[CScalar],
    freq_min: Option<Scalar>,
    freq_max: Option<Scalar>,
) -> (Vec<Scalar>, Vec<CScalar>) {
    freqs
        .iter()
        .zip(z)
        .filter(|(f, _)| freq_min.map_or(true, |lo| **f >= lo) && freq_max.map_or(true, |hi| **f <= hi))
        .map(|(f, v)| (*f, *v))
        .unzip()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn reads_headerless_and_headed_files() {
        let plain = "1000,10.5,-0.2\n100, 12.0, -3.5\n";
        let (f, z) = read_csv_from_reader(plain.as_bytes()).expect("numeric rows");
        assert_eq!(f, vec![1000.0, 100.0]);
        assert_relative_eq!(z[1].im, -3.5);

        let headed = "# exported by potentiostat\nfreq,re,im\n1e3,1,-1\n";
        let (f, z) = read_csv_from_reader(headed.as_bytes()).expect("header skipped");
        assert_eq!(f, vec![1000.0]);
        assert_relative_eq!(z[0].re, 1.0);
    }

    #[test]
    fn rejects_malformed_rows() {
        let bad = "1,2,3\n4,oops,6\n";
        assert!(matches!(read_csv_from_reader(bad.as_bytes()), Err(EisError::InvalidData(_))));
        assert!(read_csv_from_reader("f,re,im\n".as_bytes()).is_err());
    }

    #[test]
    fn filters_keep_pairs_aligned() {
        let f = [1000.0, 100.0, 10.0, 1.0];
        let z = [
            CScalar::new(1.0, 0.5),
            CScalar::new(2.0, -0.5),
            CScalar::new(3.0, -1.0),
            CScalar::new(4.0, -2.0),
        ];
        let (kf, kz) = ignore_below_x(&f, &z);
        assert_eq!(kf, vec![100.0, 10.0, 1.0]);
        assert_relative_eq!(kz[0].re, 2.0);

        let (cf, cz) = crop_frequencies(&f, &z, Some(10.0), Some(100.0));
        assert_eq!(cf, vec![100.0, 10.0]);
        assert_eq!(cz.len(), 2);
        assert_eq!(crop_frequencies(&f, &z, None, Some(1.0)).0, vec![1.0]);
    }
}
