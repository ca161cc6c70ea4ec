use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use eis_circuits::circuits::{sweep_circuit_impedance, Circuit, FrequencyPoint};
use eis_circuits::circuits::analysis::write_frequency_points_csv;
use eis_circuits::config::FitConfig;
use eis_circuits::logging;
use eis_circuits::preprocessing::{crop_frequencies, ignore_below_x, read_csv};
use eis_circuits::sweep::log_frequencies;
use eis_circuits::validation::{lin_kk, LinKkFitType, LinKkOptions, LinKkResult};

#[derive(Parser)]
#[command(name = "eisfit")]
#[command(about = "Fit equivalent circuits to impedance spectra")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fit a circuit as described by a TOML job file
    Fit {
        /// Path to the TOML configuration
        #[arg(short, long, default_value = "fit.toml")]
        config: PathBuf,
    },
    /// Evaluate a circuit over a log-spaced frequency grid
    Simulate {
        /// Circuit string, e.g. "R0-p(R1,C1)"
        #[arg(long)]
        circuit: String,
        /// Comma separated parameter values
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        params: Vec<f64>,
        #[arg(long, default_value_t = 1.0e-2)]
        freq_min: f64,
        #[arg(long, default_value_t = 1.0e5)]
        freq_max: f64,
        #[arg(long, default_value_t = 10)]
        points_per_decade: usize,
        /// Write CSV here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the lin-KK test on measured data
    Validate {
        /// CSV with frequency, Z_real, Z_imag columns
        #[arg(short, long)]
        data: PathBuf,
        /// Over-fitting threshold on mu [default: 0.85]
        #[arg(long, conflicts_with = "fixed_m")]
        c: Option<f64>,
        /// Fit exactly max_m elements instead of searching on mu
        #[arg(long)]
        fixed_m: bool,
        #[arg(long, default_value_t = 50)]
        max_m: usize,
        #[arg(long, value_enum, default_value_t = LinKkFitType::Complex)]
        fit_type: LinKkFitType,
        /// Add a series capacitance to the test circuit
        #[arg(long)]
        add_cap: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_cli_logger(args.verbose);

    match args.command {
        Command::Fit { config } => run_fit(config),
        Command::Simulate { circuit, params, freq_min, freq_max, points_per_decade, output } => {
            run_simulate(&circuit, &params, freq_min, freq_max, points_per_decade, output)
        }
        Command::Validate { data, c, fixed_m, max_m, fit_type, add_cap } => {
            let (freqs, z) = read_csv(&data).with_context(|| format!("reading {}", data.display()))?;
            let options = LinKkOptions { c: mu_threshold(c, fixed_m), max_m, fit_type, add_cap };
            let result = lin_kk(&freqs, &z, &options)?;
            print_lin_kk(&result);
            Ok(())
        }
    }
}

fn mu_threshold(c: Option<f64>, fixed_m: bool) -> Option<f64> {
    if fixed_m {
        None
    } else {
        c.or(LinKkOptions::default().c)
    }
}

fn run_fit(path: PathBuf) -> Result<()> {
    tracing::info!(config = %path.display(), "loading fit configuration");
    let config = FitConfig::from_file(&path).with_context(|| format!("loading {}", path.display()))?;

    let (freqs, z) = read_csv(&config.data.path)
        .with_context(|| format!("reading {}", config.data.path.display()))?;
    let (freqs, z) = crop_frequencies(&freqs, &z, config.data.freq_min, config.data.freq_max);
    let (freqs, z) = if config.data.ignore_below_x { ignore_below_x(&freqs, &z) } else { (freqs, z) };
    if freqs.is_empty() {
        bail!("no data points left after preprocessing");
    }
    tracing::info!(points = freqs.len(), "spectrum ready");

    if let Some(options) = &config.validation {
        let result = lin_kk(&freqs, &z, options)?;
        print_lin_kk(&result);
    }

    let mut model = config.model()?;
    let report = model.fit(&freqs, &z, &config.fit)?.clone();
    println!("{model}");
    println!("cost = {:.4e}, rmse = {:.4e}, evaluations = {}", report.cost, report.rmse, report.evaluations);

    if let Some(out) = &config.output.model {
        model.save(out).with_context(|| format!("writing {}", out.display()))?;
        tracing::info!(path = %out.display(), "model saved");
    }
    if let Some(out) = &config.output.predictions {
        let z_fit = model.predict(&freqs, false)?;
        let file = File::create(out).with_context(|| format!("creating {}", out.display()))?;
        write_frequency_points_csv(BufWriter::new(file), &FrequencyPoint::zip(&freqs, &z_fit))?;
        tracing::info!(path = %out.display(), "predictions saved");
    }
    Ok(())
}

fn run_simulate(
    circuit: &str,
    params: &[f64],
    freq_min: f64,
    freq_max: f64,
    points_per_decade: usize,
    output: Option<PathBuf>,
) -> Result<()> {
    let circuit = Circuit::parse(circuit)?;
    let freqs = log_frequencies(freq_min, freq_max, points_per_decade)?;
    let points = sweep_circuit_impedance(&circuit, params, &freqs)?;
    match output {
        Some(path) => {
            let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            let mut w = BufWriter::new(file);
            write_frequency_points_csv(&mut w, &points)?;
            w.flush()?;
        }
        None => write_frequency_points_csv(io::stdout().lock(), &points)?,
    }
    Ok(())
}

fn print_lin_kk(result: &LinKkResult) {
    let worst = result
        .residuals_real
        .iter()
        .chain(&result.residuals_imag)
        .fold(0.0_f64, |acc, r| acc.max(r.abs()));
    println!("lin-KK: M = {}, mu = {:.4}, max |residual| = {:.3e}", result.m, result.mu, worst);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_options(argv: &[&str]) -> LinKkOptions {
        let args = Args::try_parse_from(argv).expect("valid arguments");
        match args.command {
            Command::Validate { c, fixed_m, max_m, fit_type, add_cap, .. } => {
                LinKkOptions { c: mu_threshold(c, fixed_m), max_m, fit_type, add_cap }
            }
            _ => panic!("expected validate"),
        }
    }

    #[test]
    fn validate_threshold_defaults_and_can_be_disabled() {
        assert_eq!(validate_options(&["eisfit", "validate", "-d", "x.csv"]).c, Some(0.85));
        assert_eq!(validate_options(&["eisfit", "validate", "-d", "x.csv", "--c", "0.7"]).c, Some(0.7));
        let fixed = validate_options(&["eisfit", "validate", "-d", "x.csv", "--fixed-m", "--max-m", "12"]);
        assert_eq!((fixed.c, fixed.max_m), (None, 12));
        assert!(Args::try_parse_from(["eisfit", "validate", "-d", "x.csv", "--c", "0.7", "--fixed-m"]).is_err());
    }
}
