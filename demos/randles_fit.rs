use eis_circuits::prelude::*;

fn main() -> Result<()> {
    // Randles cell with a CPE double layer, sampled 10 mHz .. 100 kHz.
    let freqs = log_frequencies(1.0e-2, 1.0e5, 10)?;
    let truth = randles(vec![10.0, 50.0, 100.0, 1.0, 1.0e-4, 0.9], true)?;
    let z = truth.predict(&freqs, true)?;

    let mut model = randles(vec![5.0, 20.0, 50.0, 0.5, 5.0e-5, 0.8], true)?;
    let report = model.fit(&freqs, &z, &FitOptions::default())?;
    println!("termination: {:?}, rmse: {:.3e}", report.termination, report.rmse);
    println!("{model}");

    let kk = lin_kk(&freqs, &z, &LinKkOptions::default())?;
    println!("lin-KK: M = {}, mu = {:.3}", kk.m, kk.mu);
    Ok(())
}
