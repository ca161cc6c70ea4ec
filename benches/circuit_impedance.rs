use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use eis_circuits::circuits::Circuit;
use eis_circuits::fitting::{circuit_fit, FitOptions};
use eis_circuits::sweep::log_frequencies;

const RANDLES: &str = "R0-p(R1-Wo1,CPE1)";
const TRUTH: [f64; 6] = [10.0, 50.0, 100.0, 1.0, 1.0e-4, 0.9];

fn bench_circuit_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_sweep");
    let freqs = log_frequencies(1.0e-2, 1.0e5, 100).expect("valid range");
    let circuit = Circuit::parse(RANDLES).expect("valid circuit");

    group.bench_function(BenchmarkId::new("randles_cpe", freqs.len()), |b| {
        b.iter(|| circuit.impedance(&TRUTH, &freqs))
    });
    group.bench_function("parse", |b| b.iter(|| Circuit::parse("R0-p(R1,C1)-p(R2-Wo1,C2)-L0")));
    group.finish();
}

fn bench_fit(c: &mut Criterion) {
    let freqs = log_frequencies(1.0e-2, 1.0e5, 10).expect("valid range");
    let circuit = Circuit::parse(RANDLES).expect("valid circuit");
    let z = circuit.impedance(&TRUTH, &freqs).expect("valid parameters");
    let guess = [8.0, 40.0, 80.0, 2.0, 2.0e-4, 0.8];

    c.bench_function("fit_randles_cpe", |b| {
        b.iter_batched(
            BTreeMap::new,
            |constants| circuit_fit(&circuit, &freqs, &z, &guess, &constants, &FitOptions::default()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_circuit_sweep, bench_fit);
criterion_main!(benches);
