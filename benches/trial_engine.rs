// benches/trial_engine.rs

use bb84_link_sim::bb84_protocol::TrialEngine;
use bb84_link_sim::config::{SiftingPolicy, SimulationConfig};
use bb84_link_sim::rng::RandomSource;
use bb84_link_sim::skr::{AnalyticSolver, KeyRateParams};
use bb84_link_sim::turbulence::{AtmosphericChannel, AtmosphericGeometry};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn benchmark_trial_loop(c: &mut Criterion) {
    c.bench_function("metro_fiber_10k_trials", |b| {
        let engine = TrialEngine::new(SimulationConfig::metro_fiber(SiftingPolicy::BasisOnly)).unwrap();
        let mut rng = RandomSource::seeded(1);
        b.iter(|| engine.run(black_box(10_000), &mut rng).unwrap());
    });

    c.bench_function("metro_fiber_100k_trials_chunked", |b| {
        let engine = TrialEngine::new(SimulationConfig::metro_fiber(SiftingPolicy::BasisOnly)).unwrap();
        b.iter(|| engine.run_parallel(black_box(100_000), 7).unwrap());
    });

    c.bench_function("free_space_10k_trials", |b| {
        let engine = TrialEngine::new(SimulationConfig::free_space(SiftingPolicy::BasisOnly)).unwrap();
        let mut rng = RandomSource::seeded(2);
        b.iter(|| engine.run(black_box(10_000), &mut rng).unwrap());
    });
}

fn benchmark_turbulence(c: &mut Criterion) {
    let channel = AtmosphericChannel::new(AtmosphericGeometry::default()).unwrap();
    let params = channel.prepare_parameters(30.0).unwrap();

    c.bench_function("f_eta", |b| b.iter(|| params.pdf(black_box(0.02))));

    c.bench_function("prepare_parameters_uncached", |b| {
        b.iter(|| {
            AtmosphericChannel::new(AtmosphericGeometry::default())
                .unwrap()
                .prepare_parameters(black_box(30.0))
                .unwrap()
        })
    });

    c.bench_function("secure_key_rate", |b| {
        let solver = AnalyticSolver::new(AtmosphericGeometry::default()).unwrap();
        let rate = KeyRateParams::default();
        b.iter(|| solver.secure_key_rate(&rate, black_box(30.0)).unwrap());
    });
}

criterion_group!(benches, benchmark_trial_loop, benchmark_turbulence);
criterion_main!(benches);
