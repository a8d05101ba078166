use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use tva_core::{BootstrapConfig, WeightNormalization};
use tva_inference::bootstrap::cluster_bootstrap;
use tva_inference::econometrics::FirstDiffTable;
use tva_inference::{doubly_robust, fit_logit, iptw, outcome_regression};

fn synthetic(n: usize, seed: u64) -> FirstDiffTable {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut x = Vec::with_capacity(n);
    let mut d = Vec::with_capacity(n);
    let mut dy = Vec::with_capacity(n);
    for _ in 0..n {
        let row: Vec<f64> = (0..4).map(|_| rng.random_range(0.0..1.0)).collect();
        let eta = -1.0 + 1.2 * row[0] - 0.4 * row[2];
        let di = u8::from(rng.random_bool(1.0 / (1.0 + (-eta).exp())));
        dy.push(0.1 + 0.5 * row[0] - 0.2 * row[3] + 0.3 * f64::from(di));
        x.push(row);
        d.push(di);
    }
    let county = (0..n).map(|i| format!("{i:05}")).collect();
    let names = (1..=4).map(|j| format!("x{j}")).collect();
    FirstDiffTable::from_parts(county, d, names, x, dy).unwrap()
}

fn bench_estimators(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimators");
    for &n in &[1_000usize, 10_000] {
        let t = synthetic(n, 42);
        group.bench_with_input(BenchmarkId::new("outcome_regression", n), &t, |b, t| {
            b.iter(|| black_box(outcome_regression(black_box(t)).unwrap().att))
        });
        group.bench_with_input(BenchmarkId::new("logit", n), &t, |b, t| {
            b.iter(|| black_box(fit_logit(black_box(&t.x), &t.treated).unwrap().iterations))
        });
        group.bench_with_input(BenchmarkId::new("iptw", n), &t, |b, t| {
            b.iter(|| black_box(iptw(black_box(t), 0.99, WeightNormalization::Hajek).unwrap().att))
        });
        group.bench_with_input(BenchmarkId::new("doubly_robust", n), &t, |b, t| {
            b.iter(|| {
                black_box(doubly_robust(black_box(t), 0.99, WeightNormalization::Hajek).unwrap().att)
            })
        });
    }
    group.finish();
}

fn bench_bootstrap(c: &mut Criterion) {
    let t = synthetic(1_000, 7);
    let cfg = BootstrapConfig { replicates: 100, seed: 1 };
    c.bench_function("cluster_bootstrap_or_100", |b| {
        b.iter(|| {
            black_box(
                cluster_bootstrap(&t, &cfg, 0.95, |d| Ok(outcome_regression(d)?.att)).unwrap().se,
            )
        })
    });
}

criterion_group!(benches, bench_estimators, bench_bootstrap);
criterion_main!(benches);
