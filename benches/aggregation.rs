use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tessera_fl::aggregators::{compute_center, CenterConfig, OutlierPolicy};
use tessera_fl::{aggregate, detect_outliers, reconstruct, share, ModelVector, SharedSecret};

fn batch(n_clients: usize, n_params: usize) -> Vec<ModelVector> {
    (0..n_clients)
        .map(|i| ModelVector::new((0..n_params).map(|j| ((i * n_params + j) as f32).sin()).collect()))
        .collect()
}

fn bench_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation");
    let config = CenterConfig::default();
    let policy = OutlierPolicy::default();

    for &n_clients in &[10, 50, 100] {
        for &n_params in &[1_000usize, 100_000] {
            let updates = batch(n_clients, n_params);
            let center = compute_center(&updates, None, &config).unwrap().vector;
            let id = format!("{}c_{}p", n_clients, n_params);

            group.bench_with_input(
                BenchmarkId::new("geometric_center", &id),
                &updates,
                |b, updates| b.iter(|| compute_center(updates, None, &config).unwrap()),
            );

            group.bench_with_input(
                BenchmarkId::new("warm_center", &id),
                &updates,
                |b, updates| b.iter(|| compute_center(updates, Some(&center), &config).unwrap()),
            );

            group.bench_with_input(
                BenchmarkId::new("detect_outliers", &id),
                &updates,
                |b, updates| b.iter(|| detect_outliers(updates, &center, &policy).unwrap()),
            );

            group.bench_with_input(
                BenchmarkId::new("mean", &id),
                &updates,
                |b, updates| b.iter(|| aggregate(updates).unwrap()),
            );
        }
    }
    group.finish();
}

fn bench_sharing(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharing");
    let secret = SharedSecret::random();

    for &(n, t) in &[(5usize, 3usize), (50, 26), (255, 128)] {
        let id = format!("{}of{}", t, n);
        group.bench_function(BenchmarkId::new("share", &id), |b| {
            b.iter(|| share(&secret, n, t).unwrap())
        });

        let shares = share(&secret, n, t).unwrap();
        group.bench_function(BenchmarkId::new("reconstruct", &id), |b| {
            b.iter(|| reconstruct(&shares[..t], t).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_aggregation, bench_sharing);
criterion_main!(benches);
