use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use linfa_clippdcd::benchmarks::config;
use linfa_clippdcd::{ClippDcd, Selection};
use ndarray::Array2;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;

fn dual_matrix(n: usize, nfeatures: usize, rng: &mut Xoshiro256Plus) -> Array2<f64> {
    let records = Array2::random_using((n, nfeatures), Uniform::new(-1., 1.), rng);
    records.dot(&records.t()) + Array2::<f64>::eye(n) * 1e-2
}

fn clippdcd_bench(c: &mut Criterion) {
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let sizes = [100, 400, 1000];

    let mut benchmark = c.benchmark_group("clippdcd");
    config::set_default_benchmark_configs(&mut benchmark);

    for &n in &sizes {
        let dual = dual_matrix(n, 10, &mut rng);

        for &(name, selection, cache_rows) in &[
            ("cyclic", Selection::Cyclic, true),
            ("cyclic-uncached", Selection::Cyclic, false),
            ("greedy", Selection::Greedy, true),
        ] {
            let params = ClippDcd::params()
                .selection(selection)
                .cache_rows(cache_rows);

            benchmark.bench_with_input(BenchmarkId::new(name, n), &dual, |b, dual| {
                b.iter(|| params.solve(black_box(dual), 1.0))
            });
        }
    }

    benchmark.finish();
}

criterion_group! {
    name = benches;
    config = config::get_default_profiling_configs();
    targets = clippdcd_bench
}

criterion_main!(benches);
