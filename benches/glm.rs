use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use linfa::prelude::*;
use linfa_glm::{Family, Glm, SparseGlm};
use ndarray::{Array1, Array2, Ix1};
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;
use sprs::{CsMat, TriMat};

const N_FEATURES: usize = 20;

fn binomial_dataset(nsamples: usize) -> Dataset<f64, f64, Ix1> {
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let x = Array2::random_using((nsamples, N_FEATURES), Uniform::new(-1., 1.), &mut rng);
    let weights = Array1::random_using(N_FEATURES, Uniform::new(-2., 2.), &mut rng);
    let y = x
        .dot(&weights)
        .mapv(|z| if rng.gen::<f64>() < linfa_glm::link::inverse_logit(z) { 1. } else { 0. });
    Dataset::new(x, y)
}

fn sparse_records(nsamples: usize) -> (CsMat<f64>, Array1<f64>) {
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let mut x = TriMat::new((nsamples, N_FEATURES));
    for i in 0..nsamples {
        for j in 0..N_FEATURES {
            if rng.gen::<f64>() < 0.1 {
                x.add_triplet(i, j, rng.gen_range(-1.0..1.0));
            }
        }
    }
    let y = Array1::from_shape_fn(nsamples, |_| if rng.gen::<bool>() { 1. } else { 0. });
    (x.to_csr(), y)
}

fn bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("Glm");
    group.sample_size(10);
    for nsamples in [1_000, 10_000] {
        let dataset = binomial_dataset(nsamples);
        group.bench_with_input(
            BenchmarkId::new("irls_inversion", nsamples),
            &dataset,
            |b, dataset| {
                b.iter(|| Glm::ridge(Family::Binomial, 1.).fit(dataset).unwrap());
            },
        );
        group.bench_with_input(
            BenchmarkId::new("irls_coordinate_descent", nsamples),
            &dataset,
            |b, dataset| {
                b.iter(|| Glm::lasso(Family::Binomial, 1.).fit(dataset).unwrap());
            },
        );

        let (x, y) = sparse_records(nsamples);
        group.bench_with_input(
            BenchmarkId::new("lbfgsb_sparse", nsamples),
            &(x, y),
            |b, (x, y)| {
                b.iter(|| {
                    SparseGlm::params()
                        .l2_penalty(1.)
                        .fit_design(x, y.view(), None)
                        .unwrap()
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench);
criterion_main!(benches);
