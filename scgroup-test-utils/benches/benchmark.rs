use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::Array;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use scgroup::*;
use scgroup_test_utils::{rand_csr, uri_in, with_tmp_dir};
use scgroup_zarr::Zarr;
use std::hint::black_box;

fn names(prefix: &str, n: usize) -> DataFrameIndex {
    (0..n).map(|i| format!("{}_{}", prefix, i)).collect()
}

fn bench_ingest(n_obs: usize, n_vars: usize, c: &mut Criterion) {
    with_tmp_dir(|dir| {
        let dense = Dataset::new(
            Array::random((n_obs, n_vars), Uniform::new(0f32, 100f32)).into(),
            names("c", n_obs),
            names("g", n_vars),
        )
        .unwrap();
        let sparse = Dataset::new(
            rand_csr(n_obs, n_vars, n_obs * n_vars / 10, 1.0, 100.0).into(),
            names("c", n_obs),
            names("g", n_vars),
        )
        .unwrap();

        let mut i = 0;
        c.bench_function(&format!("Ingest dense {} x {} (Zarr)", n_obs, n_vars), |b| {
            b.iter(|| {
                i += 1;
                let group = SCGroup::<Zarr>::new(&uri_in(&dir, &format!("d{}", i)), false, None);
                group.unwrap().from_anndata(black_box(&dense)).unwrap()
            })
        });
        c.bench_function(&format!("Ingest sparse {} x {} (Zarr)", n_obs, n_vars), |b| {
            b.iter(|| {
                i += 1;
                let group = SCGroup::<Zarr>::new(&uri_in(&dir, &format!("s{}", i)), false, None);
                group.unwrap().from_anndata(black_box(&sparse)).unwrap()
            })
        });
    })
}

fn bench_ingest_100(c: &mut Criterion) {
    bench_ingest(100, 100, c);
}

fn bench_ingest_1000(c: &mut Criterion) {
    bench_ingest(1000, 200, c);
}

criterion_group!(benches, bench_ingest_100, bench_ingest_1000);
criterion_main!(benches);
