use std::path::Path;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use imagedb::cluster::Clusterer;
use imagedb::linalg::l2_normalized;
use imagedb::{Catalog, ProviderSlot};

const DIM: usize = 512;

fn random_unit(rng: &mut StdRng) -> Vec<f32> {
    loop {
        let v: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
        if let Some(v) = l2_normalized(v) {
            return v;
        }
    }
}

fn catalog(n: usize) -> Catalog {
    let mut rng = StdRng::seed_from_u64(7);
    let mut cat = Catalog::new(DIM);
    for i in 0..n {
        cat.append(format!("uploads/{i:06}.png"), &random_unit(&mut rng))
            .expect("append");
    }
    cat
}

fn bench_search(c: &mut Criterion) {
    let cat = catalog(10_000);
    let mut rng = StdRng::seed_from_u64(11);
    let queries: Vec<Vec<f32>> = (0..64).map(|_| random_unit(&mut rng)).collect();
    let mut next = 0usize;
    c.bench_function("flat_ip/search/10k/top10", |b| {
        b.iter(|| {
            let q = &queries[next % queries.len()];
            next += 1;
            std::hint::black_box(cat.search(q, 10));
        });
    });
}

fn bench_cluster(c: &mut Criterion) {
    let cat = catalog(1_000);
    let slot = ProviderSlot::unavailable(DIM);
    c.bench_function("kmeans/cluster/1k/k5", |b| {
        b.iter(|| {
            let groups = Clusterer::new(&cat, &slot, Path::new(".")).cluster(5);
            std::hint::black_box(groups);
        });
    });
}

criterion_group!(benches, bench_search, bench_cluster);
criterion_main!(benches);
