use criterion::{Criterion, criterion_group, criterion_main};
use fair_resourcepool::{PoolConfiguration, ResourcePool};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

fn acquire_release(c: &mut Criterion) {
    let pool = ResourcePool::with_resources(
        (0..16).map(Arc::new).collect(),
        PoolConfiguration::default(),
    );

    c.bench_function("acquire_release_uncontended", |b| {
        b.iter(|| {
            let resource = pool.acquire().unwrap();
            black_box(*resource);
            pool.release(&resource).unwrap();
        })
    });
}

fn contended(c: &mut Criterion) {
    const THREADS: usize = 4;
    const ROUNDS: usize = 100;

    let pool = ResourcePool::with_resources(
        (0..2).map(Arc::new).collect(),
        PoolConfiguration::default(),
    );

    c.bench_function("acquire_release_4_threads_2_resources", |b| {
        b.iter(|| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    let pool = pool.clone();
                    thread::spawn(move || {
                        for _ in 0..ROUNDS {
                            let resource = pool.acquire().unwrap();
                            black_box(*resource);
                            pool.release(&resource).unwrap();
                        }
                    })
                })
                .collect();

            for worker in workers {
                worker.join().unwrap();
            }
        })
    });
}

fn add_remove(c: &mut Criterion) {
    let pool = ResourcePool::new(PoolConfiguration::new().opened());

    c.bench_function("add_remove", |b| {
        b.iter(|| {
            let resource = Arc::new(black_box(7u64));
            pool.add(Arc::clone(&resource)).unwrap();
            pool.remove(&resource).unwrap();
        })
    });
}

criterion_group!(benches, acquire_release, contended, add_remove);
criterion_main!(benches);
