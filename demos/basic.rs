//! Basic usage examples for ResourcePool

use fair_resourcepool::{CancellationToken, PoolConfiguration, PoolError, ResourcePool};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    println!("=== Fair Resource Pool - Basic Examples ===\n");

    // Example 1: Acquire and release
    simple_pool();

    // Example 2: Ownership rules
    ownership();

    // Example 3: Timeouts and cancellation
    timeouts_and_cancellation();

    // Example 4: Removing and closing
    remove_and_close();

    // Example 5: Metrics
    metrics();
}

fn simple_pool() {
    println!("1. Simple Pool:");
    let pool = ResourcePool::new(PoolConfiguration::new());
    pool.open().unwrap();

    pool.add(Arc::new("conn-1")).unwrap();
    pool.add(Arc::new("conn-2")).unwrap();

    let conn = pool.acquire().unwrap();
    println!("   Got resource: {}", conn);
    println!("   Available while held: {}", pool.available_count());

    pool.release(&conn).unwrap();
    println!("   Available after release: {}\n", pool.available_count());
}

fn ownership() {
    println!("2. Ownership:");
    let pool = ResourcePool::with_resources(vec![Arc::new("conn")], PoolConfiguration::default());
    let conn = pool.acquire().unwrap();

    let other = pool.clone();
    let stolen = Arc::clone(&conn);
    thread::spawn(move || other.release(&stolen).unwrap())
        .join()
        .unwrap();
    println!("   Still owned after foreign release: {}", pool.is_owned(&conn));
    println!("   Re-adding an owned resource: {}", pool.add(Arc::clone(&conn)).unwrap());

    pool.release(&conn).unwrap();
    println!("   Owned after own release: {}\n", pool.is_owned(&conn));
}

fn timeouts_and_cancellation() {
    println!("3. Timeouts and Cancellation:");
    let pool = ResourcePool::<u32>::new(PoolConfiguration::new().opened());

    let waited = pool.acquire_timeout(Duration::from_millis(20)).unwrap();
    println!("   Timed acquire on empty pool: {:?}", waited);

    let token = CancellationToken::new();
    let canceller = token.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        canceller.cancel();
    });

    let cancelled = pool.acquire_cancellable(&token);
    handle.join().unwrap();
    println!("   Cancelled acquire: {:?}\n", cancelled);
    assert_eq!(cancelled, Err(PoolError::Cancelled));
}

fn remove_and_close() {
    println!("4. Remove and Close:");
    let pool = ResourcePool::with_resources(
        vec![Arc::new(1), Arc::new(2), Arc::new(3)],
        PoolConfiguration::default(),
    );

    let held = pool.acquire().unwrap();
    let remover = {
        let pool = pool.clone();
        let held = Arc::clone(&held);
        thread::spawn(move || pool.remove(&held).unwrap())
    };

    thread::sleep(Duration::from_millis(20));
    pool.release(&held).unwrap();
    println!("   Removed after release: {}", remover.join().unwrap());
    println!("   Still known: {}", pool.contains(&held));

    pool.close().unwrap();
    println!("   Acquire after close: {:?}\n", pool.acquire().err());
}

fn metrics() {
    println!("5. Metrics:");
    let pool = ResourcePool::with_resources(
        vec![Arc::new(1), Arc::new(2)],
        PoolConfiguration::default(),
    );

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    pool.release(&a).unwrap();
    pool.release(&b).unwrap();

    let metrics = pool.export_metrics();
    let mut keys: Vec<_> = metrics.keys().collect();
    keys.sort();
    for key in keys {
        println!("     {}: {}", key, metrics[key]);
    }

    println!();
    print!("{}", pool.export_metrics_prometheus("demo", None));
}
