// Fair Resource Pool
// Thread-safe pool of shared resources with fair blocking acquisition

// This is just a binary wrapper - the actual library is in lib.rs
// Run examples with: cargo run --example basic

use fair_resourcepool::{PoolConfiguration, PoolResult, ResourcePool};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> PoolResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== Fair Resource Pool ===");
    println!("See demos/ directory for usage examples");
    println!("Run: cargo run --example basic");
    println!();

    // Quick demo
    println!("Quick Demo:");
    let pool = ResourcePool::with_resources(vec![Arc::new("conn-1")], PoolConfiguration::default());

    let conn = pool.acquire()?;
    println!("  Got resource: {}", conn);

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || -> PoolResult<()> {
            let conn = pool.acquire()?;
            println!("  Second thread got: {}", conn);
            pool.release(&conn)
        })
    };

    thread::sleep(Duration::from_millis(50));
    println!("  Waiting acquirers: {}", pool.waiting_count());
    pool.release(&conn)?;

    if let Ok(result) = waiter.join() {
        result?;
    }

    pool.close()?;
    println!("  Pool open after close: {}", pool.is_open());
    Ok(())
}
