//! # Fair Resource Pool
//!
//! Thread-safe pool of reusable, caller-supplied resources that many
//! threads borrow, use exclusively and hand back.
//!
//! ## Features
//!
//! - Blocking, timed and cancellable acquisition, served first come first served
//! - Ownership tracking: only the caller that acquired a resource can release it
//! - Adding resources at any time, removing them permanently (waiting for
//!   the holder if needed)
//! - Graceful close that drains held resources, and an immediate close
//! - Async wrappers for tokio tasks, with ownership following the task
//! - Metrics with Prometheus text export
//! - Structured logging through `tracing`
//!
//! ## Quick Start
//!
//! ```rust
//! use fair_resourcepool::{PoolConfiguration, ResourcePool};
//! use std::sync::Arc;
//!
//! let pool = ResourcePool::with_resources(
//!     vec![Arc::new("conn-1"), Arc::new("conn-2")],
//!     PoolConfiguration::default(),
//! );
//!
//! let conn = pool.acquire().unwrap();
//! println!("Got: {}", conn);
//! pool.release(&conn).unwrap();
//!
//! pool.close().unwrap();
//! ```

mod cancel;
mod config;
mod errors;
mod metrics;
mod owner;
mod ownership;
mod pool;
mod queue;

pub use tokio_util::sync::CancellationToken;
pub use config::PoolConfiguration;
pub use errors::{PoolError, PoolResult};
pub use metrics::{MetricsExporter, PoolMetrics};
pub use owner::OwnerId;
pub use pool::{PoolState, ResourcePool};
