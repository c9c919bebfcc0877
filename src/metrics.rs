//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "metrics")]
use serde::Serialize;

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use fair_resourcepool::{PoolConfiguration, ResourcePool};
/// use std::sync::Arc;
///
/// let pool = ResourcePool::with_resources(
///     vec![Arc::new(1), Arc::new(2)],
///     PoolConfiguration::new(),
/// );
///
/// let held = pool.acquire().unwrap();
/// let metrics = pool.metrics();
/// assert_eq!(metrics.total_acquired, 1);
/// assert_eq!(metrics.owned_resources, 1);
/// assert_eq!(metrics.available_resources, 1);
/// # pool.release(&held).unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "metrics", derive(Serialize))]
pub struct PoolMetrics {
    /// Resources handed out by acquire
    pub total_acquired: usize,

    /// Resources given back by their owner
    pub total_released: usize,

    /// Resources permanently removed
    pub total_removed: usize,

    /// Successful adds
    pub total_added: usize,

    /// Adds refused because the resource was owned, queued or the pool full
    pub add_rejections: usize,

    /// Timed acquires that came back empty
    pub acquire_timeouts: usize,

    /// Waits ended by cancellation
    pub cancellations: usize,

    /// Releases attempted by somebody other than the owner
    pub foreign_releases: usize,

    /// Current owned resources
    pub owned_resources: usize,

    /// Current available resources
    pub available_resources: usize,

    /// Callers currently blocked in acquire
    pub waiting_acquirers: usize,

    /// Queue capacity, `None` when unbounded
    pub max_capacity: Option<usize>,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("total_removed".to_string(), self.total_removed.to_string());
        metrics.insert("total_added".to_string(), self.total_added.to_string());
        metrics.insert("add_rejections".to_string(), self.add_rejections.to_string());
        metrics.insert("acquire_timeouts".to_string(), self.acquire_timeouts.to_string());
        metrics.insert("cancellations".to_string(), self.cancellations.to_string());
        metrics.insert("foreign_releases".to_string(), self.foreign_releases.to_string());
        metrics.insert("owned_resources".to_string(), self.owned_resources.to_string());
        metrics.insert("available_resources".to_string(), self.available_resources.to_string());
        metrics.insert("waiting_acquirers".to_string(), self.waiting_acquirers.to_string());
        metrics.insert(
            "max_capacity".to_string(),
            self.max_capacity
                .map_or_else(|| "unbounded".to_string(), |capacity| capacity.to_string()),
        );
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use fair_resourcepool::{MetricsExporter, PoolConfiguration, ResourcePool};
    /// use std::collections::HashMap;
    /// use std::sync::Arc;
    ///
    /// let pool = ResourcePool::with_resources(vec![Arc::new(1)], PoolConfiguration::new());
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pool.metrics(), "my_pool", Some(&tags));
    /// assert!(output.contains("resourcepool_resources_available"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        let gauges = [
            ("resources_owned", "Resources currently held", metrics.owned_resources),
            ("resources_available", "Resources ready to acquire", metrics.available_resources),
            ("acquirers_waiting", "Callers blocked in acquire", metrics.waiting_acquirers),
        ];
        let counters = [
            ("acquired_total", "Total resources acquired", metrics.total_acquired),
            ("released_total", "Total resources released", metrics.total_released),
            ("removed_total", "Total resources removed", metrics.total_removed),
            ("added_total", "Total resources added", metrics.total_added),
            ("add_rejections_total", "Rejected adds", metrics.add_rejections),
            ("acquire_timeouts_total", "Timed out acquires", metrics.acquire_timeouts),
            ("cancellations_total", "Cancelled waits", metrics.cancellations),
            ("foreign_releases_total", "Releases by non-owners", metrics.foreign_releases),
        ];

        for (name, help, value) in gauges {
            Self::push(&mut output, &labels, name, "gauge", help, value);
        }
        for (name, help, value) in counters {
            Self::push(&mut output, &labels, name, "counter", help, value);
        }

        output
    }

    fn push(output: &mut String, labels: &str, name: &str, kind: &str, help: &str, value: usize) {
        let name = format!("resourcepool_{}", name);
        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} {}\n", name, kind));
        output.push_str(&format!("{}{{{}}} {}\n", name, labels, value));
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub total_removed: AtomicUsize,
    pub total_added: AtomicUsize,
    pub add_rejections: AtomicUsize,
    pub acquire_timeouts: AtomicUsize,
    pub cancellations: AtomicUsize,
    pub foreign_releases: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(
        &self,
        owned: usize,
        available: usize,
        waiting: usize,
        capacity: Option<usize>,
    ) -> PoolMetrics {
        PoolMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            total_removed: self.total_removed.load(Ordering::Relaxed),
            total_added: self.total_added.load(Ordering::Relaxed),
            add_rejections: self.add_rejections.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            foreign_releases: self.foreign_releases.load(Ordering::Relaxed),
            owned_resources: owned,
            available_resources: available,
            waiting_acquirers: waiting,
            max_capacity: capacity,
        }
    }
}
