//! Pool configuration options

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use fair_resourcepool::PoolConfiguration;
///
/// let config = PoolConfiguration::new()
///     .with_max_pool_size(100)
///     .opened();
///
/// assert_eq!(config.max_pool_size, Some(100));
/// assert!(config.open_on_create);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PoolConfiguration {
    /// Maximum number of resources waiting in the availability queue.
    /// `None` means unbounded.
    pub max_pool_size: Option<usize>,

    /// Whether the pool starts out open
    pub open_on_create: bool,
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the availability queue
    ///
    /// # Examples
    ///
    /// ```
    /// use fair_resourcepool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new()
    ///     .with_max_pool_size(50);
    ///
    /// assert_eq!(config.max_pool_size, Some(50));
    /// ```
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    /// Open the pool as soon as it is created
    pub fn opened(mut self) -> Self {
        self.open_on_create = true;
        self
    }
}
