//! Engine configuration

use std::time::Duration;

use crate::fetch::DEFAULT_PAGE_SIZE;

/// Configuration for a [`Tree`](crate::tree::Tree).
///
/// # Example
///
/// ```
/// use canopy_lib::config::TreeConfig;
///
/// let config = TreeConfig::default().with_page_size(50);
/// assert_eq!(config.page_size, 50);
/// ```
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Children requested per page.
    ///
    /// Default: 10
    pub page_size: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl TreeConfig {
    /// Creates a new tree config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size (at least 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Timer intervals for the [`PollScheduler`](crate::poll::PollScheduler).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use canopy_lib::config::PollConfig;
///
/// let config = PollConfig::default()
///     .with_active_interval(Duration::from_secs(2))
///     .with_idle_interval(Duration::from_secs(20));
/// ```
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Interval between ticks while work is in progress.
    ///
    /// Default: 5 seconds
    pub active_interval: Duration,

    /// Interval before the confirmatory tick once everything looks done.
    ///
    /// Default: 15 seconds
    pub idle_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(5),
            idle_interval: Duration::from_secs(15),
        }
    }
}

impl PollConfig {
    /// Creates a new poll config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the active interval.
    pub fn with_active_interval(mut self, interval: Duration) -> Self {
        self.active_interval = interval;
        self
    }

    /// Sets the idle interval.
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }
}
