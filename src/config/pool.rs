//! Pool configuration.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ConfigError;

/// Default time to wait for the exclusive pool lock during a flush.
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(300);

/// Default pool size by host CPU count.
///
/// Interpreter workers are memory-heavy; the curve flattens at four
/// regardless of how many cores the host has.
pub fn default_pool_size(cpus: usize) -> usize {
    match cpus {
        0..=2 => 1,
        3 => 2,
        4 => 3,
        _ => 4,
    }
}

/// Configuration record for a worker pool.
///
/// All values are resolved at construction time; accessors are
/// zero-cost. Lifecycle hooks are supplied separately when the pool
/// context is built.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Package storage path handed to the create hook.
    gem_home: Option<PathBuf>,
    /// Ordered code-loading paths handed to the create hook.
    ruby_load_path: Vec<PathBuf>,
    /// Resolved pool size (never zero).
    pool_size: NonZeroUsize,
    /// Time to wait for the exclusive pool lock.
    flush_timeout: Duration,
    /// Advisory startup-jitter flag for refill construction.
    splay_instance_flush: bool,
    /// Requests served before a worker is due for replacement (0 = never).
    max_requests_per_instance: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfig {
    /// Creates a configuration with defaults: pool size from the CPU
    /// heuristic, a five minute flush timeout, no splay, no per-instance
    /// request limit.
    pub fn new() -> Self {
        let size = default_pool_size(num_cpus::get());
        Self {
            gem_home: None,
            ruby_load_path: Vec::new(),
            pool_size: NonZeroUsize::new(size.max(1)).unwrap(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            splay_instance_flush: false,
            max_requests_per_instance: 0,
        }
    }

    /// Sets the pool size. `0` selects the CPU-count heuristic.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        let resolved = if size == 0 {
            default_pool_size(num_cpus::get())
        } else {
            size
        };
        self.pool_size = NonZeroUsize::new(resolved.max(1)).unwrap();
        self
    }

    /// Sets the time a flush waits for the exclusive pool lock.
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Sets the package storage path handed to the create hook.
    pub fn with_gem_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.gem_home = Some(path.into());
        self
    }

    /// Sets the ordered code-loading paths handed to the create hook.
    pub fn with_ruby_load_path(mut self, paths: Vec<PathBuf>) -> Self {
        self.ruby_load_path = paths;
        self
    }

    /// Enables startup jitter for refill construction.
    pub fn with_splay_instance_flush(mut self, splay: bool) -> Self {
        self.splay_instance_flush = splay;
        self
    }

    /// Sets the number of requests a worker serves before it is due for
    /// replacement. `0` disables the limit.
    pub fn with_max_requests_per_instance(mut self, max: u64) -> Self {
        self.max_requests_per_instance = max;
        self
    }

    /// Get the pool size (pre-computed, zero-cost).
    #[inline]
    pub fn pool_size(&self) -> usize {
        self.pool_size.get()
    }

    /// Get the flush timeout.
    #[inline]
    pub fn flush_timeout(&self) -> Duration {
        self.flush_timeout
    }

    /// Package storage path, if configured.
    pub fn gem_home(&self) -> Option<&Path> {
        self.gem_home.as_deref()
    }

    /// Ordered code-loading paths.
    pub fn ruby_load_path(&self) -> &[PathBuf] {
        &self.ruby_load_path
    }

    /// Whether refill construction should jitter startup.
    pub fn splay_instance_flush(&self) -> bool {
        self.splay_instance_flush
    }

    /// Requests served before a worker is due for replacement.
    pub fn max_requests_per_instance(&self) -> u64 {
        self.max_requests_per_instance
    }

    /// Checks the configuration for values the pool cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "flush_timeout".into(),
                message: "must be positive".into(),
            });
        }
        if let Some(path) = &self.gem_home {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "gem_home".into(),
                    message: "path cannot be empty".into(),
                });
            }
        }
        for path in &self.ruby_load_path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "ruby_load_path".into(),
                    message: "entries cannot be empty".into(),
                });
            }
        }
        Ok(())
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Pool configuration:");
        info!("Pool size: {}", self.pool_size());
        info!("Flush timeout: {}ms", self.flush_timeout.as_millis());
        if let Some(ref gem_home) = self.gem_home {
            info!("Gem home: {:?}", gem_home);
        }
        if !self.ruby_load_path.is_empty() {
            info!("Ruby load path: {:?}", self.ruby_load_path);
        }
        if self.splay_instance_flush {
            info!("Instance flush splay: enabled");
        }
        if self.max_requests_per_instance > 0 {
            info!(
                "Max requests per instance: {}",
                self.max_requests_per_instance
            );
        }
    }
}
