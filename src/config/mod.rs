//! Configuration module for ruby_pool.
//!
//! The pool accepts a plain configuration record; it defines no
//! environment variables or CLI of its own.
//!
//! # Example
//!
//! ```rust,ignore
//! use ruby_pool::config::PoolConfig;
//!
//! let config = PoolConfig::new()
//!     .with_pool_size(4)
//!     .with_gem_home("/var/lib/app/gems");
//! config.validate()?;
//! config.log_summary();
//! ```

mod error;
mod pool;

pub use error::ConfigError;
pub use pool::{default_pool_size, PoolConfig};
