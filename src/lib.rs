//! Layered configuration with embedded expressions, plus lazy keyed
//! sequences.
//!
//! ```
//! use serde_json::json;
//! use stratum_fnd::Container;
//!
//! let config = Container::new(json!({
//!     "cache": {"ttl": "300", "backend": "wrap(redis)"},
//!     "redis": {"host": "localhost"},
//! }));
//!
//! assert_eq!(config.get("cache.ttl")?, json!(300));
//! let redis = config.get("cache.backend")?;
//! assert_eq!(redis.as_container().unwrap().get("host")?, json!("localhost"));
//! # Ok::<(), stratum_fnd::Error>(())
//! ```

pub mod collection;
pub mod config;
mod error;

pub use collection::{Pad, Sequence, SequenceError};
pub use config::{ConfigError, Container, Loader};
pub use error::Error;
