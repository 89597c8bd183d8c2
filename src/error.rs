use crate::collection::SequenceError;
use crate::config::ConfigError;
use thiserror::Error;

/// Top-level error type for the stratum-fnd library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("sequence error: {0}")]
    Sequence(#[from] SequenceError),
}
