use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SequenceError {
    #[error("values count ({right}) must be equal to key count ({left})")]
    LengthMismatch { left: usize, right: usize },

    #[error("unable to clone sequence: its source can only be iterated once")]
    Clone,
}
