//! Lazy key-value collections.

mod error;
mod sequence;

pub use error::SequenceError;
pub use sequence::{Pad, Sequence};
