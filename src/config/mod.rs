//! Configuration loading and resolution.

mod container;
mod error;
mod expression;
mod handler;
mod loader;
mod reader;
mod resolve;
pub mod tree;

pub use container::{Container, ContainerBuilder, DEFAULT_SEPARATOR};
pub use error::ConfigError;
pub use handler::{Arguments, Handler, Instance, Lazy};
pub use loader::Loader;
#[cfg(feature = "yaml")]
pub use reader::YamlReader;
pub use reader::{IniReader, JsonReader, Reader, TomlReader};
pub use resolve::{typify, Resolved, Scope, MAX_DEPTH};
