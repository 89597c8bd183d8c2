use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use walkdir::{DirEntry, WalkDir};

use super::container::{Container, DEFAULT_SEPARATOR};
use super::reader::{IniReader, JsonReader, Reader, TomlReader};
use super::tree::{merge, normalize_tree_keys};
use super::ConfigError;
use crate::collection::Sequence;

/// Loads configuration files into a single merged tree.
///
/// Files are dispatched to a [`Reader`] by extension. Keys containing the
/// separator are expanded into nested branches, so a file holding
/// `{"db.host": "h"}` contributes `{"db": {"host": "h"}}`.
///
/// When loading a directory, only files whose name contains `.global.`,
/// `.local.` or `.{environment}.` are picked up, in directory-walk order
/// with entries sorted by file name. Later files override earlier ones.
///
/// ## Example
///
/// ```no_run
/// use stratum_fnd::{Container, Loader};
///
/// let tree = Loader::with_default_readers().load_directory("production", "config/autoload")?;
/// let config = Container::new(tree);
/// let host = config.get("db.host")?;
/// # Ok::<(), stratum_fnd::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct Loader {
    readers: HashMap<String, Arc<dyn Reader>>,
    separator: String,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    /// Creates a loader with no readers registered.
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    /// JSON for `.json`, TOML for `.toml`, INI for `.ini`/`.env` and, with
    /// the `yaml` feature, YAML for `.yaml`/`.yml`.
    pub fn with_default_readers() -> Self {
        let loader = Self::new()
            .with_reader(&["json"], JsonReader)
            .with_reader(&["toml"], TomlReader)
            .with_reader(&["ini", "env"], IniReader);

        #[cfg(feature = "yaml")]
        let loader = loader.with_reader(&["yaml", "yml"], super::reader::YamlReader);

        loader
    }

    /// Registers `reader` for each extension, given without the leading dot.
    pub fn with_reader(mut self, extensions: &[&str], reader: impl Reader + 'static) -> Self {
        let reader: Arc<dyn Reader> = Arc::new(reader);
        for extension in extensions {
            self.readers
                .insert(extension.to_ascii_lowercase(), Arc::clone(&reader));
        }
        self
    }

    /// Separator used to expand flat keys; must match the container's.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.reader_for(path).is_some()
    }

    /// Parses a single file and expands its flat keys.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let reader = self
            .reader_for(path)
            .ok_or_else(|| ConfigError::UnsupportedExtension {
                extension: extension(path).unwrap_or_default(),
                path: path.to_path_buf(),
            })?;

        let parsed = reader.parse(path)?;
        tracing::debug!(path = %path.display(), "loaded configuration file");

        Ok(match parsed {
            Value::Object(map) => Value::Object(normalize_tree_keys(map, &self.separator)),
            Value::Null => Value::Object(Map::new()),
            other => other,
        })
    }

    /// Loads and merges every matching file below `directory`.
    pub fn load_directory(
        &self,
        environment: &str,
        directory: impl AsRef<Path>,
    ) -> Result<Value, ConfigError> {
        let directory = directory.as_ref();
        if !directory.is_dir() {
            return Err(ConfigError::DirectoryNotFound(directory.to_path_buf()));
        }

        let walk = WalkDir::new(directory)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .enumerate();

        let selector = self.clone();
        let tags = [
            ".global.".to_string(),
            ".local.".to_string(),
            format!(".{}.", environment.to_ascii_lowercase()),
        ];
        let loader = self.clone();

        let files = Sequence::once(walk)
            .filter(move |entry, _| match entry {
                Ok(entry) => selector.is_candidate(entry, &tags),
                Err(_) => true,
            })
            .map(move |entry| -> Result<Value, ConfigError> {
                let entry = entry?;
                loader.load_file(entry.path())
            });

        let merged = files.iter().try_fold(
            Value::Object(Map::new()),
            |mut merged, (_, loaded)| -> Result<Value, ConfigError> {
                merge(&mut merged, loaded?);
                Ok(merged)
            },
        )?;

        tracing::debug!(
            directory = %directory.display(),
            environment,
            "loaded configuration directory"
        );
        Ok(merged)
    }

    /// Loads each directory in turn, later directories overriding earlier ones.
    pub fn load_directories<P: AsRef<Path>>(
        &self,
        environment: &str,
        directories: &[P],
    ) -> Result<Value, ConfigError> {
        directories
            .iter()
            .try_fold(Value::Object(Map::new()), |mut merged, directory| {
                merge(&mut merged, self.load_directory(environment, directory)?);
                Ok(merged)
            })
    }

    /// Loads `directories` and wraps the result in a container using the
    /// loader's separator.
    pub fn container<P: AsRef<Path>>(
        &self,
        environment: &str,
        directories: &[P],
    ) -> Result<Container, ConfigError> {
        let tree = self.load_directories(environment, directories)?;
        Container::builder(tree)
            .with_separator(self.separator.clone())
            .build()
    }

    fn reader_for(&self, path: &Path) -> Option<&Arc<dyn Reader>> {
        extension(path).and_then(|extension| self.readers.get(&extension))
    }

    fn is_candidate(&self, entry: &DirEntry, tags: &[String]) -> bool {
        if !entry.file_type().is_file() || !self.supports(entry.path()) {
            return false;
        }
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        let selected = tags.iter().any(|tag| name.contains(tag.as_str()));
        if !selected {
            tracing::debug!(path = %entry.path().display(), "skipping configuration file");
        }
        selected
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
}
