//! File readers producing raw configuration trees.

use std::fmt;
use std::path::Path;

use serde_json::{Map, Value};

use super::resolve::typify;
use super::tree::merge_maps;
use super::ConfigError;

/// Parses one configuration file into a (possibly flat) tree.
pub trait Reader: Send + Sync + fmt::Debug {
    fn parse(&self, path: &Path) -> Result<Value, ConfigError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReader;

impl Reader for JsonReader {
    fn parse(&self, path: &Path) -> Result<Value, ConfigError> {
        let contents = read_config_file(path)?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::JsonParse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// TOML reader; datetimes are kept as their RFC 3339 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlReader;

impl Reader for TomlReader {
    fn parse(&self, path: &Path) -> Result<Value, ConfigError> {
        let contents = read_config_file(path)?;
        let table: toml::Table = toml::from_str(&contents).map_err(|e| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(from_toml(toml::Value::Table(table)))
    }
}

/// INI reader; sections become mappings and values are typed.
///
/// `true`/`on`/`yes` and `false`/`off`/`no`/`none` become booleans, `null`
/// becomes null and numbers are parsed. Keys are left flat, so
/// `db.host = h` is nested by the loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct IniReader;

impl Reader for IniReader {
    fn parse(&self, path: &Path) -> Result<Value, ConfigError> {
        let contents = read_config_file(path)?;
        let ini = ini::Ini::load_from_str(&contents).map_err(|e| ConfigError::IniParse {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut tree = Map::new();
        for (section, properties) in ini.iter() {
            let entries: Map<String, Value> = properties
                .iter()
                .map(|(key, value)| (key.to_string(), typed_ini_value(value)))
                .collect();
            match section {
                None => merge_maps(&mut tree, entries),
                Some(name) => merge_maps(
                    &mut tree,
                    std::iter::once((name.to_string(), Value::Object(entries))).collect(),
                ),
            }
        }
        Ok(Value::Object(tree))
    }
}

fn typed_ini_value(raw: &str) -> Value {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" => Value::Bool(true),
        "false" | "off" | "no" | "none" => Value::Bool(false),
        "null" => Value::Null,
        _ => typify(raw),
    }
}

#[cfg(feature = "yaml")]
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlReader;

#[cfg(feature = "yaml")]
impl Reader for YamlReader {
    fn parse(&self, path: &Path) -> Result<Value, ConfigError> {
        let contents = read_config_file(path)?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::YamlParse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.to_path_buf())
        } else {
            ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}

fn from_toml(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, item)| (key, from_toml(item)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn test_json_reader() {
        let file = temp_file(".json", r#"{"db": {"host": "h"}, "list": [1, 2]}"#);
        let value = JsonReader.parse(file.path()).unwrap();
        assert_eq!(value, json!({"db": {"host": "h"}, "list": [1, 2]}));
    }

    #[test]
    fn test_json_reader_malformed() {
        let file = temp_file(".json", "{not json");
        let result = JsonReader.parse(file.path());
        assert!(matches!(result, Err(ConfigError::JsonParse { .. })));
    }

    #[test]
    fn test_toml_reader_preserves_types_and_order() {
        let file = temp_file(
            ".toml",
            r#"
            zeta = 1
            alpha = 1.5
            enabled = true
            born = 1979-05-27T07:32:00Z

            [server]
            hosts = ["a", "b"]
            "#,
        );
        let value = TomlReader.parse(file.path()).unwrap();
        assert_eq!(
            value,
            json!({
                "zeta": 1,
                "alpha": 1.5,
                "enabled": true,
                "born": "1979-05-27T07:32:00Z",
                "server": {"hosts": ["a", "b"]}
            })
        );
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "enabled", "born", "server"]);
    }

    #[test]
    fn test_toml_reader_malformed() {
        let file = temp_file(".toml", "key = ");
        assert!(matches!(
            TomlReader.parse(file.path()),
            Err(ConfigError::TomlParse { .. })
        ));
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn test_yaml_reader() {
        let file = temp_file(".yaml", "db:\n  host: h\n  port: 5432\n");
        let value = YamlReader.parse(file.path()).unwrap();
        assert_eq!(value, json!({"db": {"host": "h", "port": 5432}}));
    }

    #[test]
    fn test_ini_reader_sections_and_types() {
        let file = temp_file(
            ".ini",
            "name = demo\ndebug = on\n\n[db]\nhost = localhost\nport = 5432\nratio = 0.5\ncache = off\n",
        );
        let value = IniReader.parse(file.path()).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "demo",
                "debug": true,
                "db": {"host": "localhost", "port": 5432, "ratio": 0.5, "cache": false}
            })
        );
    }

    #[test]
    fn test_ini_reader_keeps_flat_keys_and_expressions() {
        let file = temp_file(".ini", "db.host = h\nurl = get(db.host)\n");
        let value = IniReader.parse(file.path()).unwrap();
        assert_eq!(value, json!({"db.host": "h", "url": "get(db.host)"}));
    }

    #[test]
    fn test_missing_file() {
        let result = JsonReader.parse(Path::new("/nonexistent/path/config.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
