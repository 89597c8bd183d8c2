use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::handler::{Factory, Handler, Instance, Registry};
use super::resolve::{Resolved, Scope};
use super::ConfigError;

/// Read-only view over a merged configuration tree.
///
/// Values are stored raw and resolved on every access, so expressions such as
/// `env(HOST)` observe the environment at read time. Cloning is cheap and
/// clones share storage and handlers.
///
/// ## Expressions
///
/// String values may embed `operation(args)` or `operation:value`
/// expressions. The built-in operations are:
///
/// - `get(key)` / `has(key)`: cross-reference another entry
/// - `env(NAME)`: read an environment variable (empty when unset)
/// - `wrap(key)`: a container scoped to the subtree at `key`
/// - `lazy(Name)`: a deferred instance from a registered factory
///
/// ## Example
///
/// ```
/// use serde_json::json;
/// use stratum_fnd::Container;
///
/// let config = Container::new(json!({
///     "db": {"host": "127.0.0.1", "port": "5432"},
///     "url": "get(db.host)",
/// }));
///
/// assert_eq!(config.get("db.port")?, json!(5432));
/// assert_eq!(config.get("url")?, json!("127.0.0.1"));
/// assert!(!config.has("db.user")?);
/// # Ok::<(), stratum_fnd::ConfigError>(())
/// ```
#[derive(Clone)]
pub struct Container {
    storage: Arc<Value>,
    registry: Arc<Registry>,
    separator: Arc<str>,
}

impl Container {
    /// Creates a container with the built-in handlers and `.` as separator.
    pub fn new(tree: Value) -> Self {
        Self {
            storage: Arc::new(tree),
            registry: Arc::new(Registry::with_builtins()),
            separator: Arc::from(DEFAULT_SEPARATOR),
        }
    }

    pub fn builder(tree: Value) -> ContainerBuilder {
        ContainerBuilder {
            tree,
            handlers: Vec::new(),
            factories: Vec::new(),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    /// Looks up `key` and resolves any expressions in the stored value.
    ///
    /// Fails with [`ConfigError::PathNotFound`] when the path is missing and
    /// the key contains no registered expression.
    pub fn get(&self, key: &str) -> Result<Resolved, ConfigError> {
        Scope::root(self).get(key)
    }

    /// Like [`get`](Self::get), converting the result into a plain [`Value`].
    pub fn get_value(&self, key: &str) -> Result<Value, ConfigError> {
        self.get(key)?.into_value()
    }

    /// Resolves `key` and deserializes it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        serde_json::from_value(self.get_value(key)?).map_err(ConfigError::DeserializeError)
    }

    /// Whether `key` names an entry, without evaluating it.
    ///
    /// Only a missing path yields `Ok(false)`; other failures met while
    /// normalising an expression key are returned.
    pub fn has(&self, key: &str) -> Result<bool, ConfigError> {
        Scope::root(self).has(key)
    }

    /// Evaluates expressions in an arbitrary string against this container.
    pub fn resolve(&self, input: &str) -> Result<Resolved, ConfigError> {
        Scope::root(self).resolve(input)
    }

    /// Resolves the whole tree eagerly.
    pub fn to_value(&self) -> Result<Value, ConfigError> {
        Scope::root(self).resolve_structured(self.raw().clone())
    }

    /// The unresolved tree.
    pub fn raw(&self) -> &Value {
        &self.storage
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn scoped(&self, tree: Value) -> Self {
        Self {
            storage: Arc::new(tree),
            registry: Arc::clone(&self.registry),
            separator: Arc::clone(&self.separator),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("storage", &self.storage)
            .field("separator", &self.separator)
            .field("handlers", &self.registry.names())
            .finish()
    }
}

/// Path separator used unless configured otherwise.
pub const DEFAULT_SEPARATOR: &str = ".";

/// Builder for a [`Container`] with custom handlers, factories or separator.
///
/// ```
/// use serde_json::{json, Value};
/// use stratum_fnd::config::{Container, Handler};
///
/// let config = Container::builder(json!({"db": {"host": "127.0.0.1"}}))
///     .with_handler(
///         "connect",
///         Handler::new(|_, args| {
///             Ok(Value::from(format!("db://{}:{}", args[0], args[1])).into())
///         })
///         .with_arity(2),
///     )
///     .build()?;
///
/// assert_eq!(config.resolve("connect(db.host, 5432)")?, json!("db://127.0.0.1:5432"));
/// # Ok::<(), stratum_fnd::ConfigError>(())
/// ```
#[must_use = "builders do nothing until .build() is called"]
pub struct ContainerBuilder {
    tree: Value,
    handlers: Vec<(String, Handler)>,
    factories: Vec<(String, Factory)>,
    separator: String,
}

impl ContainerBuilder {
    /// Registers a handler, overriding a built-in of the same name.
    ///
    /// Names are case-insensitive and must match `[a-z_-]+`; invalid names are
    /// reported by [`build`](Self::build).
    pub fn with_handler(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    pub fn with_handlers<I, S>(mut self, handlers: I) -> Self
    where
        I: IntoIterator<Item = (S, Handler)>,
        S: Into<String>,
    {
        self.handlers
            .extend(handlers.into_iter().map(|(name, handler)| (name.into(), handler)));
        self
    }

    /// Registers a type that `lazy(name)` can construct.
    pub fn with_factory<T, F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Container) -> Result<T, ConfigError> + Send + Sync + 'static,
    {
        let factory: Factory =
            Arc::new(move |container: &Container| -> Result<Instance, ConfigError> {
                Ok(Arc::new(factory(container)?))
            });
        self.factories.push((name.into(), factory));
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn build(self) -> Result<Container, ConfigError> {
        let mut registry = Registry::with_builtins();
        for (name, handler) in self.handlers {
            registry.insert_handler(&name, handler)?;
        }
        for (name, factory) in self.factories {
            registry.insert_factory(name, factory);
        }

        tracing::debug!(
            handlers = ?registry.names(),
            separator = %self.separator,
            "built configuration container"
        );

        Ok(Container {
            storage: Arc::new(self.tree),
            registry: Arc::new(registry),
            separator: Arc::from(self.separator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    use crate::config::resolve::MAX_DEPTH;

    fn connect() -> Handler {
        Handler::new(|_, args| {
            let [host, port, user, pass] = args else {
                return Err(ConfigError::handler("connect", "expected four arguments"));
            };
            Ok(Value::from(format!("db://{user}:{pass}@{host}:{port}")).into())
        })
        .with_arity(4)
    }

    #[test]
    fn test_env_expression() {
        std::env::set_var("STRATUM_TEST_HOST", "localhost");
        let config = Container::new(json!({"host": "env(STRATUM_TEST_HOST)"}));

        assert_eq!(config.resolve("env(STRATUM_TEST_HOST)").unwrap(), json!("localhost"));
        assert_eq!(config.get("host").unwrap(), json!("localhost"));
    }

    #[test]
    fn test_env_unset_is_empty() {
        let config = Container::new(json!({}));
        assert_eq!(config.resolve("env(STRATUM_TEST_UNSET_VAR)").unwrap(), json!(""));
    }

    #[test]
    fn test_env_decorate_form() {
        std::env::set_var("STRATUM_TEST_PORT", "8080");
        let config = Container::new(json!({"port": "env:STRATUM_TEST_PORT"}));
        assert_eq!(config.get("port").unwrap(), json!(8080));
    }

    #[test]
    fn test_custom_handler_with_path_arguments() {
        let config = Container::builder(json!({"db": {"host": "127.0.0.1"}}))
            .with_handler("connect", connect())
            .build()
            .unwrap();

        assert_eq!(
            config.resolve("connect(db.host,5432,admin,secret)").unwrap(),
            json!("db://admin:secret@127.0.0.1:5432")
        );
    }

    #[test]
    fn test_quoted_arguments_stay_literal() {
        let config = Container::builder(json!({"db": {"host": "127.0.0.1"}}))
            .with_handler("connect", connect())
            .build()
            .unwrap();

        assert_eq!(
            config.resolve("connect('db.host',5432,admin,secret)").unwrap(),
            json!("db://admin:secret@db.host:5432")
        );
    }

    #[test]
    fn test_nested_expression_arguments() {
        std::env::set_var("STRATUM_TEST_DB_USER", "svc");
        let config = Container::builder(json!({"db": {"host": "10.0.0.5", "pass": "pw"}}))
            .with_handler("connect", connect())
            .build()
            .unwrap();

        assert_eq!(
            config
                .resolve("connect(get(db.host), 5432, env(STRATUM_TEST_DB_USER), db.pass)")
                .unwrap(),
            json!("db://svc:pw@10.0.0.5:5432")
        );
    }

    #[test]
    fn test_get_typifies_strings() {
        let config = Container::new(json!({"port": "5432", "ratio": "0.5", "name": "'app'"}));
        assert_eq!(config.get("port").unwrap(), json!(5432));
        assert_eq!(config.get("ratio").unwrap(), json!(0.5));
        assert_eq!(config.get("name").unwrap(), json!("app"));
    }

    #[test]
    fn test_substitution_within_text() {
        let config = Container::new(json!({
            "host": "example.com",
            "port": 8080,
            "url": "https://get(host):get(port)/api",
        }));
        assert_eq!(config.get("url").unwrap(), json!("https://example.com:8080/api"));
    }

    #[test]
    fn test_substitution_retypifies() {
        let config = Container::new(json!({"port": "80", "alias": "get(port)"}));
        assert_eq!(config.get("alias").unwrap(), json!(80));
    }

    #[test]
    fn test_chained_references() {
        let config = Container::new(json!({"a": "hello", "b": "get(a)", "c": "get(b)"}));
        assert_eq!(config.get("c").unwrap(), json!("hello"));
    }

    #[test]
    fn test_unregistered_operation_is_literal() {
        let config = Container::new(json!({"text": "call foo(bar) later", "time": "12:30"}));
        assert_eq!(config.get("text").unwrap(), json!("call foo(bar) later"));
        assert_eq!(config.get("time").unwrap(), json!("12:30"));
    }

    #[test]
    fn test_unregistered_call_keeps_nested_expressions_literal() {
        std::env::set_var("STRATUM_TEST_OUTER", "1");
        let config = Container::new(json!({
            "wrapped": "outer(env(STRATUM_TEST_OUTER))",
            "missing": "outer(get(no.such.key))",
        }));

        assert_eq!(config.get("wrapped").unwrap(), json!("outer(env(STRATUM_TEST_OUTER))"));
        assert_eq!(config.get("missing").unwrap(), json!("outer(get(no.such.key))"));
    }

    #[test]
    fn test_structured_values_resolve_recursively() {
        std::env::set_var("STRATUM_TEST_REGION", "eu-west");
        let config = Container::new(json!({
            "region": "env(STRATUM_TEST_REGION)",
            "servers": ["get(region)", 3, {"zone": "get(region)"}],
        }));

        assert_eq!(
            config.get("servers").unwrap(),
            json!(["eu-west", 3, {"zone": "eu-west"}])
        );
    }

    #[test]
    fn test_structured_handler_result_is_adopted() {
        let config = Container::new(json!({
            "base": {"host": "h", "port": "80"},
            "copy": "prefix get(base) suffix",
        }));
        assert_eq!(config.get("copy").unwrap(), json!({"host": "h", "port": 80}));
    }

    #[test]
    fn test_null_handler_result_leaves_text() {
        let config = Container::builder(json!({"value": "nothing(x)"}))
            .with_handler("nothing", Handler::literal(|_, _| Ok(Value::Null.into())))
            .build()
            .unwrap();
        assert_eq!(config.get("value").unwrap(), json!("nothing(x)"));
    }

    #[test]
    fn test_missing_key() {
        let config = Container::new(json!({"present": {"key": 1}}));
        assert!(!config.has("missing.key").unwrap());
        assert!(matches!(
            config.get("missing.key"),
            Err(ConfigError::PathNotFound(key)) if key == "missing.key"
        ));
    }

    #[test]
    fn test_has_is_pure_lookup() {
        let config = Container::new(json!({"a": "get(missing)", "nothing": null}));
        assert!(config.has("a").unwrap());
        assert!(config.has("nothing").unwrap());
        assert!(config.get("a").is_err());
    }

    #[test]
    fn test_has_normalizes_expression_keys() {
        std::env::set_var("STRATUM_TEST_KEY_NAME", "db.host");
        let config = Container::new(json!({"db": {"host": "h"}}));
        assert!(config.has("get(db.host)").unwrap());
        assert!(config.has("get(env(STRATUM_TEST_KEY_NAME))").unwrap());
        assert!(!config.has("get(db.port)").unwrap());
    }

    #[test]
    fn test_has_propagates_handler_errors() {
        let config = Container::builder(json!({
            "db": {"host": "h"},
            "checked": "has('get(fail(x))')",
        }))
        .with_handler(
            "fail",
            Handler::literal(|_, _| Err(ConfigError::handler("fail", "boom"))),
        )
        .build()
        .unwrap();

        assert!(matches!(
            config.has("get(fail(x))"),
            Err(ConfigError::Handler { ref operation, .. }) if operation == "fail"
        ));
        assert!(matches!(config.get("checked"), Err(ConfigError::Handler { .. })));
        assert!(!config.has("get(no.such.key)").unwrap());
    }

    #[test]
    fn test_has_expression_yields_boolean() {
        let config = Container::new(json!({
            "a": 1,
            "flag": "has(a)",
            "off": "has(b)",
            "text": "a is has(a)",
        }));

        assert_eq!(config.get("flag").unwrap(), json!(true));
        assert_eq!(config.get("off").unwrap(), json!(false));
        assert_eq!(config.get("text").unwrap(), json!("a is true"));
    }

    #[test]
    fn test_expression_key() {
        std::env::set_var("STRATUM_TEST_EXPR_KEY", "value");
        let config = Container::new(json!({}));
        assert_eq!(config.get("env(STRATUM_TEST_EXPR_KEY)").unwrap(), json!("value"));
    }

    #[test]
    fn test_wrap_returns_scoped_container() {
        let config = Container::new(json!({
            "database": {"host": "db", "port": "5432", "self": "get(host)"},
            "scoped": "wrap(database)",
        }));

        let scoped = config.get("scoped").unwrap();
        let scoped = scoped.as_container().unwrap();
        assert_eq!(scoped.get("port").unwrap(), json!(5432));
        assert_eq!(scoped.get("self").unwrap(), json!("db"));
        assert_eq!(scoped.separator(), ".");
        assert!(scoped.has("host").unwrap());
        assert!(!scoped.has("database").unwrap());
    }

    #[test]
    fn test_wrap_nested_get() {
        let config = Container::new(json!({"a": {"b": 1}, "ref": "a", "w": "wrap(get(ref))"}));
        let wrapped = config.get("w").unwrap();
        assert_eq!(wrapped.as_container().unwrap().get("b").unwrap(), json!(1));
    }

    #[test]
    fn test_wrap_scalar_is_invalid_operand() {
        let config = Container::new(json!({"name": "x", "w": "wrap(name)"}));
        assert!(matches!(
            config.get("w"),
            Err(ConfigError::InvalidOperand { operation, .. }) if operation == "wrap"
        ));
    }

    #[test]
    fn test_wrapped_container_in_list_is_embedded() {
        let config = Container::new(json!({"db": {"port": "1"}, "all": ["wrap(db)"]}));
        assert_eq!(config.get("all").unwrap(), json!([{"port": 1}]));
    }

    #[derive(Debug, PartialEq)]
    struct Pool {
        size: i64,
    }

    #[test]
    fn test_lazy_constructs_on_first_use() {
        let config = Container::builder(json!({"pool": {"size": "8"}, "svc": "lazy(Pool)"}))
            .with_factory("Pool", |config: &Container| {
                let size = config.get("pool.size")?.as_i64().unwrap_or_default();
                Ok(Pool { size })
            })
            .build()
            .unwrap();

        let resolved = config.get("svc").unwrap();
        let lazy = resolved.as_lazy().unwrap();
        assert!(!lazy.is_initialized());

        let pool = lazy.downcast::<Pool>().unwrap();
        assert_eq!(*pool, Pool { size: 8 });
        assert!(lazy.is_initialized());
        assert!(lazy.downcast::<String>().is_err());
    }

    #[test]
    fn test_lazy_unknown_type() {
        let config = Container::new(json!({"svc": "lazy(Missing)"}));
        assert!(matches!(
            config.get("svc"),
            Err(ConfigError::InvalidOperand { operation, operand, .. })
                if operation == "lazy" && operand == "Missing"
        ));
    }

    #[test]
    fn test_lazy_inside_structure_is_unrepresentable() {
        let config = Container::builder(json!({"list": ["lazy(Pool)"]}))
            .with_factory("Pool", |_: &Container| Ok(Pool { size: 1 }))
            .build()
            .unwrap();
        assert!(matches!(
            config.get("list"),
            Err(ConfigError::Unrepresentable { .. })
        ));
    }

    #[test]
    fn test_handler_errors_propagate() {
        let config = Container::builder(json!({"v": "fail(x)"}))
            .with_handler(
                "fail",
                Handler::literal(|_, _| Err(ConfigError::handler("fail", "boom"))),
            )
            .build()
            .unwrap();

        let err = config.get("v").unwrap_err();
        assert_eq!(err.to_string(), "handler 'fail' failed: boom");
    }

    #[test]
    fn test_arity_mismatch_is_invalid_handler() {
        let config = Container::builder(json!({"v": "connect(a, b)"}))
            .with_handler("connect", connect())
            .build()
            .unwrap();
        assert!(matches!(
            config.get("v"),
            Err(ConfigError::InvalidHandler { name, .. }) if name == "connect"
        ));
    }

    #[test]
    fn test_invalid_handler_name_rejected_at_build() {
        let result = Container::builder(json!({}))
            .with_handler("bad name", connect())
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidHandler { .. })));
    }

    #[test]
    fn test_self_reference_hits_recursion_limit() {
        let config = Container::new(json!({"a": "get(b)", "b": "get(a)"}));
        assert!(matches!(
            config.get("a"),
            Err(ConfigError::RecursionLimit { .. })
        ));
        assert!(MAX_DEPTH > 0);
    }

    #[test]
    fn test_custom_separator() {
        let config = Container::builder(json!({"db": {"host": "h"}, "ref": "get(db/host)"}))
            .with_separator("/")
            .build()
            .unwrap();
        assert_eq!(config.get("db/host").unwrap(), json!("h"));
        assert_eq!(config.get("ref").unwrap(), json!("h"));
        assert!(!config.has("db.host").unwrap());
    }

    #[test]
    fn test_list_index_paths() {
        let config = Container::new(json!({"hosts": ["a", "b"]}));
        assert_eq!(config.get("hosts.1").unwrap(), json!("b"));
    }

    #[test]
    fn test_get_as_deserializes() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Database {
            host: String,
            port: u16,
        }

        let config = Container::new(json!({"db": {"host": "get(hosts.0)", "port": "5432"}, "hosts": ["primary"]}));
        let db: Database = config.get_as("db").unwrap();
        assert_eq!(
            db,
            Database {
                host: "primary".to_string(),
                port: 5432
            }
        );
    }

    #[test]
    fn test_to_value_resolves_everything() {
        let config = Container::new(json!({"a": "1", "b": {"c": "get(a)"}}));
        assert_eq!(config.to_value().unwrap(), json!({"a": 1, "b": {"c": 1}}));
    }
}
