//! Named handlers dispatched from configuration expressions.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use super::container::Container;
use super::resolve::{Resolved, Scope};
use super::ConfigError;

type HandlerFn = dyn Fn(&Scope<'_>, &[Resolved]) -> Result<Resolved, ConfigError> + Send + Sync;

/// Type-erased instance produced by a factory.
pub type Instance = Arc<dyn Any + Send + Sync>;

pub(crate) type Factory = Arc<dyn Fn(&Container) -> Result<Instance, ConfigError> + Send + Sync>;

/// How a handler's arguments are prepared before the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Arguments {
    /// Unquoted arguments naming an existing path are replaced by the
    /// resolved value at that path.
    #[default]
    Reference,
    /// Arguments are passed as typed literals.
    Literal,
}

/// A callable registered under an operation name.
///
/// ```
/// use serde_json::Value;
/// use stratum_fnd::config::Handler;
///
/// let upper = Handler::new(|_, args| {
///     Ok(Value::from(args[0].to_string().to_uppercase()).into())
/// })
/// .with_arity(1);
/// ```
#[derive(Clone)]
pub struct Handler {
    func: Arc<HandlerFn>,
    arity: Option<usize>,
    arguments: Arguments,
}

impl Handler {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Scope<'_>, &[Resolved]) -> Result<Resolved, ConfigError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            arity: None,
            arguments: Arguments::Reference,
        }
    }

    /// Like [`Handler::new`], but arguments are never treated as paths.
    pub fn literal<F>(func: F) -> Self
    where
        F: Fn(&Scope<'_>, &[Resolved]) -> Result<Resolved, ConfigError> + Send + Sync + 'static,
    {
        Self {
            arguments: Arguments::Literal,
            ..Self::new(func)
        }
    }

    /// Requires exactly `arity` arguments; mismatches fail at resolution time.
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub fn arguments(&self) -> Arguments {
        self.arguments
    }

    pub(crate) fn call(
        &self,
        operation: &str,
        scope: &Scope<'_>,
        args: &[Resolved],
    ) -> Result<Resolved, ConfigError> {
        if let Some(expected) = self.arity {
            if args.len() != expected {
                return Err(ConfigError::InvalidHandler {
                    name: operation.to_ascii_lowercase(),
                    reason: format!("expects {expected} argument(s), got {}", args.len()),
                });
            }
        }
        (self.func)(scope, args)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("arity", &self.arity)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

fn operand(args: &[Resolved]) -> String {
    args.first().map(ToString::to_string).unwrap_or_default()
}

fn builtins() -> [(&'static str, Handler); 5] {
    [
        (
            "get",
            Handler::literal(|scope, args| scope.get(&operand(args))).with_arity(1),
        ),
        (
            "has",
            Handler::literal(|scope, args| Ok(Value::Bool(scope.has(&operand(args))?).into()))
                .with_arity(1),
        ),
        (
            "env",
            Handler::literal(|_, args| {
                Ok(Value::String(std::env::var(operand(args)).unwrap_or_default()).into())
            })
            .with_arity(1),
        ),
        (
            "wrap",
            Handler::literal(|scope, args| scope.wrap(&operand(args)).map(Resolved::Container))
                .with_arity(1),
        ),
        (
            "lazy",
            Handler::literal(|scope, args| scope.lazy(&operand(args)).map(Resolved::Lazy))
                .with_arity(1),
        ),
    ]
}

/// Handlers and factories shared by a container and everything it wraps.
#[derive(Clone)]
pub(crate) struct Registry {
    handlers: HashMap<String, Handler>,
    factories: HashMap<String, Factory>,
}

impl Registry {
    pub(crate) fn with_builtins() -> Self {
        Self {
            handlers: builtins()
                .into_iter()
                .map(|(name, handler)| (name.to_string(), handler))
                .collect(),
            factories: HashMap::new(),
        }
    }

    /// Registers `handler`, replacing any built-in of the same name.
    pub(crate) fn insert_handler(&mut self, name: &str, handler: Handler) -> Result<(), ConfigError> {
        let normalized = name.to_ascii_lowercase();
        let valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_' || c == '-');

        if !valid {
            return Err(ConfigError::InvalidHandler {
                name: name.to_string(),
                reason: "operation names must match [a-z_-]+".to_string(),
            });
        }

        self.handlers.insert(normalized, handler);
        Ok(())
    }

    pub(crate) fn insert_factory(&mut self, name: String, factory: Factory) {
        self.factories.insert(name, factory);
    }

    pub(crate) fn contains(&self, operation: &str) -> bool {
        self.handler(operation).is_some()
    }

    pub(crate) fn handler(&self, operation: &str) -> Option<&Handler> {
        self.handlers.get(&operation.to_ascii_lowercase())
    }

    pub(crate) fn factory(&self, name: &str) -> Option<Factory> {
        self.factories.get(name).cloned()
    }

    pub(crate) fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// An instance constructed on first use by a factory registered with
/// [`ContainerBuilder::with_factory`](super::ContainerBuilder::with_factory).
///
/// Clones share the same instance.
#[derive(Clone)]
pub struct Lazy {
    name: String,
    factory: Factory,
    container: Container,
    instance: Arc<OnceLock<Instance>>,
}

impl Lazy {
    pub(crate) fn new(name: &str, factory: Factory, container: Container) -> Self {
        Self {
            name: name.to_string(),
            factory,
            container,
            instance: Arc::new(OnceLock::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.instance.get().is_some()
    }

    /// Builds the instance if needed and returns it.
    pub fn instance(&self) -> Result<Instance, ConfigError> {
        if let Some(instance) = self.instance.get() {
            return Ok(Arc::clone(instance));
        }

        tracing::debug!(name = %self.name, "constructing lazy instance");
        let built = (self.factory)(&self.container)?;
        Ok(Arc::clone(self.instance.get_or_init(|| built)))
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ConfigError> {
        self.instance()?
            .downcast::<T>()
            .map_err(|_| ConfigError::InvalidOperand {
                operation: "lazy".to_string(),
                operand: self.name.clone(),
                reason: format!("instance is not a {}", std::any::type_name::<T>()),
            })
    }
}

impl fmt::Debug for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
