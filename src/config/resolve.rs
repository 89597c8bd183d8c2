//! Resolution of expressions embedded in configuration values.
//!
//! A string leaf such as `"db://env(DB_HOST):5432"` is scanned for
//! expressions, each registered handler is invoked, and scalar results are
//! substituted back into the text. Structured results replace the value
//! outright and are resolved recursively.

use std::fmt;

use serde_json::{Map, Number, Value};

use super::container::Container;
use super::expression::{is_single, scan, Expression, Operands};
use super::handler::{Arguments, Lazy};
use super::tree;
use super::ConfigError;

/// Maximum nesting of lookups and handler calls before resolution gives up.
pub const MAX_DEPTH: usize = 64;

/// Outcome of resolving a key or expression.
#[derive(Debug, Clone)]
pub enum Resolved {
    Value(Value),
    /// A sub-configuration produced by `wrap`.
    Container(Container),
    /// A deferred instance produced by `lazy`.
    Lazy(Lazy),
}

impl Resolved {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Self::Container(container) => Some(container),
            _ => None,
        }
    }

    pub fn as_lazy(&self) -> Option<&Lazy> {
        match self {
            Self::Lazy(lazy) => Some(lazy),
            _ => None,
        }
    }

    /// Converts into a plain [`Value`], resolving wrapped containers fully.
    ///
    /// Lazy instances have no value form and fail with
    /// [`ConfigError::Unrepresentable`].
    pub fn into_value(self) -> Result<Value, ConfigError> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Container(container) => container.to_value(),
            Self::Lazy(lazy) => Err(ConfigError::Unrepresentable {
                operation: format!("lazy({})", lazy.name()),
            }),
        }
    }
}

impl From<Value> for Resolved {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Container> for Resolved {
    fn from(container: Container) -> Self {
        Self::Container(container)
    }
}

impl From<Lazy> for Resolved {
    fn from(lazy: Lazy) -> Self {
        Self::Lazy(lazy)
    }
}

impl PartialEq<Value> for Resolved {
    fn eq(&self, other: &Value) -> bool {
        self.as_value() == Some(other)
    }
}

impl fmt::Display for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.write_str(&render(value)),
            Self::Container(_) => f.write_str("[container]"),
            Self::Lazy(lazy) => write!(f, "lazy({})", lazy.name()),
        }
    }
}

/// Coerces a raw token: unsigned integers become integers, numeric-looking
/// tokens become floats, anything else is returned with surrounding quotes
/// removed.
pub fn typify(token: &str) -> Value {
    let token = token.trim();

    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(integer) = token.parse::<i64>() {
            return Value::from(integer);
        }
    }

    if looks_like_float(token) {
        if let Some(number) = token.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }

    Value::String(token.trim_matches(|c| c == '\'' || c == '"').to_string())
}

fn looks_like_float(token: &str) -> bool {
    let unsigned = token
        .strip_prefix(|c: char| c == '-' || c == '+')
        .unwrap_or(token);

    unsigned.starts_with(|c: char| c.is_ascii_digit() || c == '.')
        && unsigned.ends_with(|c: char| c.is_ascii_digit())
        && unsigned
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
}

/// Text form of a value when substituted into a string.
pub(crate) fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn is_quoted(token: &str) -> bool {
    token.trim_start().starts_with(|c| c == '\'' || c == '"')
}

/// Resolution context handed to handlers.
///
/// Tracks the nesting depth so that self-referencing entries such as
/// `a = "get(a)"` fail with [`ConfigError::RecursionLimit`] instead of
/// overflowing the stack.
pub struct Scope<'a> {
    container: &'a Container,
    depth: usize,
}

impl<'a> Scope<'a> {
    pub(crate) fn root(container: &'a Container) -> Self {
        Self {
            container,
            depth: 0,
        }
    }

    pub fn container(&self) -> &'a Container {
        self.container
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn descend(&self, key: &str) -> Result<Scope<'a>, ConfigError> {
        if self.depth >= MAX_DEPTH {
            return Err(ConfigError::RecursionLimit {
                key: key.to_string(),
            });
        }
        Ok(Scope {
            container: self.container,
            depth: self.depth + 1,
        })
    }

    fn is_registered(&self, operation: &str) -> bool {
        self.container.registry().contains(operation)
    }

    fn find(&self, key: &str) -> Option<&'a Value> {
        tree::find(self.container.raw(), key, self.container.separator())
    }

    /// Looks up `key` and resolves whatever is stored there.
    ///
    /// A key missing from the tree is itself resolved as an expression when
    /// it contains one, so `get("env(HOME)")` works.
    pub fn get(&self, key: &str) -> Result<Resolved, ConfigError> {
        let scope = self.descend(key)?;

        match scope.find(key) {
            Some(raw) => scope.resolve_raw(raw),
            None if !scan(key, |op| scope.is_registered(op)).is_empty() => scope.resolve(key),
            None => Err(ConfigError::PathNotFound(key.to_string())),
        }
    }

    /// Pure path check; never evaluates stored values.
    ///
    /// When the key is a single expression such as `get(db.host)`, its
    /// operand is resolved and checked instead. A missing path is reported
    /// as `Ok(false)`; any other failure while resolving the operand is
    /// returned.
    pub fn has(&self, key: &str) -> Result<bool, ConfigError> {
        if self.find(key).is_some() {
            return Ok(true);
        }

        let Some(expression) = is_single(key, |op| self.is_registered(op)) else {
            return Ok(false);
        };
        let operand = match &expression.operands {
            Operands::Call(args) if args.len() == 1 => args[0],
            Operands::Decorate(token) => *token,
            Operands::Call(_) => return Ok(false),
        };

        match self
            .descend(key)
            .and_then(|scope| scope.argument(operand, Arguments::Literal))
        {
            Ok(Resolved::Value(target)) => Ok(self.find(&render(&target)).is_some()),
            Ok(_) => Ok(false),
            Err(err) if err.is_not_found() => {
                tracing::debug!(key, error = %err, "expression key does not name a path");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Builds a container over the subtree at `key`, sharing handlers and separator.
    pub fn wrap(&self, key: &str) -> Result<Container, ConfigError> {
        if let Some(raw) = self.find(key).filter(|raw| raw.is_object() || raw.is_array()) {
            return Ok(self.container.scoped(raw.clone()));
        }

        match self.get(key)? {
            Resolved::Container(inner) => Ok(inner),
            Resolved::Value(value @ (Value::Object(_) | Value::Array(_))) => {
                Ok(self.container.scoped(value))
            }
            other => Err(ConfigError::InvalidOperand {
                operation: "wrap".to_string(),
                operand: key.to_string(),
                reason: format!("expected a structured value, found '{other}'"),
            }),
        }
    }

    /// Defers construction of the type registered under `name`.
    pub fn lazy(&self, name: &str) -> Result<Lazy, ConfigError> {
        let factory = self.container.registry().factory(name).ok_or_else(|| {
            ConfigError::InvalidOperand {
                operation: "lazy".to_string(),
                operand: name.to_string(),
                reason: "not a registered type".to_string(),
            }
        })?;
        Ok(Lazy::new(name, factory, self.container.clone()))
    }

    fn resolve_raw(&self, raw: &Value) -> Result<Resolved, ConfigError> {
        match raw {
            Value::String(text) => self.resolve(text),
            Value::Array(_) | Value::Object(_) => {
                self.resolve_structured(raw.clone()).map(Resolved::Value)
            }
            other => Ok(Resolved::Value(other.clone())),
        }
    }

    /// Resolves every string leaf of a list or mapping.
    pub fn resolve_structured(&self, value: Value) -> Result<Value, ConfigError> {
        match value {
            Value::String(text) => self.embed(self.resolve(&text)?),
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.resolve_structured(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(entries) => entries
                .into_iter()
                .map(|(key, item)| Ok((key, self.resolve_structured(item)?)))
                .collect::<Result<Map<_, _>, ConfigError>>()
                .map(Value::Object),
            other => Ok(other),
        }
    }

    fn embed(&self, resolved: Resolved) -> Result<Value, ConfigError> {
        match resolved {
            Resolved::Container(inner) => {
                let scope = Scope {
                    container: &inner,
                    depth: self.depth + 1,
                };
                scope.resolve_structured(inner.raw().clone())
            }
            other => other.into_value(),
        }
    }

    /// Evaluates every registered expression in `input`.
    pub fn resolve(&self, input: &str) -> Result<Resolved, ConfigError> {
        let text = input.trim();
        let expressions = scan(text, |op| self.is_registered(op));
        let mut current = Value::String(text.to_string());

        for expression in &expressions {
            match self.evaluate(expression)? {
                Resolved::Value(Value::Null) => {}
                Resolved::Value(Value::Bool(flag)) if expression.text == text => {
                    return Ok(Resolved::Value(Value::Bool(flag)));
                }
                Resolved::Value(scalar @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => {
                    let carrier = render(&current);
                    current = typify(&carrier.replace(expression.text, &render(&scalar)));
                }
                Resolved::Value(structured) => {
                    return self.resolve_structured(structured).map(Resolved::Value);
                }
                other => return Ok(other),
            }
        }

        Ok(Resolved::Value(match current {
            Value::String(text) => typify(&text),
            other => other,
        }))
    }

    fn evaluate(&self, expression: &Expression<'_>) -> Result<Resolved, ConfigError> {
        let Some(handler) = self.container.registry().handler(expression.operation) else {
            return Ok(Resolved::Value(Value::Null));
        };
        let scope = self.descend(expression.text)?;

        tracing::trace!(
            operation = expression.operation,
            expression = expression.text,
            depth = scope.depth,
            "dispatching handler"
        );

        match &expression.operands {
            Operands::Call(args) => {
                let args = args
                    .iter()
                    .map(|arg| scope.argument(arg, handler.arguments()))
                    .collect::<Result<Vec<_>, _>>()?;
                handler.call(expression.operation, &scope, &args)
            }
            Operands::Decorate(token) => {
                let operand = scope.argument(token, handler.arguments())?;
                Ok(match handler.call(expression.operation, &scope, &[operand])? {
                    Resolved::Value(Value::String(text)) => Resolved::Value(typify(&text)),
                    other => other,
                })
            }
        }
    }

    /// Types and resolves a single argument token.
    ///
    /// Quoted tokens stay literal. In [`Arguments::Reference`] mode an
    /// unquoted string naming an existing path is replaced by that path's
    /// resolved value.
    fn argument(&self, raw: &str, mode: Arguments) -> Result<Resolved, ConfigError> {
        let text = match typify(raw) {
            Value::String(text) => text,
            typed => return Ok(Resolved::Value(typed)),
        };
        if is_quoted(raw) {
            return Ok(Resolved::Value(Value::String(text)));
        }

        let resolved = if scan(&text, |op| self.is_registered(op)).is_empty() {
            Resolved::Value(Value::String(text))
        } else {
            self.resolve(&text)?
        };

        if mode == Arguments::Reference {
            if let Resolved::Value(Value::String(key)) = &resolved {
                if self.find(key).is_some() {
                    return self.get(key);
                }
            }
        }

        Ok(resolved)
    }
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").field("depth", &self.depth).finish_non_exhaustive()
    }
}
