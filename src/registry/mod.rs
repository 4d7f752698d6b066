//! Filter registration for bobbin templates.
//!
//! The [`Registry`] stores the filters that templates apply with
//! `{{ value|name }}`, `{{ value|name:arg }}` and `{% filter name %}`.
//! [`Registry::new`] comes with the builtin filters already registered; the
//! host may add or replace filters before rendering.
//!
//! There are two ways to register a filter:
//!
//! - **Closure-based**: Use [`ClosureFilter`] for simple cases where a full
//!   trait implementation would be boilerplate.
//! - **Trait-based**: Implement [`TemplateFilter`] directly. The
//!   `#[template_filter]` macro in the `bobbin_macros` crate can generate
//!   the implementation from a function signature.

use std::collections::HashMap;

use crate::ast::value::Value;
use crate::error::{EvalError, EvalErrorKind};

mod builtins;

// ── Trait definitions ───────────────────────────────────────────────────

/// A filter, invoked via `value|name` or `value|name:arg` in templates.
///
/// Filters are pure: they receive the already evaluated input value and
/// optional argument and return a new value.
pub trait TemplateFilter: Send + Sync {
    /// Apply the filter. Argument presence has already been checked
    /// against [`FilterSignature::arg`].
    fn apply(&self, value: Value, arg: Option<Value>) -> Result<Value, EvalError>;

    /// Declare this filter's name and argument expectations.
    fn signature(&self) -> FilterSignature;
}

// ── Signatures ──────────────────────────────────────────────────────────

/// Describes a filter's name, argument and safety behaviour.
#[derive(Debug, Clone)]
pub struct FilterSignature {
    pub name: String,
    pub arg: ArgSpec,
    /// When `true`, a string result of a filter applied to
    /// [`Value::Markup`] input is marked safe again.
    pub is_safe: bool,
}

/// Whether a filter takes an argument after `:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    None,
    Optional,
    Required,
}

// ── Registry ────────────────────────────────────────────────────────────

/// Stores registered filters for use during evaluation.
///
/// ```rust
/// use bobbin::{Registry, ClosureFilter, Value};
///
/// let mut registry = Registry::new();
///
/// registry.register_filter(ClosureFilter::new("shout", |value, _arg| {
///     Ok(Value::String(format!("{}!", value.to_output_string())))
/// }));
///
/// let out = registry.apply_filter("shout", Value::from("hey"), None).unwrap();
/// assert_eq!(out, Value::from("hey!"));
/// ```
pub struct Registry {
    filters: HashMap<String, Box<dyn TemplateFilter>>,
}

impl Registry {
    /// A registry holding the builtin filters: `lower`, `upper`, `length`,
    /// `default`, `safe`, `escape` and `force_escape`.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        builtins::register_all(&mut registry);
        registry
    }

    /// A registry with no filters at all.
    pub fn empty() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// Register a filter. If a filter with the same name already exists,
    /// it is replaced.
    pub fn register_filter(&mut self, filter: impl TemplateFilter + 'static) {
        let sig = filter.signature();
        self.filters.insert(sig.name, Box::new(filter));
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Dispatch a filter call. Returns [`EvalError`] if the filter is not
    /// registered or the argument does not match its signature.
    pub fn apply_filter(
        &self,
        name: &str,
        value: Value,
        arg: Option<Value>,
    ) -> Result<Value, EvalError> {
        let filter = self
            .filters
            .get(name)
            .ok_or_else(|| EvalError::undefined_filter(name))?;
        let sig = filter.signature();

        match (sig.arg, &arg) {
            (ArgSpec::None, Some(_)) => {
                return Err(EvalError::new(
                    EvalErrorKind::TypeError,
                    format!("filter '{name}' takes no argument"),
                ));
            }
            (ArgSpec::Required, None) => {
                return Err(EvalError::new(
                    EvalErrorKind::TypeError,
                    format!("filter '{name}' requires an argument"),
                ));
            }
            _ => {}
        }

        let was_safe = value.is_safe();
        let result = filter.apply(value, arg)?;

        Ok(match result {
            Value::String(s) if was_safe && sig.is_safe => Value::Markup(s),
            other => other,
        })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Closure-based convenience wrapper ───────────────────────────────────

/// A [`TemplateFilter`] implementation backed by a closure.
///
/// Takes an optional argument unless configured otherwise.
///
/// ```rust
/// use bobbin::{ArgSpec, ClosureFilter, Value};
///
/// let filter = ClosureFilter::new("repeat", |value, arg| {
///     let times = arg.and_then(|a| a.as_number()).unwrap_or(1.0) as usize;
///     Ok(Value::String(value.to_output_string().repeat(times)))
/// })
/// .arg(ArgSpec::Required);
/// ```
pub struct ClosureFilter<F>
where
    F: Fn(Value, Option<Value>) -> Result<Value, EvalError> + Send + Sync,
{
    sig: FilterSignature,
    func: F,
}

impl<F> ClosureFilter<F>
where
    F: Fn(Value, Option<Value>) -> Result<Value, EvalError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            sig: FilterSignature {
                name: name.into(),
                arg: ArgSpec::Optional,
                is_safe: false,
            },
            func,
        }
    }

    pub fn arg(mut self, arg: ArgSpec) -> Self {
        self.sig.arg = arg;
        self
    }

    /// Keep markup safety across this filter.
    pub fn safe(mut self, is_safe: bool) -> Self {
        self.sig.is_safe = is_safe;
        self
    }
}

impl<F> TemplateFilter for ClosureFilter<F>
where
    F: Fn(Value, Option<Value>) -> Result<Value, EvalError> + Send + Sync,
{
    fn apply(&self, value: Value, arg: Option<Value>) -> Result<Value, EvalError> {
        (self.func)(value, arg)
    }

    fn signature(&self) -> FilterSignature {
        self.sig.clone()
    }
}
