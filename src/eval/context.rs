use std::collections::HashMap;

use crate::ast::value::Value;
use crate::error::EvalError;

/// Trait implemented by the host application to supply data to a render
/// pass.
///
/// The evaluator calls these methods when a template needs something it
/// cannot produce itself: a context variable, or the source of a template
/// named by `{% include %}`.
///
/// Loop variables and cycle values are managed by the evaluator and never
/// reach the host.
pub trait EvalContext {
    /// Look up a context variable by name.
    ///
    /// Return `Ok(None)` if the variable does not exist. The evaluator
    /// will produce an "undefined variable" error in that case, unless the
    /// pass is lenient.
    fn resolve_variable(&self, name: &str) -> Result<Option<Value>, EvalError>;

    /// Return the source text of the template called `name`.
    ///
    /// The evaluator parses and renders the returned source inline. Return
    /// [`EvalError::template_not_found`] for unknown names.
    fn load_template(&mut self, name: &str) -> Result<String, EvalError>;
}

/// A minimal [`EvalContext`] implementation for testing and single-file use.
///
/// Stores variables and includable templates in in-memory maps.
///
/// ```rust
/// use bobbin::{SimpleContext, Value};
///
/// let mut ctx = SimpleContext::new();
/// ctx.set("name", "Alice");
/// ctx.set("values", vec![1i64, 2, 3]);
/// ctx.add_template("row.html", "<td>{{ name }}</td>");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SimpleContext {
    variables: HashMap<String, Value>,
    templates: HashMap<String, String>,
}

impl SimpleContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable. Accepts any type that implements `Into<Value>`
    /// (strings, numbers, booleans, vectors, options).
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.variables.insert(name.to_string(), value.into());
    }

    /// Register a template that `{% include %}` can load by name.
    pub fn add_template(&mut self, name: &str, source: impl Into<String>) {
        self.templates.insert(name.to_string(), source.into());
    }
}

impl EvalContext for SimpleContext {
    fn resolve_variable(&self, name: &str) -> Result<Option<Value>, EvalError> {
        Ok(self.variables.get(name).cloned())
    }

    fn load_template(&mut self, name: &str) -> Result<String, EvalError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::template_not_found(name))
    }
}
