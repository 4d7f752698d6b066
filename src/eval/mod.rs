//! Template evaluation engine.
//!
//! The evaluator walks a parsed [`Template`] AST and produces a string
//! output. It resolves variables through the provided [`EvalContext`],
//! applies filters from the [`Registry`], and drives the `{% cycle %}`
//! state machine.
//!
//! One call to [`evaluate`] is one render pass. Loop scopes and cycle
//! bindings are created fresh for the pass and dropped when it ends;
//! included templates are rendered inline and share both.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::ast::expr::*;
use crate::ast::span::Span;
use crate::ast::template::*;
use crate::ast::value::Value;
use crate::error::{EvalError, EvalErrorKind};
use crate::parser;
use crate::registry::Registry;

mod context;
mod cycle;
mod escape;

pub use context::{EvalContext, SimpleContext};
pub use escape::html_escape;

use cycle::{CycleRegistry, Step};
use escape::render_value;

/// Evaluate a template against a context and registry, producing the final
/// string output.
///
/// This creates a fresh evaluator, and therefore fresh cycle state, on
/// each call. For repeated evaluation of the same template, use
/// [`CompiledTemplate`](crate::CompiledTemplate).
pub fn evaluate(
    template: &Template,
    ctx: &mut impl EvalContext,
    registry: &Registry,
) -> Result<String, EvalError> {
    let mut evaluator = Evaluator::new(EvalOptions::default());
    evaluator.eval_template(template, ctx, registry)
}

/// Evaluate a template with custom options for resource limits,
/// cancellation, escaping and lenient mode.
///
/// # Example: resource limits
///
/// ```rust
/// use bobbin::{evaluate_with_options, EvalOptions, SimpleContext, Registry};
///
/// let template = bobbin::parse("{% cycle 'a' 'b' %}").unwrap();
/// let mut ctx = SimpleContext::new();
/// let registry = Registry::new();
///
/// let opts = EvalOptions::new().max_node_evaluations(1000).max_iterations(100);
/// let result = evaluate_with_options(&template, &mut ctx, &registry, opts);
/// assert_eq!(result.unwrap(), "a");
/// ```
///
/// # Example: lenient mode
///
/// ```rust
/// use bobbin::{evaluate_with_options, EvalOptions, SimpleContext, Registry};
///
/// let template = bobbin::parse("Hi {{ missing }}!").unwrap();
/// let mut ctx = SimpleContext::new();
/// let registry = Registry::new();
///
/// // Strict mode (default) would error. Lenient mode renders nothing.
/// let opts = EvalOptions::new().lenient(true);
/// let result = evaluate_with_options(&template, &mut ctx, &registry, opts).unwrap();
/// assert_eq!(result, "Hi !");
/// ```
pub fn evaluate_with_options(
    template: &Template,
    ctx: &mut impl EvalContext,
    registry: &Registry,
    options: EvalOptions,
) -> Result<String, EvalError> {
    let mut evaluator = Evaluator::new(options);
    evaluator.eval_template(template, ctx, registry)
}

// ── Evaluation options ──────────────────────────────────────────────────

/// Configuration for resource limits, cancellation, escaping, and error
/// handling during template evaluation.
///
/// Create with [`EvalOptions::new()`] and chain builder methods:
///
/// ```rust
/// use bobbin::EvalOptions;
/// use std::sync::Arc;
/// use std::sync::atomic::AtomicBool;
///
/// let token = Arc::new(AtomicBool::new(false));
/// let opts = EvalOptions::new()
///     .max_node_evaluations(10_000)
///     .max_iterations(1_000)
///     .max_include_depth(4)
///     .cancellation_token(token)
///     .autoescape(false)
///     .lenient(true);
/// ```
#[derive(Clone)]
pub struct EvalOptions {
    /// Maximum number of AST node evaluations before the evaluator
    /// returns a [`ResourceLimit`](EvalErrorKind::ResourceLimit) error.
    /// `None` means unlimited.
    pub max_node_evaluations: Option<u64>,

    /// Maximum number of loop iterations (across all `for` blocks)
    /// before the evaluator returns a
    /// [`ResourceLimit`](EvalErrorKind::ResourceLimit) error.
    /// `None` means unlimited.
    pub max_iterations: Option<u64>,

    /// How deeply `{% include %}` may nest before the evaluator returns a
    /// [`RecursionLimit`](EvalErrorKind::RecursionLimit) error.
    pub max_include_depth: usize,

    /// An external flag that can be set to `true` to cancel an
    /// in-progress evaluation. Checked after each node evaluation.
    pub cancellation_token: Option<Arc<AtomicBool>>,

    /// When `true`, undefined variables evaluate to [`Value::None`] and
    /// render as an empty string instead of producing hard errors.
    pub lenient: bool,

    /// Initial autoescape setting. `{% autoescape %}` blocks override it
    /// for their body.
    pub autoescape: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            max_node_evaluations: None,
            max_iterations: None,
            max_include_depth: 10,
            cancellation_token: None,
            lenient: false,
            autoescape: true,
        }
    }
}

impl EvalOptions {
    /// Create a new `EvalOptions` with all defaults (no limits, include
    /// depth 10, autoescaping on, strict mode).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of AST node evaluations.
    pub fn max_node_evaluations(mut self, limit: u64) -> Self {
        self.max_node_evaluations = Some(limit);
        self
    }

    /// Set the maximum number of loop iterations.
    pub fn max_iterations(mut self, limit: u64) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    /// Set how deeply `{% include %}` tags may nest.
    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Attach a cancellation token. Set the `AtomicBool` to `true` from
    /// another thread to abort evaluation.
    pub fn cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Enable or disable lenient evaluation mode.
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Set whether produced values are HTML-escaped at the start of a pass.
    pub fn autoescape(mut self, autoescape: bool) -> Self {
        self.autoescape = autoescape;
        self
    }
}

impl std::fmt::Debug for EvalOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalOptions")
            .field("max_node_evaluations", &self.max_node_evaluations)
            .field("max_iterations", &self.max_iterations)
            .field("max_include_depth", &self.max_include_depth)
            .field("cancellation_token", &self.cancellation_token.is_some())
            .field("lenient", &self.lenient)
            .field("autoescape", &self.autoescape)
            .finish()
    }
}

// ── Lexical scope stack ─────────────────────────────────────────────────

struct ScopeFrame {
    bindings: HashMap<String, Value>,
}

impl ScopeFrame {
    fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    fn set(&mut self, name: String, value: Value) {
        self.bindings.insert(name, value);
    }

    fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

struct Evaluator {
    scopes: Vec<ScopeFrame>,
    options: EvalOptions,
    node_count: u64,
    iteration_count: u64,
    cycles: CycleRegistry,
    autoescape: bool,
    include_depth: usize,
}

impl Evaluator {
    fn new(options: EvalOptions) -> Self {
        Self {
            scopes: Vec::new(),
            autoescape: options.autoescape,
            options,
            node_count: 0,
            iteration_count: 0,
            cycles: CycleRegistry::new(),
            include_depth: 0,
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(ScopeFrame::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: String, value: Value) {
        if let Some(frame) = self.scopes.last_mut() {
            frame.set(name, value);
        }
    }

    fn resolve_lexical(&self, name: &str) -> Option<Value> {
        for frame in self.scopes.iter().rev() {
            if let Some(val) = frame.get(name) {
                return Some(val.clone());
            }
        }
        None
    }

    /// Check resource limits and cancellation. Called once per node evaluation.
    fn check_limits(&mut self) -> Result<(), EvalError> {
        self.node_count += 1;

        if let Some(max) = self.options.max_node_evaluations
            && self.node_count > max
        {
            tracing::warn!(max, "render aborted: node evaluation limit");
            return Err(EvalError::new(
                EvalErrorKind::ResourceLimit,
                format!("evaluation exceeded maximum of {max} node evaluations"),
            ));
        }

        if let Some(ref token) = self.options.cancellation_token
            && token.load(Ordering::Relaxed)
        {
            return Err(EvalError::new(
                EvalErrorKind::Cancelled,
                "evaluation cancelled",
            ));
        }

        Ok(())
    }

    /// Check iteration limit. Called once per `for` loop iteration.
    fn check_iteration_limit(&mut self) -> Result<(), EvalError> {
        self.iteration_count += 1;

        if let Some(max) = self.options.max_iterations
            && self.iteration_count > max
        {
            tracing::warn!(max, "render aborted: loop iteration limit");
            return Err(EvalError::new(
                EvalErrorKind::ResourceLimit,
                format!("evaluation exceeded maximum of {max} loop iterations"),
            ));
        }

        Ok(())
    }

    // ── Template evaluation ─────────────────────────────────────────────

    fn eval_template(
        &mut self,
        template: &Template,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<String, EvalError> {
        let mut output = String::new();
        for node in &template.nodes {
            let fragment = self.eval_node(node, ctx, registry)?;
            output.push_str(&fragment);
        }
        Ok(output)
    }

    fn eval_node(
        &mut self,
        node: &Node,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<String, EvalError> {
        self.check_limits()?;

        match &node.node {
            NodeKind::Literal(text) => Ok(text.clone()),
            NodeKind::Expression(expr_kind) => {
                let value = self.eval_expr_kind(expr_kind, node.span, ctx, registry)?;
                Ok(render_value(&value, self.autoescape))
            }
            NodeKind::Cycle(cycle) => {
                let step = self.cycles.step_defining(cycle).ok_or_else(|| {
                    EvalError::new(EvalErrorKind::TypeError, "cycle has no values")
                        .with_span(node.span)
                })?;
                self.eval_cycle_step(step, ctx, registry)
            }
            NodeKind::CycleRef(reference) => {
                let step = self.cycles.step_named(&reference.name).ok_or_else(|| {
                    EvalError::undefined_cycle(&reference.name).with_span(node.span)
                })?;
                self.eval_cycle_step(step, ctx, registry)
            }
            NodeKind::IfBlock(block) => self.eval_if_block(block, ctx, registry),
            NodeKind::ForEach(block) => self.eval_foreach(block, ctx, registry),
            NodeKind::Autoescape(block) => {
                let saved = self.autoescape;
                self.autoescape = block.enabled;
                let result = self.eval_template(&block.body, ctx, registry);
                self.autoescape = saved;
                result
            }
            NodeKind::FilterBlock(block) => {
                self.eval_filter_block(block, node.span, ctx, registry)
            }
            NodeKind::Include(include) => self.eval_include(include, node.span, ctx, registry),
        }
    }

    /// Evaluate the value a cycle step picked, record it for named
    /// bindings, and render it unless the binding is silent.
    ///
    /// The value is evaluated before a defining tag installs its binding,
    /// so a value naming the binding reads the host or previous binding.
    fn eval_cycle_step(
        &mut self,
        step: Step,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<String, EvalError> {
        let value = self.eval_expr(&step.expr, ctx, registry)?;
        let rendered = if step.silent {
            String::new()
        } else {
            render_value(&value, self.autoescape)
        };
        self.cycles.finish(step, value);
        Ok(rendered)
    }

    // ── Expression evaluation ───────────────────────────────────────────

    fn eval_expr(
        &mut self,
        expr: &Expr,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<Value, EvalError> {
        self.eval_expr_kind(&expr.node, expr.span, ctx, registry)
    }

    fn eval_expr_kind(
        &mut self,
        kind: &ExprKind,
        span: Span,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<Value, EvalError> {
        match kind {
            ExprKind::Literal(val) => Ok(val.clone()),

            ExprKind::Variable(var) => self.resolve_variable(var, span, ctx),

            ExprKind::Filtered { base, filter } => {
                let value = self.eval_expr(base, ctx, registry)?;
                self.apply_filter(filter, value, span, ctx, registry)
            }

            ExprKind::UnaryOp { op, operand } => {
                let val = self.eval_expr(operand, ctx, registry)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!val.is_truthy())),
                }
            }
        }
    }

    fn apply_filter(
        &mut self,
        filter: &FilterCall,
        value: Value,
        span: Span,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<Value, EvalError> {
        let arg = match &filter.arg {
            Some(arg) => Some(self.eval_expr(arg, ctx, registry)?),
            None => None,
        };
        registry
            .apply_filter(&filter.name, value, arg)
            .map_err(|e| e.or_span(span))
    }

    /// Variable resolution with shadowing: loop bindings win over cycle
    /// values, which win over host variables.
    fn resolve_variable(
        &self,
        var: &VariableRef,
        span: Span,
        ctx: &impl EvalContext,
    ) -> Result<Value, EvalError> {
        if let Some(val) = self.resolve_lexical(&var.name) {
            return Ok(val);
        }

        if let Some(val) = self.cycles.current(&var.name) {
            return Ok(val.clone());
        }

        match ctx.resolve_variable(&var.name).map_err(|e| e.or_span(span))? {
            Some(val) => Ok(val),
            None if self.options.lenient => Ok(Value::None),
            None => Err(EvalError::undefined_variable(&var.name).with_span(span)),
        }
    }

    // ── Control flow ────────────────────────────────────────────────────

    fn eval_if_block(
        &mut self,
        block: &IfBlock,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<String, EvalError> {
        let cond_val = self.eval_expr(&block.condition, ctx, registry)?;
        if cond_val.is_truthy() {
            return self.eval_template(&block.body, ctx, registry);
        }

        if let Some(else_body) = &block.else_body {
            return self.eval_template(else_body, ctx, registry);
        }

        Ok(String::new())
    }

    fn eval_foreach(
        &mut self,
        block: &ForEachBlock,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<String, EvalError> {
        let iterable = self.eval_expr(&block.iterable, ctx, registry)?;

        let type_name = iterable.type_name();
        let items = iterable
            .into_array()
            .ok_or_else(|| EvalError::not_iterable(type_name).with_span(block.iterable.span))?;

        self.push_scope();
        let result = self.eval_foreach_items(block, items, ctx, registry);
        self.pop_scope();
        result
    }

    fn eval_foreach_items(
        &mut self,
        block: &ForEachBlock,
        items: Vec<Value>,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<String, EvalError> {
        let mut output = String::new();
        for item in items {
            self.check_iteration_limit()?;
            self.bind(block.binding.clone(), item);
            let fragment = self.eval_template(&block.body, ctx, registry)?;
            output.push_str(&fragment);
        }
        Ok(output)
    }

    /// Render the body as markup, pipe it through the filters, and emit
    /// the result without further escaping.
    fn eval_filter_block(
        &mut self,
        block: &FilterBlock,
        span: Span,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<String, EvalError> {
        let body = self.eval_template(&block.body, ctx, registry)?;
        let mut value = Value::Markup(body);
        for filter in &block.filters {
            value = self.apply_filter(filter, value, span, ctx, registry)?;
        }
        Ok(value.to_output_string())
    }

    fn eval_include(
        &mut self,
        include: &Include,
        span: Span,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<String, EvalError> {
        let name = self
            .eval_expr(&include.name, ctx, registry)?
            .to_output_string();

        if self.include_depth >= self.options.max_include_depth {
            tracing::warn!(template = %name, depth = self.include_depth, "render aborted: include depth limit");
            return Err(EvalError::new(
                EvalErrorKind::RecursionLimit,
                format!(
                    "include of '{name}' exceeds maximum depth of {}",
                    self.options.max_include_depth
                ),
            )
            .with_span(span));
        }

        let source = ctx.load_template(&name).map_err(|e| e.or_span(span))?;
        tracing::debug!(template = %name, depth = self.include_depth + 1, "including template");

        let known: Vec<String> = self.cycles.names().map(str::to_string).collect();
        let template = parser::parse_with_cycles(&source, known)
            .map_err(|errors| include_syntax_error(&name, errors).with_span(span))?;

        self.include_depth += 1;
        let result = self.eval_template(&template, ctx, registry);
        self.include_depth -= 1;
        result
    }
}

fn include_syntax_error(name: &str, errors: Vec<crate::error::ParseError>) -> EvalError {
    match errors.into_iter().next() {
        Some(first) => EvalError::new(
            EvalErrorKind::IncludeSyntax,
            format!("included template '{name}': {}", first.message),
        )
        .with_source(first),
        None => EvalError::new(
            EvalErrorKind::IncludeSyntax,
            format!("included template '{name}' failed to parse"),
        ),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────


// ── Resource limits and options tests ───────────────────────────────────

#[cfg(test)]
mod options_tests {
    use super::*;

    fn items_ctx(n: i64) -> SimpleContext {
        let mut ctx = SimpleContext::new();
        ctx.set("items", (0..n).collect::<Vec<_>>());
        ctx
    }

    #[test]
    fn test_node_evaluation_limit() {
        let template = parser::parse("{% for i in items %}{{ i }}{% endfor %}").unwrap();
        let mut ctx = items_ctx(5);

        let opts = EvalOptions::new().max_node_evaluations(3);
        let err = evaluate_with_options(&template, &mut ctx, &Registry::new(), opts).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::ResourceLimit);
        assert!(err.message.contains("node evaluations"));
    }

    #[test]
    fn test_node_evaluation_limit_sufficient() {
        let template = parser::parse("Hello, world!").unwrap();
        let mut ctx = SimpleContext::new();
        let opts = EvalOptions::new().max_node_evaluations(100);
        let result = evaluate_with_options(&template, &mut ctx, &Registry::new(), opts).unwrap();
        assert_eq!(result, "Hello, world!");
    }

    #[test]
    fn test_iteration_limit() {
        let template = parser::parse("{% for i in items %}{{ i }}{% endfor %}").unwrap();
        let mut ctx = items_ctx(10);

        let opts = EvalOptions::new().max_iterations(5);
        let err = evaluate_with_options(&template, &mut ctx, &Registry::new(), opts).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::ResourceLimit);
        assert!(err.message.contains("loop iterations"));
    }

    #[test]
    fn test_loop_scope_popped_after_error() {
        let template = parser::parse("{% for i in items %}{{ i }}{% endfor %}").unwrap();
        let mut ctx = items_ctx(4);

        let mut evaluator = Evaluator::new(EvalOptions::new().max_iterations(2));
        let err = evaluator
            .eval_template(&template, &mut ctx, &Registry::new())
            .unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::ResourceLimit);
        assert!(evaluator.scopes.is_empty());
    }

    #[test]
    fn test_iteration_limit_sufficient() {
        let template = parser::parse("{% for i in items %}{{ i }}{% endfor %}").unwrap();
        let mut ctx = items_ctx(3);
        let opts = EvalOptions::new().max_iterations(100);
        let result = evaluate_with_options(&template, &mut ctx, &Registry::new(), opts).unwrap();
        assert_eq!(result, "012");
    }

    #[test]
    fn test_include_depth_option() {
        let template = parser::parse("{% include 'a' %}").unwrap();
        let mut ctx = SimpleContext::new();
        ctx.add_template("a", "{% include 'b' %}");
        ctx.add_template("b", "deep");

        let opts = EvalOptions::new().max_include_depth(1);
        let err = evaluate_with_options(&template, &mut ctx, &Registry::new(), opts).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::RecursionLimit);

        let opts = EvalOptions::new().max_include_depth(2);
        let out = evaluate_with_options(&template, &mut ctx, &Registry::new(), opts).unwrap();
        assert_eq!(out, "deep");
    }

    #[test]
    fn test_cancellation() {
        let template = parser::parse("{% for i in items %}{{ i }}{% endfor %}").unwrap();
        let mut ctx = items_ctx(3);

        let token = Arc::new(AtomicBool::new(true));
        let opts = EvalOptions::new().cancellation_token(token);
        let err = evaluate_with_options(&template, &mut ctx, &Registry::new(), opts).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Cancelled);
    }

    #[test]
    fn test_cancellation_not_triggered() {
        let template = parser::parse("Hello!").unwrap();
        let mut ctx = SimpleContext::new();
        let token = Arc::new(AtomicBool::new(false));
        let opts = EvalOptions::new().cancellation_token(token);
        let result = evaluate_with_options(&template, &mut ctx, &Registry::new(), opts).unwrap();
        assert_eq!(result, "Hello!");
    }

    #[test]
    fn test_lenient_undefined_variable() {
        let template =
            parser::parse("Name: {{ name }}, Score: {{ score|default:'-' }}").unwrap();
        let mut ctx = SimpleContext::new();
        ctx.set("name", "Alice");

        let opts = EvalOptions::new().lenient(true);
        let result = evaluate_with_options(&template, &mut ctx, &Registry::new(), opts).unwrap();
        assert_eq!(result, "Name: Alice, Score: -");
    }

    #[test]
    fn test_strict_mode_is_default() {
        let template = parser::parse("{{ missing }}").unwrap();
        let mut ctx = SimpleContext::new();
        assert!(evaluate(&template, &mut ctx, &Registry::new()).is_err());
    }

    #[test]
    fn test_error_chaining() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let eval_err = EvalError::host_error("failed to load").with_source(io_err);
        assert_eq!(eval_err.kind, EvalErrorKind::HostError);

        let source = std::error::Error::source(&eval_err);
        assert!(source.is_some());

        let cloned = eval_err.clone();
        assert_eq!(cloned.message, eval_err.message);
        assert!(cloned.source.is_some());
    }
}
