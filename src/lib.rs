//! # bobbin
//!
//! A small Django-flavoured template engine with a stateful `{% cycle %}`
//! tag, plus the text database functions (`Coalesce`, `Concat`, `Upper`,
//! `Lower`, `Length`, `Substr`) evaluated over in-memory tables.
//!
//! The crate is split into two layers:
//!
//! - **The language** (parsing, AST, evaluation) lives here and has no
//!   knowledge of where variables or included templates come from.
//! - **The host** implements [`EvalContext`] to provide variables and
//!   template sources, and populates a [`Registry`] with filters.
//!
//! ## Quick start
//!
//! ```rust
//! use bobbin::{render, SimpleContext, Registry};
//!
//! let mut ctx = SimpleContext::new();
//! ctx.set("name", "Alice");
//!
//! let registry = Registry::new();
//! let output = render("Hello, {{ name }}!", &mut ctx, &registry).unwrap();
//! assert_eq!(output, "Hello, Alice!");
//! ```
//!
//! ## Cycling
//!
//! Each evaluation of a `{% cycle %}` tag emits the next of its values,
//! wrapping around at the end:
//!
//! ```rust
//! use bobbin::{render, SimpleContext, Registry};
//!
//! let mut ctx = SimpleContext::new();
//! ctx.set("rows", vec![1i64, 2, 3]);
//!
//! let output = render(
//!     "{% for r in rows %}{% cycle 'odd' 'even' %} {% endfor %}",
//!     &mut ctx,
//!     &Registry::new(),
//! )
//! .unwrap();
//! assert_eq!(output, "odd even odd ");
//! ```
//!
//! ## Compiled templates
//!
//! For repeated evaluation, parse once with [`CompiledTemplate::compile`]
//! and call [`evaluate`] against different contexts:
//!
//! ```rust
//! use bobbin::{CompiledTemplate, SimpleContext, Registry};
//!
//! let template = CompiledTemplate::compile("Hello, {{ name }}!").unwrap();
//! let registry = Registry::new();
//!
//! let mut ctx = SimpleContext::new();
//! ctx.set("name", "Alice");
//! assert_eq!(template.evaluate(&mut ctx, &registry).unwrap(), "Hello, Alice!");
//! ```
//!
//! ## Evaluation options
//!
//! Use [`EvalOptions`] to configure resource limits, cancellation,
//! autoescaping and lenient mode:
//!
//! ```rust
//! use bobbin::{render_with_options, EvalOptions, SimpleContext, Registry};
//!
//! let mut ctx = SimpleContext::new();
//! let registry = Registry::new();
//!
//! let opts = EvalOptions::new()
//!     .max_node_evaluations(10_000)
//!     .max_iterations(1_000)
//!     .lenient(true);
//!
//! let result = render_with_options("Hello, {{ missing }}!", &mut ctx, &registry, opts).unwrap();
//! assert_eq!(result, "Hello, !");
//! ```

pub mod ast;
pub mod error;
pub mod eval;
pub mod functions;
mod parser;
pub mod registry;

pub use ast::span::{Span, Spanned};
pub use ast::template::Template;
pub use ast::value::Value;
pub use error::{EvalError, EvalErrorKind, ParseError};
pub use eval::{
    EvalContext, EvalOptions, SimpleContext, evaluate, evaluate_with_options, html_escape,
};
pub use parser::{parse, parse_with_cycles};
pub use registry::{ArgSpec, ClosureFilter, FilterSignature, Registry, TemplateFilter};

/// Parse source text and evaluate it in a single step.
///
/// For repeated evaluation of the same source, prefer [`CompiledTemplate`]
/// to avoid re-parsing.
pub fn render(
    source: &str,
    ctx: &mut impl EvalContext,
    registry: &Registry,
) -> Result<String, RenderError> {
    let template = parser::parse(source).map_err(RenderError::Parse)?;
    evaluate(&template, ctx, registry).map_err(RenderError::Eval)
}

/// Parse source text and evaluate it with custom options.
///
/// Combines parsing and [`evaluate_with_options`] in a single step.
pub fn render_with_options(
    source: &str,
    ctx: &mut impl EvalContext,
    registry: &Registry,
    options: EvalOptions,
) -> Result<String, RenderError> {
    let template = parser::parse(source).map_err(RenderError::Parse)?;
    evaluate_with_options(&template, ctx, registry, options).map_err(RenderError::Eval)
}

/// Combined error type returned by [`render`] and [`render_with_options`].
#[derive(Debug)]
pub enum RenderError {
    /// One or more errors occurred during parsing.
    Parse(Vec<ParseError>),
    /// An error occurred during evaluation.
    Eval(EvalError),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Parse(errors) => {
                for e in errors {
                    writeln!(f, "{e}")?;
                }
                Ok(())
            }
            RenderError::Eval(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RenderError {}

/// A parsed template that can be evaluated multiple times without re-parsing.
///
/// Every evaluation is a separate render pass: cycles start over from
/// their first value.
///
/// ```rust
/// use bobbin::{CompiledTemplate, SimpleContext, Registry};
///
/// let template = CompiledTemplate::compile("{% cycle 'a' 'b' as ab %}{% cycle ab %}").unwrap();
/// let registry = Registry::new();
///
/// let mut ctx = SimpleContext::new();
/// assert_eq!(template.evaluate(&mut ctx, &registry).unwrap(), "ab");
/// assert_eq!(template.evaluate(&mut ctx, &registry).unwrap(), "ab");
/// ```
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    template: Template,
}

impl CompiledTemplate {
    /// Parse source text into a compiled template.
    ///
    /// Returns parse errors if the source contains invalid syntax.
    pub fn compile(source: &str) -> Result<Self, Vec<ParseError>> {
        let template = parser::parse(source)?;
        Ok(Self { template })
    }

    /// Evaluate this template against the given context and registry.
    pub fn evaluate(
        &self,
        ctx: &mut impl EvalContext,
        registry: &Registry,
    ) -> Result<String, EvalError> {
        evaluate(&self.template, ctx, registry)
    }

    /// Evaluate this template with custom options.
    pub fn evaluate_with_options(
        &self,
        ctx: &mut impl EvalContext,
        registry: &Registry,
        options: EvalOptions,
    ) -> Result<String, EvalError> {
        evaluate_with_options(&self.template, ctx, registry, options)
    }

    /// Access the underlying AST for inspection or analysis.
    pub fn ast(&self) -> &Template {
        &self.template
    }
}
