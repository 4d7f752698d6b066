//! Error types for parsing and rendering templates.
//!
//! [`ParseError`] is produced while building the AST and carries a source
//! span for diagnostics. [`EvalError`] is produced during a render pass
//! and can originate from the evaluator, a filter, or the host's
//! [`EvalContext`](crate::eval::EvalContext).
//!
//! Text-function errors live with their module, see
//! [`FunctionError`](crate::functions::FunctionError).

use crate::ast::span::Span;
use std::sync::Arc;
use thiserror::Error;

// ── Parse errors ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ParseError {
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
}

impl ParseError {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Render the error with the offending source line and a caret marker.
    pub fn format_with_source(&self, source: &str, template_name: Option<&str>) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let source_line = source.lines().nth(line.saturating_sub(1)).unwrap_or("");

        let location = match template_name {
            Some(name) => format!(" --> {name}:{line}:{col}"),
            None => format!(" --> {line}:{col}"),
        };

        let width = self.span.slice(source).chars().count().max(1);
        let pointer = " ".repeat(col.saturating_sub(1)) + &"^".repeat(width);

        let mut output = format!(
            "Error: {}\n{location}\n  |\n{line:>3} | {source_line}\n    | {pointer}",
            self.message
        );

        if let Some(hint) = &self.hint {
            output.push_str(&format!("\n  = hint: {hint}"));
        }

        output
    }
}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

// ── Eval errors ─────────────────────────────────────────────────────────

/// An error raised during a render pass.
///
/// Carries a structured [`EvalErrorKind`], a message, an optional source
/// [`Span`], and an optional underlying cause.
///
/// # Error chaining
///
/// Hosts that fail to load a template can keep the original error:
///
/// ```rust
/// use bobbin::EvalError;
///
/// fn example() -> Result<(), EvalError> {
///     let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
///     Err(EvalError::host_error("failed to read template").with_source(io_err))
/// }
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub span: Option<Span>,
    pub message: String,
    /// Wrapped in `Arc` so that `EvalError` stays `Clone`.
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            span: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a span only if none has been recorded yet.
    pub(crate) fn or_span(self, span: Span) -> Self {
        if self.span.is_none() {
            self.with_span(span)
        } else {
            self
        }
    }

    /// Attach an underlying error cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn undefined_variable(name: &str) -> Self {
        Self::new(
            EvalErrorKind::UndefinedVariable,
            format!("undefined variable: {name}"),
        )
    }

    pub fn undefined_filter(name: &str) -> Self {
        Self::new(
            EvalErrorKind::UndefinedFilter,
            format!("invalid filter: '{name}'"),
        )
    }

    pub fn undefined_cycle(name: &str) -> Self {
        Self::new(
            EvalErrorKind::UndefinedCycle,
            format!("named cycle '{name}' has not been evaluated in this render"),
        )
    }

    pub fn type_error(expected: &str, got: &str) -> Self {
        Self::new(
            EvalErrorKind::TypeError,
            format!("expected {expected}, got {got}"),
        )
    }

    pub fn not_iterable(got: &str) -> Self {
        Self::new(
            EvalErrorKind::NotIterable,
            format!("for loop requires an array, got {got}"),
        )
    }

    pub fn template_not_found(name: &str) -> Self {
        Self::new(
            EvalErrorKind::TemplateNotFound,
            format!("template does not exist: {name}"),
        )
    }

    pub fn host_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::HostError, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    UndefinedVariable,
    UndefinedFilter,
    /// A `{% cycle name %}` reference ran before any binding named
    /// `name` existed in the render pass.
    UndefinedCycle,
    TypeError,
    NotIterable,
    TemplateNotFound,
    /// An included template failed to parse. The [`ParseError`] is
    /// available through [`EvalError::source`].
    IncludeSyntax,
    HostError,
    RecursionLimit,
    /// The render exceeded a configured node or iteration cap.
    ResourceLimit,
    /// The render was cancelled via an external cancellation token.
    Cancelled,
}
