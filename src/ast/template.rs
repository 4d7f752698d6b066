use super::expr::{Expr, ExprKind, FilterCall};
use super::span::Spanned;

/// A template is the top-level AST unit. It contains a sequence of nodes
/// whose evaluated string outputs are concatenated to produce the final result.
#[derive(Debug, Clone)]
pub struct Template {
    pub nodes: Vec<Node>,
}

pub type Node = Spanned<NodeKind>;

/// The kinds of content that can appear in a template.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Raw text between tags, emitted unchanged.
    Literal(String),

    /// `{{ expr }}`. The value passes through autoescaping.
    Expression(ExprKind),

    /// Defining `{% cycle v1 v2 ... [as name [silent]] %}`.
    Cycle(CycleNode),

    /// `{% cycle name %}`, stepping a binding defined earlier.
    CycleRef(CycleRef),

    /// `{% if [not] expr %}...{% else %}...{% endif %}`
    IfBlock(IfBlock),

    /// `{% for item in expr %}...{% endfor %}`
    ForEach(ForEachBlock),

    /// `{% autoescape on|off %}...{% endautoescape %}`
    Autoescape(AutoescapeBlock),

    /// `{% filter f1|f2 %}...{% endfilter %}`
    FilterBlock(FilterBlock),

    /// `{% include expr %}`
    Include(Include),
}

/// Identity of one defining cycle tag.
///
/// Unnamed cycles keep their rotation index under this key, and named
/// bindings remember which tag created them so that re-evaluating the
/// same tag (e.g. inside a loop) continues the rotation instead of
/// restarting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CycleKey {
    /// Unique per parsed template.
    pub template: u64,
    /// Position of the tag among the template's cycle tags.
    pub ordinal: u32,
}

#[derive(Debug, Clone)]
pub struct CycleNode {
    pub key: CycleKey,
    /// At least one value.
    pub values: Vec<Expr>,
    pub binding: Option<CycleBinding>,
}

/// The `as name [silent]` clause of a defining cycle tag.
#[derive(Debug, Clone)]
pub struct CycleBinding {
    pub name: String,
    pub silent: bool,
}

#[derive(Debug, Clone)]
pub struct CycleRef {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct IfBlock {
    pub condition: Expr,
    pub body: Template,
    pub else_body: Option<Template>,
}

/// A `{% for binding in iterable %}...{% endfor %}` block.
///
/// The binding is scoped to the loop body and shadows any context
/// variable or cycle value with the same name.
#[derive(Debug, Clone)]
pub struct ForEachBlock {
    /// Name of the variable bound on each iteration.
    pub binding: String,
    /// Expression that must evaluate to an `Array`.
    pub iterable: Expr,
    /// Template body, evaluated once per element.
    pub body: Template,
}

#[derive(Debug, Clone)]
pub struct AutoescapeBlock {
    pub enabled: bool,
    pub body: Template,
}

#[derive(Debug, Clone)]
pub struct FilterBlock {
    /// Applied in order to the rendered body.
    pub filters: Vec<FilterCall>,
    pub body: Template,
}

#[derive(Debug, Clone)]
pub struct Include {
    /// Evaluates to the name handed to
    /// [`EvalContext::load_template`](crate::EvalContext::load_template).
    pub name: Expr,
}
