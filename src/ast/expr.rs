use super::{span::Spanned, value::Value};

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Literal value: 'hello', "hello", 42
    Literal(Value),

    /// Context variable: `name`. Resolved at every evaluation.
    Variable(VariableRef),

    /// Filter application: `base|name` or `base|name:arg`.
    /// Chains nest left to right, so `a|lower|upper` is
    /// `Filtered(Filtered(a, lower), upper)`.
    Filtered {
        base: Box<Expr>,
        filter: FilterCall,
    },

    /// Unary operation: `not expr` in `{% if %}` conditions.
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
}

#[derive(Debug, Clone)]
pub struct VariableRef {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct FilterCall {
    pub name: String,
    pub arg: Option<Box<Expr>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

impl ExprKind {
    /// The bare variable name if this expression is nothing but a
    /// variable reference. Used to tell a `{% cycle name %}` reference
    /// apart from a one-value definition.
    pub fn as_bare_variable(&self) -> Option<&str> {
        match self {
            ExprKind::Variable(var) => Some(&var.name),
            _ => None,
        }
    }
}
