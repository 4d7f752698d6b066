use crate::ast::value::Value;

use super::query::Schema;
use super::{FieldKind, FunctionError};

/// Named, nullable field lookup for the row an expression is evaluated
/// against.
///
/// Returns `None` for a column the row does not have; a SQL `NULL` is
/// `Some(&Value::None)`.
pub trait RowSource {
    fn field(&self, name: &str) -> Option<&Value>;
}

/// A text function expression tree.
///
/// Prefer the validating constructors ([`TextExpr::coalesce`],
/// [`TextExpr::concat`], [`TextExpr::substr`]) over building variants by
/// hand; [`TextExpr::output_kind`] re-checks the same rules.
#[derive(Debug, Clone, PartialEq)]
pub enum TextExpr {
    /// A column of the current row.
    Field(String),
    /// A literal value.
    Value(Value),
    /// First non-null argument.
    Coalesce {
        args: Vec<TextExpr>,
        output: Option<FieldKind>,
    },
    /// Concatenation of all arguments, with null as the empty string.
    Concat {
        args: Vec<TextExpr>,
        output: Option<FieldKind>,
    },
    Upper(Box<TextExpr>),
    Lower(Box<TextExpr>),
    /// Character count.
    Length(Box<TextExpr>),
    /// 1-indexed substring of `length` characters starting at `pos`.
    Substr {
        arg: Box<TextExpr>,
        pos: usize,
        length: Option<usize>,
    },
}

impl From<&str> for TextExpr {
    /// A bare string names a field, as in `Coalesce('alias', 'name')`.
    fn from(name: &str) -> Self {
        TextExpr::Field(name.to_string())
    }
}

impl From<Value> for TextExpr {
    fn from(value: Value) -> Self {
        TextExpr::Value(value)
    }
}

impl TextExpr {
    pub fn field(name: impl Into<String>) -> Self {
        TextExpr::Field(name.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        TextExpr::Value(value.into())
    }

    pub fn coalesce<I, E>(args: I) -> Result<Self, FunctionError>
    where
        I: IntoIterator<Item = E>,
        E: Into<TextExpr>,
    {
        let args = collect_args("Coalesce", args)?;
        Ok(TextExpr::Coalesce { args, output: None })
    }

    pub fn concat<I, E>(args: I) -> Result<Self, FunctionError>
    where
        I: IntoIterator<Item = E>,
        E: Into<TextExpr>,
    {
        let args = collect_args("Concat", args)?;
        Ok(TextExpr::Concat { args, output: None })
    }

    pub fn upper(arg: impl Into<TextExpr>) -> Self {
        TextExpr::Upper(Box::new(arg.into()))
    }

    pub fn lower(arg: impl Into<TextExpr>) -> Self {
        TextExpr::Lower(Box::new(arg.into()))
    }

    pub fn length(arg: impl Into<TextExpr>) -> Self {
        TextExpr::Length(Box::new(arg.into()))
    }

    /// `Substr(arg, pos, length)`. `pos` is 1-indexed and must be at least
    /// 1; `length: None` extends to the end of the string.
    pub fn substr(
        arg: impl Into<TextExpr>,
        pos: i64,
        length: Option<i64>,
    ) -> Result<Self, FunctionError> {
        if pos < 1 {
            return Err(FunctionError::InvalidArgument(
                "'pos' must be greater than 0".to_string(),
            ));
        }
        let length = match length {
            Some(n) if n < 0 => {
                return Err(FunctionError::InvalidArgument(
                    "'length' must be greater than or equal to 0".to_string(),
                ));
            }
            Some(n) => Some(n as usize),
            None => None,
        };
        Ok(TextExpr::Substr {
            arg: Box::new(arg.into()),
            pos: pos as usize,
            length,
        })
    }

    /// Set an explicit output kind on `Coalesce` or `Concat`. Other
    /// expressions are returned unchanged.
    pub fn with_output_field(self, kind: FieldKind) -> Self {
        match self {
            TextExpr::Coalesce { args, .. } => TextExpr::Coalesce {
                args,
                output: Some(kind),
            },
            TextExpr::Concat { args, .. } => TextExpr::Concat {
                args,
                output: Some(kind),
            },
            other => other,
        }
    }

    /// Resolve this expression against `schema` and infer its output kind.
    ///
    /// `Ok(None)` means the kind is unconstrained (a null literal). Every
    /// validation error an expression can raise surfaces here, before
    /// any row is evaluated.
    pub fn output_kind(&self, schema: &Schema) -> Result<Option<FieldKind>, FunctionError> {
        match self {
            TextExpr::Field(name) => schema
                .field(name)
                .map(|def| Some(def.kind))
                .ok_or_else(|| FunctionError::UnknownField(name.clone())),

            TextExpr::Value(value) => Ok(match value {
                Value::None => None,
                Value::Number(_) => Some(FieldKind::Integer),
                _ => Some(FieldKind::Char),
            }),

            TextExpr::Coalesce { args, output } => {
                check_arity("Coalesce", args)?;
                let mut common: Option<FieldKind> = None;
                for arg in args {
                    let Some(kind) = arg.output_kind(schema)? else {
                        continue;
                    };
                    common = Some(match common {
                        None => kind,
                        Some(prev) => match widen(prev, kind) {
                            Some(k) => k,
                            None if output.is_some() => prev,
                            None => {
                                return Err(FunctionError::MixedTypes {
                                    left: prev,
                                    right: kind,
                                });
                            }
                        },
                    });
                }
                Ok(output.or(common))
            }

            TextExpr::Concat { args, output } => {
                check_arity("Concat", args)?;
                let mut any_text = false;
                for arg in args {
                    any_text |= arg.output_kind(schema)? == Some(FieldKind::Text);
                }
                let inferred = if any_text {
                    FieldKind::Text
                } else {
                    FieldKind::Char
                };
                Ok(Some(output.unwrap_or(inferred)))
            }

            TextExpr::Upper(arg) | TextExpr::Lower(arg) | TextExpr::Substr { arg, .. } => {
                Ok(arg.output_kind(schema)?.map(|kind| match kind {
                    FieldKind::Integer => FieldKind::Char,
                    textual => textual,
                }))
            }

            TextExpr::Length(arg) => {
                arg.output_kind(schema)?;
                Ok(Some(FieldKind::Integer))
            }
        }
    }

    /// Evaluate against one row. Null is [`Value::None`].
    pub fn evaluate(&self, row: &impl RowSource) -> Result<Value, FunctionError> {
        match self {
            TextExpr::Field(name) => row
                .field(name)
                .cloned()
                .ok_or_else(|| FunctionError::UnknownField(name.clone())),

            TextExpr::Value(value) => Ok(value.clone()),

            TextExpr::Coalesce { args, .. } => {
                for arg in args {
                    let value = arg.evaluate(row)?;
                    if !value.is_none() {
                        return Ok(value);
                    }
                }
                Ok(Value::None)
            }

            TextExpr::Concat { args, .. } => {
                let mut out = String::new();
                for arg in args {
                    out.push_str(&arg.evaluate(row)?.to_output_string());
                }
                Ok(Value::String(out))
            }

            TextExpr::Upper(arg) => map_text(arg.evaluate(row)?, |s| s.to_uppercase()),
            TextExpr::Lower(arg) => map_text(arg.evaluate(row)?, |s| s.to_lowercase()),

            TextExpr::Length(arg) => Ok(match arg.evaluate(row)? {
                Value::None => Value::None,
                value => Value::from(value.to_output_string().chars().count()),
            }),

            TextExpr::Substr { arg, pos, length } => map_text(arg.evaluate(row)?, |s| {
                let chars = s.chars().skip(pos.saturating_sub(1));
                match length {
                    Some(n) => chars.take(*n).collect(),
                    None => chars.collect(),
                }
            }),
        }
    }
}

fn collect_args<I, E>(function: &'static str, args: I) -> Result<Vec<TextExpr>, FunctionError>
where
    I: IntoIterator<Item = E>,
    E: Into<TextExpr>,
{
    let args: Vec<TextExpr> = args.into_iter().map(Into::into).collect();
    check_arity(function, &args)?;
    Ok(args)
}

fn check_arity(function: &'static str, args: &[TextExpr]) -> Result<(), FunctionError> {
    if args.len() < 2 {
        return Err(FunctionError::Arity { function });
    }
    Ok(())
}

/// Common kind of two argument kinds, `None` if they cannot mix.
fn widen(a: FieldKind, b: FieldKind) -> Option<FieldKind> {
    match (a, b) {
        _ if a == b => Some(a),
        (x, y) if x.is_textual() && y.is_textual() => Some(FieldKind::Text),
        _ => None,
    }
}

/// Apply a string transform, propagating null.
fn map_text(value: Value, f: impl FnOnce(&str) -> String) -> Result<Value, FunctionError> {
    Ok(match value {
        Value::None => Value::None,
        other => Value::String(f(&other.to_output_string())),
    })
}
