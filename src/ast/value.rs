use std::fmt;

/// Runtime values shared by templates and text functions.
///
/// Templates render a `Value` through [`to_output_string`](Value::to_output_string),
/// escaping it first unless it is [`Value::Markup`]. Text functions use
/// [`Value::None`] as SQL `NULL`.
///
/// Conversions from common Rust types:
///
/// ```rust
/// use bobbin::Value;
///
/// let s: Value = "hello".into();
/// let n: Value = 42i64.into();
/// let b: Value = true.into();
/// let a: Value = vec!["a", "b"].into();
/// let null: Value = Option::<&str>::None.into();
/// assert!(null.is_none());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    /// A string that has been marked safe for HTML output. Autoescaping
    /// leaves it untouched.
    Markup(String),
    Number(f64),
    Bool(bool),
    Array(Vec<Value>),
    /// The absence of a value. Falsy, renders as an empty string.
    None,
}

impl Value {
    /// Convert this value to its plain text form.
    ///
    /// - `String` / `Markup`: returned as-is
    /// - `Number`: formatted without trailing `.0` for whole numbers
    /// - `Bool`: `"True"` or `"False"`
    /// - `Array`: elements joined with `", "`
    /// - `None`: empty string
    pub fn to_output_string(&self) -> String {
        match self {
            Value::String(s) | Value::Markup(s) => s.clone(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    format!("{}", *n as i64)
                } else {
                    format!("{n}")
                }
            }
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::Array(items) => items
                .iter()
                .map(|v| v.to_output_string())
                .collect::<Vec<_>>()
                .join(", "),
            Value::None => String::new(),
        }
    }

    /// Type name for diagnostic messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) | Value::Markup(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Array(_) => "array",
            Value::None => "none",
        }
    }

    /// Falsy values: empty string, `0`, `false`, empty array, `None`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::String(s) | Value::Markup(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0,
            Value::Bool(b) => *b,
            Value::Array(a) => !a.is_empty(),
            Value::None => false,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Whether autoescaping must leave this value alone.
    pub fn is_safe(&self) -> bool {
        matches!(self, Value::Markup(_))
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Markup(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_output_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::None)
    }
}
