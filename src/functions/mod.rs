//! Database text functions evaluated against in-memory records.
//!
//! [`TextExpr`] trees (`Coalesce`, `Concat`, `Upper`, `Lower`, `Length`,
//! `Substr`) are built once, validated at construction, resolved against
//! a [`Schema`] and then evaluated per row. A [`Query`] uses them for
//! annotations, filter predicates and read-then-write updates of a
//! [`Table`].
//!
//! ```rust
//! use bobbin::functions::{FieldDef, FieldKind, Query, Record, Schema, Table, TextExpr};
//!
//! let schema = Schema::new(vec![
//!     FieldDef::new("name", FieldKind::Char),
//!     FieldDef::new("alias", FieldKind::Char).nullable(),
//! ]);
//! let mut authors = Table::new(schema);
//! authors.insert(Record::new().with("name", "John Smith").with("alias", "smithj")).unwrap();
//! authors.insert(Record::new().with("name", "Rhonda")).unwrap();
//!
//! let display = TextExpr::coalesce(["alias", "name"]).unwrap();
//! let rows = Query::new()
//!     .annotate("display_name", display)
//!     .order_by("name")
//!     .fetch(&authors)
//!     .unwrap();
//! assert_eq!(rows.column("display_name"), ["smithj", "Rhonda"].map(bobbin::Value::from));
//! ```

use std::fmt;

use thiserror::Error;

mod expr;
mod query;

pub use expr::{RowSource, TextExpr};
pub use query::{Comparison, FieldDef, Predicate, Query, Record, ResultSet, Schema, Table};

/// Column type of a field or of an expression's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Bounded text.
    Char,
    /// Long text.
    Text,
    Integer,
}

impl FieldKind {
    pub fn is_textual(self) -> bool {
        matches!(self, FieldKind::Char | FieldKind::Text)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Char => "CharField",
            FieldKind::Text => "TextField",
            FieldKind::Integer => "IntegerField",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    #[error("{function} must take at least two expressions")]
    Arity { function: &'static str },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("cannot resolve keyword '{0}' into field")]
    UnknownField(String),

    #[error("expression contains mixed types: {left}, {right}. You must set output_field")]
    MixedTypes { left: FieldKind, right: FieldKind },

    #[error("the annotation '{0}' conflicts with a field on the model")]
    Conflict(String),

    #[error("cannot compare {left} with {right}")]
    Incomparable {
        left: &'static str,
        right: &'static str,
    },

    #[error("NOT NULL constraint failed: {0}")]
    Integrity(String),
}
