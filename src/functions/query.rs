//! In-memory record store that text expressions are evaluated against.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::ast::value::Value;

use super::expr::{RowSource, TextExpr};
use super::{FieldKind, FunctionError};

// ── Schema ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldDef {
    /// A non-nullable column.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Ordered column definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    fn push(&mut self, field: FieldDef) {
        self.fields.push(field);
    }
}

// ── Records ─────────────────────────────────────────────────────────────

/// One row: column name to value, with [`Value::None`] as `NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Record::set).
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

impl RowSource for Record {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// A schema plus rows in insertion order.
#[derive(Debug, Clone)]
pub struct Table {
    schema: Schema,
    rows: Vec<Record>,
}

impl Table {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Insert a row. Omitted nullable columns become null.
    pub fn insert(&mut self, record: Record) -> Result<(), FunctionError> {
        if let Some(unknown) = record.values.keys().find(|k| self.schema.field(k).is_none()) {
            return Err(FunctionError::UnknownField(unknown.clone()));
        }

        let mut row = Record::new();
        for def in self.schema.fields() {
            let value = record.get(&def.name).cloned().unwrap_or(Value::None);
            if value.is_none() && !def.nullable {
                return Err(FunctionError::Integrity(def.name.clone()));
            }
            row.values.insert(def.name.clone(), value);
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ── Predicates ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            Comparison::Eq => ord == Ordering::Equal,
            Comparison::Ne => ord != Ordering::Equal,
            Comparison::Lt => ord == Ordering::Less,
            Comparison::Le => ord != Ordering::Greater,
            Comparison::Gt => ord == Ordering::Greater,
            Comparison::Ge => ord != Ordering::Less,
        }
    }
}

/// A row filter. Comparisons involving null are false.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: TextExpr,
        op: Comparison,
        right: TextExpr,
    },
    IsNull {
        expr: TextExpr,
        negated: bool,
    },
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(left: impl Into<TextExpr>, op: Comparison, right: impl Into<TextExpr>) -> Self {
        Predicate::Compare {
            left: left.into(),
            op,
            right: right.into(),
        }
    }

    pub fn eq(left: impl Into<TextExpr>, right: impl Into<TextExpr>) -> Self {
        Self::compare(left, Comparison::Eq, right)
    }

    pub fn le(left: impl Into<TextExpr>, right: impl Into<TextExpr>) -> Self {
        Self::compare(left, Comparison::Le, right)
    }

    pub fn is_null(expr: impl Into<TextExpr>) -> Self {
        Predicate::IsNull {
            expr: expr.into(),
            negated: false,
        }
    }

    pub fn is_not_null(expr: impl Into<TextExpr>) -> Self {
        Predicate::IsNull {
            expr: expr.into(),
            negated: true,
        }
    }

    fn resolve(&self, schema: &Schema) -> Result<(), FunctionError> {
        match self {
            Predicate::Compare { left, right, .. } => {
                left.output_kind(schema)?;
                right.output_kind(schema)?;
            }
            Predicate::IsNull { expr, .. } => {
                expr.output_kind(schema)?;
            }
            Predicate::And(parts) => {
                for part in parts {
                    part.resolve(schema)?;
                }
            }
        }
        Ok(())
    }

    fn matches(&self, row: &Record) -> Result<bool, FunctionError> {
        match self {
            Predicate::Compare { left, op, right } => {
                let l = left.evaluate(row)?;
                let r = right.evaluate(row)?;
                Ok(compare_values(&l, &r)?.is_some_and(|ord| op.holds(ord)))
            }
            Predicate::IsNull { expr, negated } => Ok(expr.evaluate(row)?.is_none() != *negated),
            Predicate::And(parts) => {
                for part in parts {
                    if !part.matches(row)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

/// SQL-style comparison: `None` when either side is null.
fn compare_values(left: &Value, right: &Value) -> Result<Option<Ordering>, FunctionError> {
    match (left, right) {
        (Value::None, _) | (_, Value::None) => Ok(None),
        (Value::Number(a), Value::Number(b)) => Ok(a.partial_cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(Some(a.cmp(b))),
        (a, b) => match (a.as_string(), b.as_string()) {
            (Some(x), Some(y)) => Ok(Some(x.cmp(y))),
            _ => Err(FunctionError::Incomparable {
                left: a.type_name(),
                right: b.type_name(),
            }),
        },
    }
}

/// Total order for `order_by`: null first, then numbers, then everything
/// else by its text form.
fn sort_order(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::None, Value::None) => Ordering::Equal,
        (Value::None, _) => Ordering::Less,
        (_, Value::None) => Ordering::Greater,
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        (a, b) => a.to_output_string().cmp(&b.to_output_string()),
    }
}

// ── Query ───────────────────────────────────────────────────────────────

/// Rows fetched by [`Query::fetch`]: base columns, then annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    /// Column names with their resolved kind; `None` for an annotation
    /// that is always null.
    pub columns: Vec<(String, Option<FieldKind>)>,
    pub rows: Vec<Record>,
}

impl ResultSet {
    /// Every row's value for `name`, in row order.
    pub fn column(&self, name: &str) -> Vec<Value> {
        self.rows
            .iter()
            .map(|r| r.get(name).cloned().unwrap_or(Value::None))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Annotations, filters and ordering over a [`Table`].
///
/// Nothing runs until [`fetch`](Query::fetch), [`count`](Query::count) or
/// [`update`](Query::update). Each of them resolves every expression
/// against the schema first, so validation errors never leave partial
/// results behind.
#[derive(Debug, Clone, Default)]
pub struct Query {
    annotations: Vec<(String, TextExpr)>,
    filters: Vec<Predicate>,
    ordering: Vec<String>,
}

/// A query after schema resolution.
struct Resolved<'q> {
    query: &'q Query,
    schema: Schema,
    columns: Vec<(String, Option<FieldKind>)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a derived column. Later annotations may refer to earlier ones.
    pub fn annotate(mut self, name: impl Into<String>, expr: TextExpr) -> Self {
        self.annotations.push((name.into(), expr));
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Sort by a column or annotation; prefix with `-` for descending.
    pub fn order_by(mut self, key: impl Into<String>) -> Self {
        self.ordering.push(key.into());
        self
    }

    fn resolve(&self, base: &Schema) -> Result<Resolved<'_>, FunctionError> {
        let mut schema = base.clone();
        let mut columns: Vec<_> = base
            .fields()
            .iter()
            .map(|f| (f.name.clone(), Some(f.kind)))
            .collect();

        for (name, expr) in &self.annotations {
            if schema.field(name).is_some() {
                return Err(FunctionError::Conflict(name.clone()));
            }
            let kind = expr.output_kind(&schema)?;
            schema.push(FieldDef {
                name: name.clone(),
                kind: kind.unwrap_or(FieldKind::Char),
                nullable: true,
            });
            columns.push((name.clone(), kind));
        }

        for predicate in &self.filters {
            predicate.resolve(&schema)?;
        }

        for key in &self.ordering {
            let name = key.strip_prefix('-').unwrap_or(key);
            if schema.field(name).is_none() {
                return Err(FunctionError::UnknownField(name.to_string()));
            }
        }

        Ok(Resolved {
            query: self,
            schema,
            columns,
        })
    }

    pub fn fetch(&self, table: &Table) -> Result<ResultSet, FunctionError> {
        let resolved = self.resolve(table.schema())?;
        let mut rows = Vec::new();
        for row in table.rows() {
            if let Some(annotated) = resolved.select(row)? {
                rows.push(annotated);
            }
        }
        resolved.sort(&mut rows);

        Ok(ResultSet {
            columns: resolved.columns,
            rows,
        })
    }

    pub fn count(&self, table: &Table) -> Result<usize, FunctionError> {
        let resolved = self.resolve(table.schema())?;
        let mut count = 0;
        for row in table.rows() {
            if resolved.select(row)?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Assign `expr` to each named column on every matching row.
    ///
    /// All assignments of a row are computed from its values before the
    /// update, and no row is written unless every row succeeds. Returns
    /// the number of updated rows. At least one assignment is required.
    pub fn update(
        &self,
        table: &mut Table,
        assignments: Vec<(&str, TextExpr)>,
    ) -> Result<usize, FunctionError> {
        if assignments.is_empty() {
            return Err(FunctionError::InvalidArgument(
                "update requires at least one assignment".to_string(),
            ));
        }
        let resolved = self.resolve(table.schema())?;

        for (column, expr) in &assignments {
            if table.schema().field(column).is_none() {
                return Err(FunctionError::UnknownField(column.to_string()));
            }
            expr.output_kind(&resolved.schema)?;
        }

        let mut writes = Vec::new();
        for (index, row) in table.rows().iter().enumerate() {
            let Some(annotated) = resolved.select(row)? else {
                continue;
            };
            let mut values = Vec::with_capacity(assignments.len());
            for (column, expr) in &assignments {
                let value = expr.evaluate(&annotated)?;
                let nullable = table.schema().field(column).is_some_and(|f| f.nullable);
                if value.is_none() && !nullable {
                    return Err(FunctionError::Integrity(column.to_string()));
                }
                values.push((column.to_string(), value));
            }
            writes.push((index, values));
        }

        let updated = writes.len();
        for (index, values) in writes {
            let row = &mut table.rows[index];
            for (column, value) in values {
                row.values.insert(column, value);
            }
        }

        tracing::debug!(rows = updated, columns = assignments.len(), "table updated");
        Ok(updated)
    }
}

impl Resolved<'_> {
    /// Annotate `row` and test it against every filter.
    fn select(&self, row: &Record) -> Result<Option<Record>, FunctionError> {
        let mut annotated = row.clone();
        for (name, expr) in &self.query.annotations {
            let value = expr.evaluate(&annotated)?;
            annotated.values.insert(name.clone(), value);
        }

        for predicate in &self.query.filters {
            if !predicate.matches(&annotated)? {
                tracing::trace!("row filtered out");
                return Ok(None);
            }
        }
        Ok(Some(annotated))
    }

    fn sort(&self, rows: &mut [Record]) {
        if self.query.ordering.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            for key in &self.query.ordering {
                let (name, descending) = match key.strip_prefix('-') {
                    Some(name) => (name, true),
                    None => (key.as_str(), false),
                };
                let left = a.get(name).unwrap_or(&Value::None);
                let right = b.get(name).unwrap_or(&Value::None);
                let ord = sort_order(left, right);
                let ord = if descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn authors() -> Table {
        let mut table = Table::new(Schema::new(vec![
            FieldDef::new("name", FieldKind::Char),
            FieldDef::new("alias", FieldKind::Char).nullable(),
            FieldDef::new("goes_by", FieldKind::Char).nullable(),
        ]));
        table
            .insert(Record::new().with("name", "John Smith").with("alias", "smithj"))
            .unwrap();
        table.insert(Record::new().with("name", "Rhonda")).unwrap();
        table
    }

    #[test]
    fn test_insert_fills_nullable_columns() {
        let table = authors();
        assert_eq!(table.rows()[1].get("alias"), Some(&Value::None));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_insert_rejects_bad_rows() {
        let mut table = authors();
        assert_eq!(
            table.insert(Record::new().with("alias", "x")),
            Err(FunctionError::Integrity("name".into()))
        );
        assert_eq!(
            table.insert(Record::new().with("name", "x").with("age", 3i64)),
            Err(FunctionError::UnknownField("age".into()))
        );
    }

    #[test]
    fn test_annotation_conflict() {
        let err = Query::new()
            .annotate("name", TextExpr::lower("name"))
            .fetch(&authors())
            .unwrap_err();
        assert_eq!(err, FunctionError::Conflict("name".into()));
    }

    #[test]
    fn test_later_annotation_sees_earlier() {
        let rows = Query::new()
            .annotate("short", TextExpr::substr("name", 1, Some(4)).unwrap())
            .annotate("loud", TextExpr::upper("short"))
            .order_by("name")
            .fetch(&authors())
            .unwrap();
        assert_eq!(rows.column("loud"), [Value::from("JOHN"), Value::from("RHON")]);
    }

    #[test]
    fn test_null_sorts_first_and_descending() {
        let rows = Query::new().order_by("alias").fetch(&authors()).unwrap();
        assert_eq!(rows.column("name"), [Value::from("Rhonda"), Value::from("John Smith")]);

        let rows = Query::new().order_by("-name").fetch(&authors()).unwrap();
        assert_eq!(rows.column("name"), [Value::from("Rhonda"), Value::from("John Smith")]);
    }

    #[test]
    fn test_unknown_ordering_key() {
        let err = Query::new().order_by("-nope").fetch(&authors()).unwrap_err();
        assert_eq!(err, FunctionError::UnknownField("nope".into()));
    }

    #[test]
    fn test_null_comparison_is_false() {
        let count = Query::new()
            .filter(Predicate::eq("alias", "alias"))
            .count(&authors())
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_null_checks() {
        let table = authors();
        let count = |predicate| Query::new().filter(predicate).count(&table).unwrap();
        assert_eq!(count(Predicate::is_null("alias")), 1);
        assert_eq!(count(Predicate::is_not_null("alias")), 1);
        assert_eq!(count(Predicate::is_not_null(TextExpr::length("name"))), 2);
    }

    #[test]
    fn test_and_requires_every_part() {
        let mut table = authors();
        table
            .insert(Record::new().with("name", "Al").with("alias", "alexander"))
            .unwrap();

        let short_alias = Predicate::And(vec![
            Predicate::is_not_null("alias"),
            Predicate::le(TextExpr::length("alias"), TextExpr::length("name")),
        ]);
        let rows = Query::new().filter(short_alias).fetch(&table).unwrap();
        assert_eq!(rows.column("name"), [Value::from("John Smith")]);
    }

    #[test]
    fn test_and_stops_at_first_false_part() {
        // The comparison would fail on any row that has an alias.
        let count = Query::new()
            .filter(Predicate::And(vec![
                Predicate::is_null("alias"),
                Predicate::le(TextExpr::length("name"), "alias"),
            ]))
            .count(&authors())
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_incomparable_values() {
        let err = Query::new()
            .filter(Predicate::le(TextExpr::length("name"), "name"))
            .count(&authors())
            .unwrap_err();
        assert!(matches!(err, FunctionError::Incomparable { .. }));
    }

    #[test]
    fn test_update_is_read_then_write() {
        let mut table = authors();
        let updated = Query::new()
            .update(
                &mut table,
                vec![
                    ("name", TextExpr::upper("name")),
                    ("goes_by", TextExpr::field("name")),
                ],
            )
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(table.rows()[1].get("name"), Some(&Value::from("RHONDA")));
        assert_eq!(table.rows()[1].get("goes_by"), Some(&Value::from("Rhonda")));
    }

    #[test]
    fn test_update_integrity_error_writes_nothing() {
        let mut table = authors();
        let err = Query::new()
            .update(&mut table, vec![("name", TextExpr::field("alias"))])
            .unwrap_err();
        assert_eq!(err, FunctionError::Integrity("name".into()));
        assert_eq!(table.rows()[0].get("name"), Some(&Value::from("John Smith")));
    }

    #[test]
    fn test_update_unknown_column() {
        let mut table = authors();
        let err = Query::new()
            .update(&mut table, vec![("nope", TextExpr::field("name"))])
            .unwrap_err();
        assert_eq!(err, FunctionError::UnknownField("nope".into()));
    }

    #[test]
    fn test_update_without_assignments() {
        let mut table = authors();
        let err = Query::new().update(&mut table, Vec::new()).unwrap_err();
        assert!(matches!(err, FunctionError::InvalidArgument(_)));
        assert_eq!(table.rows(), authors().rows());
    }
}
