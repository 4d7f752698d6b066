//! Filters every [`Registry`](super::Registry) starts with.

use super::{ArgSpec, ClosureFilter, Registry};
use crate::ast::value::Value;
use crate::eval::html_escape;

pub(super) fn register_all(registry: &mut Registry) {
    registry.register_filter(
        ClosureFilter::new("lower", |value, _| {
            Ok(Value::String(value.to_output_string().to_lowercase()))
        })
        .arg(ArgSpec::None)
        .safe(true),
    );

    registry.register_filter(
        ClosureFilter::new("upper", |value, _| {
            Ok(Value::String(value.to_output_string().to_uppercase()))
        })
        .arg(ArgSpec::None)
        .safe(true),
    );

    registry.register_filter(
        ClosureFilter::new("length", |value, _| {
            let len = match &value {
                Value::Array(items) => items.len(),
                Value::String(s) | Value::Markup(s) => s.chars().count(),
                _ => 0,
            };
            Ok(Value::from(len))
        })
        .arg(ArgSpec::None),
    );

    registry.register_filter(
        ClosureFilter::new("default", |value, arg| {
            if value.is_truthy() {
                Ok(value)
            } else {
                Ok(arg.unwrap_or(Value::None))
            }
        })
        .arg(ArgSpec::Required),
    );

    registry.register_filter(
        ClosureFilter::new("safe", |value, _| {
            Ok(match value {
                Value::Markup(s) => Value::Markup(s),
                other => Value::Markup(other.to_output_string()),
            })
        })
        .arg(ArgSpec::None),
    );

    // Escapes once: markup passes through.
    registry.register_filter(
        ClosureFilter::new("escape", |value, _| {
            Ok(match value {
                Value::Markup(s) => Value::Markup(s),
                other => Value::Markup(html_escape(&other.to_output_string())),
            })
        })
        .arg(ArgSpec::None),
    );

    registry.register_filter(
        ClosureFilter::new("force_escape", |value, _| {
            Ok(Value::Markup(html_escape(&value.to_output_string())))
        })
        .arg(ArgSpec::None),
    );
}
