//! Abstract syntax tree types for bobbin templates.
//!
//! - **Template layer** ([`template`]): nodes whose rendered strings are
//!   concatenated into the output, including the stateful cycle tags.
//! - **Expression layer** ([`expr`]): literals, context variables and
//!   filter chains. Results are escaped and stringified only when they
//!   reach the template level.

pub mod expr;
pub mod span;
pub mod template;
pub mod value;

pub use expr::*;
pub use span::{Span, Spanned};
pub use template::*;
pub use value::Value;
