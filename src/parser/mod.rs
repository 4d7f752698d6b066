//! Template parser, built on [pest](https://pest.rs/).
//!
//! The grammar lives in `bobbin.pest`. This module turns pest's parse
//! tree into the typed AST in [`crate::ast`] and performs the checks the
//! grammar cannot express, most importantly the positional analysis of
//! `{% cycle %}` arguments and the "defined earlier" rule for
//! `{% cycle name %}` references.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;

use crate::ast::expr::*;
use crate::ast::span::{Span, Spanned};
use crate::ast::template::*;
use crate::ast::value::Value;
use crate::error::ParseError;

#[derive(Parser)]
#[grammar = "parser/bobbin.pest"]
struct BobbinParser;

static NEXT_TEMPLATE_ID: AtomicU64 = AtomicU64::new(1);

/// Parse source text into a [`Template`] AST.
///
/// Returns every [`ParseError`] found at the top level; each carries a
/// source [`Span`](crate::Span) for diagnostics.
pub fn parse(source: &str) -> Result<Template, Vec<ParseError>> {
    parse_with_cycles(source, std::iter::empty::<&str>())
}

/// Parse a template that will be rendered inside a pass where the named
/// cycles in `known_cycles` are already bound.
///
/// This is how an included template may refer to `{% cycle name %}`
/// defined by the template that includes it.
pub fn parse_with_cycles<I, S>(source: &str, known_cycles: I) -> Result<Template, Vec<ParseError>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let pairs = BobbinParser::parse(Rule::template, source).map_err(|e| {
        let span = pest_span_to_span(&e);
        vec![
            ParseError::new(span, format!("template syntax error: {}", e.variant.message()))
                .with_hint("check that every block tag has its matching end tag"),
        ]
    })?;

    let mut builder = Builder::new(known_cycles.into_iter().map(Into::into).collect());
    let mut nodes = Vec::new();
    let mut errors = Vec::new();

    for pair in pairs {
        if pair.as_rule() != Rule::template {
            continue;
        }
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::EOI {
                break;
            }
            match builder.build_node(inner) {
                Ok(Some(node)) => nodes.push(node),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }
    }

    if !errors.is_empty() {
        tracing::debug!(count = errors.len(), "template rejected");
        return Err(errors);
    }

    tracing::trace!(
        template = builder.template_id,
        nodes = nodes.len(),
        cycles = builder.next_ordinal,
        "parsed template"
    );
    Ok(Template { nodes })
}

fn pest_span_to_span(e: &pest::error::Error<Rule>) -> Span {
    match &e.location {
        pest::error::InputLocation::Pos(p) => Span::new(*p, *p + 1),
        pest::error::InputLocation::Span((s, e)) => Span::new(*s, *e),
    }
}

fn pair_span(pair: &Pair<Rule>) -> Span {
    let s = pair.as_span();
    Span::new(s.start(), s.end())
}

/// Take the next child pair, turning a grammar/builder mismatch into a
/// regular error instead of a panic.
fn next_pair<'i>(
    pairs: &mut Pairs<'i, Rule>,
    span: Span,
    what: &str,
) -> Result<Pair<'i, Rule>, ParseError> {
    pairs
        .next()
        .ok_or_else(|| ParseError::new(span, format!("malformed tag: missing {what}")))
}

// -- Builder -------------------------------------------------------------

/// Walks pest pairs in document order, so "defined earlier" for cycle
/// names means earlier in the source.
struct Builder {
    template_id: u64,
    next_ordinal: u32,
    named_cycles: HashSet<String>,
}

impl Builder {
    fn new(named_cycles: HashSet<String>) -> Self {
        Self {
            template_id: NEXT_TEMPLATE_ID.fetch_add(1, Ordering::Relaxed),
            next_ordinal: 0,
            named_cycles,
        }
    }

    fn build_node(&mut self, pair: Pair<Rule>) -> Result<Option<Node>, ParseError> {
        let span = pair_span(&pair);

        let kind = match pair.as_rule() {
            Rule::literal_text => NodeKind::Literal(pair.as_str().to_string()),
            Rule::variable => {
                let mut inner = pair.into_inner();
                let expr = build_filter_expr(next_pair(&mut inner, span, "expression")?)?;
                NodeKind::Expression(expr.node)
            }
            Rule::cycle_tag => self.build_cycle(pair, span)?,
            Rule::for_block => NodeKind::ForEach(self.build_for(pair, span)?),
            Rule::if_block => NodeKind::IfBlock(self.build_if(pair, span)?),
            Rule::autoescape_block => NodeKind::Autoescape(self.build_autoescape(pair, span)?),
            Rule::filter_block => NodeKind::FilterBlock(self.build_filter_block(pair, span)?),
            Rule::include_tag => {
                let mut inner = pair.into_inner();
                let name = build_filter_expr(next_pair(&mut inner, span, "template name")?)?;
                NodeKind::Include(Include { name })
            }
            _ => return Ok(None),
        };

        Ok(Some(Spanned::new(kind, span)))
    }

    fn build_body(&mut self, pair: Pair<Rule>) -> Result<Template, ParseError> {
        let mut nodes = Vec::new();
        for child in pair.into_inner() {
            if let Some(node) = self.build_node(child)? {
                nodes.push(node);
            }
        }
        Ok(Template { nodes })
    }

    // -- Block tags ------------------------------------------------------

    fn build_for(&mut self, pair: Pair<Rule>, span: Span) -> Result<ForEachBlock, ParseError> {
        let mut inner = pair.into_inner();
        let binding = next_pair(&mut inner, span, "loop variable")?.as_str().to_string();
        let iterable = build_filter_expr(next_pair(&mut inner, span, "iterable")?)?;
        let body = self.build_body(next_pair(&mut inner, span, "loop body")?)?;

        Ok(ForEachBlock {
            binding,
            iterable,
            body,
        })
    }

    fn build_if(&mut self, pair: Pair<Rule>, span: Span) -> Result<IfBlock, ParseError> {
        let mut inner = pair.into_inner();
        let condition = build_condition(next_pair(&mut inner, span, "condition")?)?;
        let body = self.build_body(next_pair(&mut inner, span, "if body")?)?;

        let else_body = match inner.next() {
            Some(else_pair) => {
                let else_span = pair_span(&else_pair);
                let mut else_inner = else_pair.into_inner();
                Some(self.build_body(next_pair(&mut else_inner, else_span, "else body")?)?)
            }
            None => None,
        };

        Ok(IfBlock {
            condition,
            body,
            else_body,
        })
    }

    fn build_autoescape(
        &mut self,
        pair: Pair<Rule>,
        span: Span,
    ) -> Result<AutoescapeBlock, ParseError> {
        let mut inner = pair.into_inner();
        let enabled = next_pair(&mut inner, span, "'on' or 'off'")?.as_str() == "on";
        let body = self.build_body(next_pair(&mut inner, span, "autoescape body")?)?;
        Ok(AutoescapeBlock { enabled, body })
    }

    fn build_filter_block(
        &mut self,
        pair: Pair<Rule>,
        span: Span,
    ) -> Result<FilterBlock, ParseError> {
        let mut inner = pair.into_inner();
        let chain = next_pair(&mut inner, span, "filters")?;

        let mut filters = Vec::new();
        for call in chain.into_inner() {
            let name = build_filter_call(call)?.0;
            if matches!(name.name.as_str(), "escape" | "safe") {
                return Err(ParseError::new(
                    span,
                    format!("'filter {}' is not permitted", name.name),
                )
                .with_hint("use the 'autoescape' tag instead"));
            }
            filters.push(name);
        }

        let body = self.build_body(next_pair(&mut inner, span, "filter body")?)?;
        Ok(FilterBlock { filters, body })
    }

    // -- Cycle -----------------------------------------------------------

    fn build_cycle(&mut self, pair: Pair<Rule>, span: Span) -> Result<NodeKind, ParseError> {
        let mut args = Vec::new();
        for arg in pair.into_inner() {
            match arg.as_rule() {
                Rule::comma_list => {
                    let items = arg.into_inner().map(|item| item.as_str().to_string());
                    args.push(CycleArg::Words(items.collect()));
                }
                _ => args.push(CycleArg::Expr(build_filter_expr(arg)?)),
            }
        }

        if args.is_empty() {
            return Err(ParseError::new(span, "'cycle' tag requires at least one value")
                .with_hint("write `{% cycle 'odd' 'even' %}`"));
        }

        let (values, binding) = split_binding(args, span)?;

        let Some(binding) = binding else {
            if let [CycleArg::Expr(only)] = values.as_slice() {
                return self.build_cycle_ref(only, span);
            }
            return Ok(NodeKind::Cycle(CycleNode {
                key: self.next_key(),
                values: expand_values(values),
                binding: None,
            }));
        };

        if values.is_empty() {
            return Err(ParseError::new(
                span,
                format!("cycle '{}' requires at least one value before 'as'", binding.name),
            ));
        }

        self.named_cycles.insert(binding.name.clone());
        Ok(NodeKind::Cycle(CycleNode {
            key: self.next_key(),
            values: expand_values(values),
            binding: Some(binding),
        }))
    }

    /// A lone value without `as` can only be a reference to a named cycle.
    fn build_cycle_ref(&self, only: &Expr, span: Span) -> Result<NodeKind, ParseError> {
        let Some(name) = only.node.as_bare_variable() else {
            return Err(ParseError::new(span, "a single-value cycle needs an 'as' clause")
                .with_hint("write `{% cycle value as name %}`"));
        };

        if !self.named_cycles.contains(name) {
            return Err(ParseError::new(span, format!("named cycle '{name}' does not exist"))
                .with_hint(format!("define it first with `{{% cycle ... as {name} %}}`")));
        }

        Ok(NodeKind::CycleRef(CycleRef {
            name: name.to_string(),
        }))
    }

    fn next_key(&mut self) -> CycleKey {
        let key = CycleKey {
            template: self.template_id,
            ordinal: self.next_ordinal,
        };
        self.next_ordinal += 1;
        key
    }
}

enum CycleArg {
    /// Legacy `a,b,c` syntax; every word is a literal string.
    Words(Vec<String>),
    Expr(Expr),
}

impl CycleArg {
    fn bare_word(&self) -> Option<&str> {
        match self {
            CycleArg::Expr(expr) => expr.node.as_bare_variable(),
            CycleArg::Words(_) => None,
        }
    }

    fn is_word(&self, word: &str) -> bool {
        self.bare_word() == Some(word)
    }
}

/// Split `v1 ... vN [as name [flag]]` into values and binding.
///
/// `as` is a keyword only in the second or third position from the end,
/// and the token right after it is always the name. That is what lets a
/// cycle be named `silent`.
fn split_binding(
    mut args: Vec<CycleArg>,
    span: Span,
) -> Result<(Vec<CycleArg>, Option<CycleBinding>), ParseError> {
    let len = args.len();

    let (name_at, silent) = if len >= 2 && args[len - 2].is_word("as") {
        (len - 1, false)
    } else if len >= 3 && args[len - 3].is_word("as") {
        let flag = &args[len - 1];
        if !flag.is_word("silent") {
            let shown = match flag {
                CycleArg::Expr(expr) => describe_expr(expr),
                CycleArg::Words(words) => words.join(","),
            };
            return Err(ParseError::new(
                span,
                format!("only 'silent' flag is allowed after cycle's name, not '{shown}'"),
            ));
        }
        (len - 2, true)
    } else if args[len - 1].is_word("as") {
        return Err(ParseError::new(span, "expected a cycle name after 'as'"));
    } else {
        return Ok((args, None));
    };

    let Some(name) = args[name_at].bare_word().map(str::to_string) else {
        return Err(ParseError::new(span, "cycle name after 'as' must be a plain identifier"));
    };

    args.truncate(name_at - 1);
    Ok((args, Some(CycleBinding { name, silent })))
}

fn expand_values(args: Vec<CycleArg>) -> Vec<Expr> {
    let mut values = Vec::new();
    for arg in args {
        match arg {
            CycleArg::Expr(expr) => values.push(expr),
            CycleArg::Words(words) => {
                values.extend(words.into_iter().map(|w| {
                    Spanned::new(ExprKind::Literal(Value::String(w)), Span::default())
                }));
            }
        }
    }
    values
}

fn describe_expr(expr: &Expr) -> String {
    match &expr.node {
        ExprKind::Variable(var) => var.name.clone(),
        ExprKind::Literal(value) => value.to_output_string(),
        _ => "expression".to_string(),
    }
}

// -- Expression building -------------------------------------------------

fn build_filter_expr(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let span = pair_span(&pair);
    let mut inner = pair.into_inner();

    let mut expr = build_operand(next_pair(&mut inner, span, "operand")?)?;

    for call in inner {
        let (filter, call_span) = build_filter_call(call)?;
        let merged = expr.span.merge(call_span);
        expr = Spanned::new(
            ExprKind::Filtered {
                base: Box::new(expr),
                filter,
            },
            merged,
        );
    }

    Ok(expr)
}

fn build_filter_call(pair: Pair<Rule>) -> Result<(FilterCall, Span), ParseError> {
    let span = pair_span(&pair);
    let mut inner = pair.into_inner();
    let name = next_pair(&mut inner, span, "filter name")?.as_str().to_string();
    let arg = match inner.next() {
        Some(arg) => Some(Box::new(build_operand(arg)?)),
        None => None,
    };
    Ok((FilterCall { name, arg }, span))
}

fn build_operand(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let span = pair_span(&pair);

    match pair.as_rule() {
        Rule::quoted_string => {
            let s = extract_string_content(pair);
            Ok(Spanned::new(ExprKind::Literal(Value::String(s)), span))
        }
        Rule::number => {
            let n: f64 = pair
                .as_str()
                .parse()
                .map_err(|_| ParseError::new(span, format!("invalid number: {}", pair.as_str())))?;
            Ok(Spanned::new(ExprKind::Literal(Value::Number(n)), span))
        }
        Rule::identifier => Ok(Spanned::new(
            ExprKind::Variable(VariableRef {
                name: pair.as_str().to_string(),
            }),
            span,
        )),
        rule => Err(ParseError::new(
            span,
            format!("unexpected rule in operand position: {rule:?}"),
        )),
    }
}

fn build_condition(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let span = pair_span(&pair);
    let mut inner = pair.into_inner();
    let first = next_pair(&mut inner, span, "condition")?;

    if first.as_rule() == Rule::negation {
        let operand = build_filter_expr(next_pair(&mut inner, span, "condition")?)?;
        return Ok(Spanned::new(
            ExprKind::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            },
            span,
        ));
    }

    build_filter_expr(first)
}

// -- Helpers -------------------------------------------------------------

fn extract_string_content(pair: Pair<Rule>) -> String {
    // quoted_string = ${ "'" ~ sq_inner ~ "'" | "\"" ~ dq_inner ~ "\"" }
    let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");

    let mut result = String::new();
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some(c @ ('\'' | '"' | '\\')) => result.push(c),
                Some(c) => {
                    result.push('\\');
                    result.push(c);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(ch);
        }
    }
    result
}
