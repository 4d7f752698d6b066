mod common;

use bobbin::{
    CompiledTemplate, EvalErrorKind, Registry, RenderError, SimpleContext, Value, render,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn render_ok(source: &str, ctx: &mut SimpleContext) -> String {
    match render(source, ctx, &Registry::new()) {
        Ok(out) => out,
        Err(e) => panic!("render of {source:?} failed: {e}"),
    }
}

fn render_plain(source: &str) -> String {
    render_ok(source, &mut SimpleContext::new())
}

fn assert_syntax_error(source: &str) {
    match render(source, &mut SimpleContext::new(), &Registry::new()) {
        Err(RenderError::Parse(errors)) => assert!(!errors.is_empty()),
        other => panic!("expected a syntax error for {source:?}, got {other:?}"),
    }
}

fn context(pairs: &[(&str, Value)]) -> SimpleContext {
    let mut ctx = SimpleContext::new();
    for (name, value) in pairs {
        ctx.set(name, value.clone());
    }
    ctx
}

fn range(n: i64) -> Value {
    Value::from((0..n).collect::<Vec<_>>())
}

// ── Syntax errors ───────────────────────────────────────────────────────

#[test]
fn test_bare_undefined_name_is_a_syntax_error() {
    assert_syntax_error("{% cycle a %}");
}

#[test]
fn test_no_values_is_a_syntax_error() {
    assert_syntax_error("{% cycle %}");
}

#[test]
fn test_reference_to_other_name_is_a_syntax_error() {
    assert_syntax_error("{% cycle a,b,c as foo %}{% cycle bar %}");
}

#[test]
fn test_unknown_trailing_flag_is_a_syntax_error() {
    assert_syntax_error("{% cycle 'a' 'b' 'c' as foo invalid_flag %}");
}

#[test]
fn test_reference_before_definition_is_a_syntax_error() {
    assert_syntax_error("{% cycle abc %}{% cycle 'a' 'b' as abc %}");
}

// ── Legacy comma syntax ─────────────────────────────────────────────────

#[test]
fn test_comma_values_advance_through_references() {
    assert_eq!(render_plain("{% cycle a,b,c as abc %}{% cycle abc %}"), "ab");
    assert_eq!(
        render_plain("{% cycle a,b,c as abc %}{% cycle abc %}{% cycle abc %}"),
        "abc"
    );
    assert_eq!(
        render_plain("{% cycle a,b,c as abc %}{% cycle abc %}{% cycle abc %}{% cycle abc %}"),
        "abca"
    );
}

#[test]
fn test_comma_values_are_literals_not_variables() {
    let mut ctx = context(&[("a", Value::from("VAR"))]);
    assert_eq!(render_ok("{% cycle a,b as ab %}", &mut ctx), "a");
}

#[test]
fn test_reading_the_name_does_not_advance() {
    assert_eq!(
        render_plain(
            "{% cycle a,b,c as foo %}{% cycle foo %}{{ foo }}{{ foo }}{% cycle foo %}{{ foo }}"
        ),
        "abbbcc"
    );
}

#[test]
fn test_comma_cycle_in_loop() {
    let mut ctx = context(&[("test", range(5))]);
    assert_eq!(
        render_ok("{% for i in test %}{% cycle a,b %}{{ i }},{% endfor %}", &mut ctx),
        "a0,b1,a2,b3,a4,"
    );
}

// ── Quoted and variable values ──────────────────────────────────────────

#[test]
fn test_quoted_values_advance_through_references() {
    assert_eq!(render_plain("{% cycle 'a' 'b' 'c' as abc %}{% cycle abc %}"), "ab");
    assert_eq!(
        render_plain("{% cycle 'a' 'b' 'c' as abc %}{% cycle abc %}{% cycle abc %}"),
        "abc"
    );
    assert_eq!(
        render_plain(
            "{% cycle 'a' 'b' 'c' as abc %}{% cycle abc %}{% cycle abc %}{% cycle abc %}"
        ),
        "abca"
    );
}

#[test]
fn test_quoted_cycle_in_loop() {
    let mut ctx = context(&[("test", range(5))]);
    assert_eq!(
        render_ok("{% for i in test %}{% cycle 'a' 'b' %}{{ i }},{% endfor %}", &mut ctx),
        "a0,b1,a2,b3,a4,"
    );
}

#[test]
fn test_variable_values() {
    let mut ctx = context(&[("one", Value::from("1")), ("two", Value::from("2"))]);
    assert_eq!(render_ok("{% cycle one two as foo %}{% cycle foo %}", &mut ctx), "12");
}

#[test]
fn test_variable_values_in_loop() {
    let mut ctx = context(&[
        ("test", range(5)),
        ("aye", Value::from("a")),
        ("bee", Value::from("b")),
    ]);
    assert_eq!(
        render_ok("{% for i in test %}{% cycle aye bee %}{{ i }},{% endfor %}", &mut ctx),
        "a0,b1,a2,b3,a4,"
    );
}

#[test]
fn test_variables_are_resolved_at_every_step() {
    let mut ctx = context(&[
        ("rows", Value::from(vec!["x", "y", "z"])),
        ("odd", Value::from("O")),
    ]);
    assert_eq!(
        render_ok("{% for odd in rows %}{% cycle odd 'e' %}{% endfor %}", &mut ctx),
        "xez"
    );
}

#[test]
fn test_filtered_values() {
    let mut ctx = context(&[("one", Value::from("A")), ("two", Value::from("2"))]);
    assert_eq!(
        render_ok("{% cycle one|lower two as foo %}{% cycle foo %}", &mut ctx),
        "a2"
    );
}

#[test]
fn test_number_values() {
    assert_eq!(render_plain("{% cycle 1 2.5 as n %}{% cycle n %}{% cycle n %}"), "12.51");
}

// ── Silent and naming ───────────────────────────────────────────────────

#[test]
fn test_silent_binding_silences_references() {
    assert_eq!(
        render_plain(
            "{% cycle 'a' 'b' 'c' as abc silent %}\
             {% cycle abc %}{% cycle abc %}{% cycle abc %}{% cycle abc %}"
        ),
        ""
    );
}

#[test]
fn test_name_after_as_may_be_silent() {
    assert_eq!(render_plain("{% cycle 'a' 'b' as silent %}{% cycle silent %}"), "ab");
}

#[test]
fn test_silent_cycle_in_loop_still_advances() {
    let mut ctx = context(&[("values", Value::from(vec![1i64, 2, 3, 4]))]);
    assert_eq!(
        render_ok(
            "{% for x in values %}{% cycle 'a' 'b' 'c' as abc silent %}{{ x }}{% endfor %}",
            &mut ctx
        ),
        "1234"
    );
    assert_eq!(
        render_ok(
            "{% for x in values %}{% cycle 'a' 'b' 'c' as abc silent %}{{ abc }}{{ x }}{% endfor %}",
            &mut ctx
        ),
        "a1b2c3a4"
    );
}

#[test]
fn test_redefining_a_name_starts_a_fresh_binding() {
    assert_eq!(
        render_plain(
            "{% cycle 'a' 'b' as x %}{% cycle x %}{% cycle '1' '2' '3' as x %}{% cycle x %}{% cycle x %}"
        ),
        "ab123"
    );
}

#[test]
fn test_value_naming_its_own_binding_reads_host_value() {
    let mut ctx = context(&[("abc", Value::from("HOST"))]);
    assert_eq!(render_ok("{% cycle abc 'x' as abc %}", &mut ctx), "HOST");
    assert_eq!(
        render_ok("{% cycle abc 'x' as abc %}{% cycle abc %}{{ abc }}", &mut ctx),
        "HOSTxx"
    );
}

#[test]
fn test_redefinition_reads_previous_binding_value() {
    assert_eq!(render_plain("{% cycle 'a' 'b' as x %}{% cycle x 'z' as x %}"), "aa");
    assert_eq!(
        render_plain("{% cycle 'a' 'b' as x %}{% cycle x %}{% cycle x 'z' as x %}{{ x }}"),
        "abbb"
    );
}

#[test]
fn test_cycle_value_shadows_host_variable_but_not_loop_variable() {
    let mut ctx = context(&[("ab", Value::from("HOST")), ("items", Value::from(vec!["L"]))]);
    assert_eq!(
        render_ok(
            "{{ ab }}{% cycle 'a' 'b' as ab silent %}{{ ab }}{% for ab in items %}{{ ab }}{% endfor %}",
            &mut ctx
        ),
        "HOSTaL"
    );
}

// ── Escaping ────────────────────────────────────────────────────────────

#[test]
fn test_values_are_autoescaped() {
    let mut ctx = context(&[("one", Value::from("A & B")), ("two", Value::from("C & D"))]);
    assert_eq!(
        render_ok("{% cycle one two as foo %} &amp; {% cycle foo %}", &mut ctx),
        "A &amp; B &amp; C &amp; D"
    );
}

#[test]
fn test_values_with_autoescape_disabled() {
    let mut ctx = context(&[("one", Value::from("A & B")), ("two", Value::from("C & D"))]);
    assert_eq!(
        render_ok(
            "{% autoescape off %}{% cycle one two as foo %} {% cycle foo %}{% endautoescape %}",
            &mut ctx
        ),
        "A & B C & D"
    );
}

#[test]
fn test_values_inside_force_escape_filter_block() {
    let mut ctx = context(&[("one", Value::from("A & B")), ("two", Value::from("C & D"))]);
    assert_eq!(
        render_ok(
            "{% filter force_escape %}{% cycle one two as foo %} & {% cycle foo %}{% endfilter %}",
            &mut ctx
        ),
        "A &amp;amp; B &amp; C &amp;amp; D"
    );
}

#[test]
fn test_single_value_with_binding_is_escaped() {
    let mut ctx = context(&[("a", Value::from("<"))]);
    assert_eq!(render_ok("{% cycle a as abc %}", &mut ctx), "&lt;");
}

#[test]
fn test_load_tag_is_ignored() {
    let mut ctx = context(&[("a", Value::from("<")), ("b", Value::from(">"))]);
    assert_eq!(
        render_ok("{% load cycle from future %}{% cycle a b as ab %}{% cycle ab %}", &mut ctx),
        "&lt;&gt;"
    );
}

#[test]
fn test_autoescape_off_emits_raw_values() {
    let mut ctx = context(&[("a", Value::from("<")), ("b", Value::from(">"))]);
    assert_eq!(
        render_ok(
            "{% load cycle from future %}\
             {% autoescape off %}{% cycle a b as ab %}{% cycle ab %}{% endautoescape %}",
            &mut ctx
        ),
        "<>"
    );
}

#[test]
fn test_safe_filter_skips_escaping_for_that_value_only() {
    let mut ctx = context(&[("a", Value::from("<")), ("b", Value::from(">"))]);
    assert_eq!(
        render_ok("{% cycle a|safe b as ab %}{% cycle ab %}", &mut ctx),
        "<&gt;"
    );
}

// ── Includes ────────────────────────────────────────────────────────────

#[test]
fn test_included_template_reads_named_cycle() {
    let mut ctx = context(&[("values", Value::from(vec![1i64, 2, 3, 4]))]);
    ctx.add_template("included-cycle", "{{ abc }}");
    assert_eq!(
        render_ok(
            "{% for x in values %}\
             {% cycle 'a' 'b' 'c' as abc silent %}{% include 'included-cycle' %}{% endfor %}",
            &mut ctx
        ),
        "abca"
    );
}

#[test]
fn test_included_template_may_step_named_cycle() {
    let mut ctx = SimpleContext::new();
    ctx.add_template("step", "{% cycle rows %}");
    assert_eq!(
        render_ok(
            "{% cycle 'odd' 'even' as rows %},{% include 'step' %},{% include 'step' %}",
            &mut ctx
        ),
        "odd,even,odd"
    );
}

#[test]
fn test_anonymous_cycle_in_include_restarts_per_include() {
    let mut ctx = context(&[("values", Value::from(vec![1i64, 2, 3]))]);
    ctx.add_template("row", "{% cycle 'a' 'b' %}");
    assert_eq!(
        render_ok("{% for x in values %}{% include 'row' %}{% endfor %}", &mut ctx),
        "aaa"
    );
}

// ── Render passes ───────────────────────────────────────────────────────

#[test]
fn test_state_does_not_survive_render_passes() {
    let template = CompiledTemplate::compile(
        "{% for i in items %}{% cycle 'a' 'b' 'c' as abc %}{% endfor %}{% cycle abc %}",
    )
    .expect("compile");
    let registry = Registry::new();
    let mut ctx = context(&[("items", range(2))]);

    let first = template.evaluate(&mut ctx, &registry).expect("first pass");
    let second = template.evaluate(&mut ctx, &registry).expect("second pass");
    assert_eq!(first, "abc");
    assert_eq!(second, first);
}

#[test]
fn test_reference_to_binding_never_created_fails_at_render() {
    let mut ctx = context(&[("flag", Value::from(false))]);
    let err = render(
        "{% if flag %}{% cycle 'a' 'b' as ab %}{% endif %}{% cycle ab %}",
        &mut ctx,
        &Registry::new(),
    )
    .expect_err("binding was never created");
    match err {
        RenderError::Eval(e) => assert_eq!(e.kind, EvalErrorKind::UndefinedCycle),
        other => panic!("expected an eval error, got {other:?}"),
    }
}

// ── Properties ──────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_cycle_wraps_around(values in prop::collection::vec("[a-z]{1,4}", 1..6), steps in 1usize..25) {
        let quoted: Vec<String> = values.iter().map(|v| format!("'{v}'")).collect();
        let source = format!(
            "{{% for i in items %}}{{% cycle {} %}}|{{% endfor %}}",
            quoted.join(" ")
        );
        let mut ctx = SimpleContext::new();
        ctx.set("items", vec![0i64; steps]);

        let out = render(&source, &mut ctx, &Registry::new()).expect("render");
        let expected: String = (0..steps)
            .map(|i| format!("{}|", values[i % values.len()]))
            .collect();
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn prop_reference_and_definition_share_rotation(n in 1usize..6, refs in 0usize..12) {
        let values: Vec<String> = (0..n).map(|i| format!("v{i}")).collect();
        let quoted: Vec<String> = values.iter().map(|v| format!("'{v}'")).collect();
        let source = format!(
            "{{% cycle {} as c %}}{}",
            quoted.join(" "),
            "{% cycle c %}".repeat(refs)
        );

        let out = render(&source, &mut SimpleContext::new(), &Registry::new()).expect("render");
        let expected: String = (0..=refs).map(|i| values[i % n].as_str()).collect();
        prop_assert_eq!(out, expected);
    }
}
