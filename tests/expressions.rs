//! Expression lowering against a record, the payload, params and locals.

use action_compiler::compile::context::{Local, LocalKind, Locals};
use action_compiler::compile::{ExprScope, compile_expression};
use action_compiler::config::GeneratorConfig;
use action_compiler::error::ErrorKind;
use action_compiler::parse::parse_expression;
use action_compiler::parse::types::{ActionParameter, EntityDefinition, Expression};

fn contact() -> EntityDefinition {
    serde_yaml::from_str(
        r#"
name: Contact
schema: crm
fields:
  - { name: email, type: text }
  - { name: first_name, type: text }
  - { name: status, type: enum, values: [lead, active, archived] }
  - { name: score, type: integer }
  - { name: archived, type: boolean }
  - { name: org, type: ref, references: Organization }
"#,
    )
    .unwrap()
}

fn params() -> Vec<ActionParameter> {
    serde_yaml::from_str(
        r#"
- { name: reason, type: text, required: true }
- { name: limit, type: integer }
"#,
    )
    .unwrap()
}

fn lower(text: &str) -> String {
    let entity = contact();
    let config = GeneratorConfig::default();
    let params = params();
    let expr = parse_expression(text).unwrap();
    let scope = ExprScope::new(&entity, &config).with_params(&params);
    compile_expression(&expr, &scope).unwrap().sql
}

fn lower_err(expr: &Expression) -> ErrorKind {
    let entity = contact();
    let config = GeneratorConfig::default();
    compile_expression(expr, &ExprScope::new(&entity, &config)).unwrap_err()
}

#[test]
fn membership_and_null_tests() {
    insta::assert_snapshot!(lower("status IN ('lead', 'active')"), @"v_current.status IN ('lead', 'active')");
    insta::assert_snapshot!(lower("status NOT IN ('archived')"), @"v_current.status NOT IN ('archived')");
    insta::assert_snapshot!(
        lower("input.email IS NOT NULL AND email IS NULL"),
        @"((p_payload->>'email') IS NOT NULL) AND (v_current.email IS NULL)"
    );
}

#[test]
fn empty_membership_is_constant() {
    let expr = Expression::binary(
        "in",
        Expression::field("status"),
        Expression::List { items: vec![] },
    );
    let entity = contact();
    let config = GeneratorConfig::default();
    let sql = compile_expression(&expr, &ExprScope::new(&entity, &config))
        .unwrap()
        .sql;
    assert_eq!(sql, "FALSE");
}

#[test]
fn precedence_is_kept_by_parentheses() {
    insta::assert_snapshot!(lower("score + 1 > 3"), @"(v_current.score + 1) > 3");
    insta::assert_snapshot!(
        lower("status = 'lead' OR status = 'active' AND archived"),
        @"(v_current.status = 'lead') OR ((v_current.status = 'active') AND v_current.archived)"
    );
    insta::assert_snapshot!(lower("NOT archived"), @"NOT v_current.archived");
}

#[test]
fn references_compare_internal_keys() {
    insta::assert_snapshot!(lower("org = input.org"), @"v_current.fk_org = v_fk_org");
}

#[test]
fn payload_params_and_context() {
    insta::assert_snapshot!(lower(":reason"), @"(p_payload->>'reason')");
    insta::assert_snapshot!(lower(":limit > score"), @"(p_payload->>'limit')::INTEGER > v_current.score");
    insta::assert_snapshot!(lower("payload.tags"), @"p_payload->'tags'");
    insta::assert_snapshot!(lower("input.score"), @"(p_payload->>'score')::INTEGER");
    insta::assert_snapshot!(lower("created_at < $now"), @"v_current.created_at < NOW()");
    insta::assert_snapshot!(lower("$user"), @"p_caller_id");
    insta::assert_snapshot!(lower("$tenant"), @"p_tenant_id");
    insta::assert_snapshot!(lower("$pk"), @"v_pk");
}

#[test]
fn literals_and_whitelisted_calls() {
    insta::assert_snapshot!(lower("first_name = 'O''Brien'"), @"v_current.first_name = 'O''Brien'");
    insta::assert_snapshot!(lower("coalesce(email, 'none')"), @"COALESCE(v_current.email, 'none')");
    insta::assert_snapshot!(lower("lower(email) LIKE '%@example.com'"), @"LOWER(v_current.email) LIKE '%@example.com'");
    insta::assert_snapshot!(lower("now()"), @"NOW()");
}

#[test]
fn locals_by_kind() {
    let entity = contact();
    let config = GeneratorConfig::default();
    let mut locals = Locals::new();
    locals.bind(
        "response",
        Local {
            var: "v_response".into(),
            sql_type: "JSONB".into(),
            kind: LocalKind::Json,
        },
    );
    locals.bind(
        "outcome",
        Local {
            var: "v_outcome".into(),
            sql_type: "app.mutation_result".into(),
            kind: LocalKind::Result,
        },
    );
    locals.bind(
        "missing",
        Local {
            var: "v_missing".into(),
            sql_type: "TEXT[]".into(),
            kind: LocalKind::Scalar,
        },
    );
    let scope = ExprScope::new(&entity, &config).with_locals(&locals);
    let sql = |text: &str| {
        compile_expression(&parse_expression(text).unwrap(), &scope)
            .unwrap()
            .sql
    };

    assert_eq!(sql("cardinality(@missing) = 0"), "cardinality(v_missing) = 0");
    assert_eq!(sql("@response.total"), "(v_response->>'total')");
    assert_eq!(sql("@response.owner.email"), "(v_response#>>'{owner,email}')");
    assert_eq!(sql("@outcome.status = 'SUCCESS'"), "(v_outcome).status = 'SUCCESS'");

    let err = compile_expression(&parse_expression("@missing.first").unwrap(), &scope).unwrap_err();
    assert_eq!(err.code(), "C005");
    let err = compile_expression(&parse_expression("@outcome.nope").unwrap(), &scope).unwrap_err();
    assert_eq!(err.code(), "C005");
}

#[test]
fn statements_on_the_table_use_bare_columns() {
    let entity = contact();
    let config = GeneratorConfig::default();
    let expr = parse_expression("score * 2 >= 10 AND org IS NOT NULL").unwrap();
    let scope = ExprScope::new(&entity, &config).on_columns_of(&entity);
    insta::assert_snapshot!(
        compile_expression(&expr, &scope).unwrap().sql,
        @"((score * 2) >= 10) AND (fk_org IS NOT NULL)"
    );
}

#[test]
fn touched_fields_are_reported() {
    let entity = contact();
    let config = GeneratorConfig::default();
    let expr = parse_expression("input.org = org AND input.email IS NOT NULL").unwrap();
    let compiled = compile_expression(&expr, &ExprScope::new(&entity, &config)).unwrap();
    assert_eq!(
        compiled.fields.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["email", "org"]
    );
    assert_eq!(
        compiled.inputs.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["email", "org"]
    );
}

#[test]
fn unknown_names_are_errors() {
    assert_eq!(lower_err(&Expression::field("nickname")).code(), "C001");
    assert_eq!(lower_err(&Expression::input("nickname")).code(), "C001");
    assert_eq!(lower_err(&Expression::local("missing")).code(), "C004");
    assert_eq!(
        lower_err(&Expression::Param {
            name: "reason".into()
        })
        .code(),
        "C003"
    );
    assert_eq!(
        lower_err(&parse_expression("pg_sleep(1)").unwrap()).code(),
        "C002"
    );
}

#[test]
fn malformed_text_does_not_parse() {
    assert!(parse_expression("status =").is_err());
    assert!(parse_expression("status IN ()").is_err());
    assert!(parse_expression("'unterminated").is_err());
}
