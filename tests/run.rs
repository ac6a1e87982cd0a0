//! Whole-project runs: partial failure, sibling invocation and output files.

#[allow(dead_code)]
mod helpers;

use action_compiler::codegen::codegen;
use helpers::*;

#[test]
fn compiling_twice_gives_identical_files() {
    let source = fixture("crm.yaml");
    let first = codegen(&compile_ok(&source), &config()).unwrap();
    let second = codegen(&compile_ok(&source), &config()).unwrap();
    assert_eq!(first.files, second.files);
}

#[test]
fn one_bad_action_leaves_its_siblings_compiled() {
    let source = fixture("crm.yaml").replace("status IN ('lead', 'active')", "stage IN ('lead', 'active')");
    let report = compile(&source);
    assert_eq!(report.exit_code(), 1);
    assert!(report.action("archive_contact").is_none());
    assert!(report.action("update_contact").is_some());
    assert!(report.action("delete_organization").is_some());

    let error = &report.errors[0];
    assert_eq!(error.code(), "C001");
    assert_eq!(error.context.action.as_deref(), Some("archive_contact"));
}

#[test]
fn clean_run_exits_zero() {
    let report = compile_ok(&fixture("crm.yaml"));
    assert!(report.is_success());
    assert_eq!(report.exit_code(), 0);
}

// =============================================================================
// Invoke
// =============================================================================

const INVOKING: &str = r#"
entities:
  - name: Contact
    schema: crm
    fields:
      - { name: status, type: text }
    actions:
      - name: update_contact
        steps:
          - type: update
            fields: { status: input.status }
      - name: touch_contact
        steps:
          - { type: invoke, function: update_contact, store: outcome }
"#;

#[test]
fn sibling_invoke_propagates_failure_and_reloads() {
    let report = compile_ok(INVOKING);
    let sql = core_sql(&report, "touch_contact");
    assert_block(
        &sql,
        &[
            "v_outcome := crm.update_contact(v_pk, p_tenant_id, p_caller_id, p_payload);",
            "IF (v_outcome).status <> 'SUCCESS' THEN",
            "v_result := v_outcome;",
            "RAISE EXCEPTION USING ERRCODE = 'MR001';",
            "END IF;",
            "SELECT * INTO v_current FROM crm.tb_contact WHERE pk_contact = v_pk;",
        ],
    );
    assert!(sql.contains("v_outcome app.mutation_result;"));
    assert!(sql.contains("ROW('SUCCESS', 'touch_contact_completed'"));
}

#[test]
fn mutually_invoking_actions_are_rejected() {
    let source = INVOKING.replace(
        "            fields: { status: input.status }\n",
        "            fields: { status: input.status }\n          - { type: invoke, function: touch_contact }\n",
    );
    let report = compile(&source);
    assert!(report.actions.is_empty());
    let mut failed: Vec<(&str, Option<&str>)> = report
        .errors
        .iter()
        .map(|e| (e.code(), e.context.action.as_deref()))
        .collect();
    failed.sort();
    assert_eq!(
        failed,
        vec![("C006", Some("touch_contact")), ("C006", Some("update_contact"))]
    );
}

// =============================================================================
// Codegen
// =============================================================================

#[test]
fn output_has_one_file_per_action_and_per_entity_artifacts() {
    let report = compile_ok(&fixture("locations.yaml"));
    let output = codegen(&report, &config()).unwrap();
    let paths: Vec<&str> = output.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "000_mutation_result.sql",
            "functions/geo.create_location.sql",
            "functions/geo.rename_location.sql",
            "functions/geo.delete_location.sql",
            "artifacts/geo.location.sql",
            "metadata.json",
        ]
    );

    // Both create and rename need the recalculation function; it is written once.
    let artifacts = &output.file("artifacts/geo.location.sql").unwrap().content;
    assert_eq!(
        artifacts
            .matches("CREATE OR REPLACE FUNCTION geo.recalculate_identifier_location(")
            .count(),
        1
    );
}

#[test]
fn function_file_holds_core_then_wrapper() {
    let report = compile_ok(&fixture("crm.yaml"));
    let output = codegen(&report, &config()).unwrap();
    let content = &output.file("functions/crm.update_contact.sql").unwrap().content;
    assert!(
        position(content, "FUNCTION crm.update_contact(") < position(content, "FUNCTION app.update_contact(")
    );
    assert!(
        output
            .file("000_mutation_result.sql")
            .unwrap()
            .content
            .contains("app.mutation_result")
    );
}

#[test]
fn metadata_lists_both_functions_of_every_action() {
    let report = compile_ok(&fixture("crm.yaml"));
    let output = codegen(&report, &config()).unwrap();
    let manifest: serde_json::Value =
        serde_json::from_str(&output.file("metadata.json").unwrap().content).unwrap();
    let functions: Vec<&str> = manifest
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["function"].as_str().unwrap())
        .collect();
    assert_eq!(functions.len(), 2 * report.actions.len());
    assert_eq!(functions[0], "crm.delete_organization");
    assert_eq!(functions[1], "app.delete_organization");
    assert!(functions.contains(&"app.archive_contact"));
}

#[test]
fn failed_actions_are_absent_from_the_output() {
    let source = fixture("crm.yaml").replace("status IN ('lead', 'active')", "stage IN ('lead', 'active')");
    let report = compile(&source);
    let output = codegen(&report, &config()).unwrap();
    assert!(output.file("functions/crm.archive_contact.sql").is_none());
    assert!(output.file("functions/crm.update_contact.sql").is_some());
}
