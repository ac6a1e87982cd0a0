//! Duplicate detection, blocking dependencies and delete cascades.

#[allow(dead_code)]
mod helpers;

use helpers::*;

// =============================================================================
// Duplicates
// =============================================================================

#[test]
fn duplicate_create_is_a_noop_naming_the_conflict() {
    let report = compile_ok(&fixture("crm.yaml"));
    let sql = core_sql(&report, "create_contact");
    assert_block(
        &sql,
        &[
            "-- unique: uq_contact_org_code",
            "SELECT * INTO v_conflict",
            "FROM crm.tb_contact",
            "WHERE tenant_id = p_tenant_id",
            "AND deleted_at IS NULL",
            "AND fk_org = v_fk_org",
            "AND code = (p_payload->>'code')",
            "LIMIT 1;",
            "IF FOUND THEN",
            "v_result := ROW('NOOP', 'already_exists', 'Contact code already used in this organization', v_before, NULL, ARRAY[]::TEXT[], jsonb_build_object('constraint', 'uq_contact_org_code', 'conflict', jsonb_build_object('id', v_conflict.id)))::app.mutation_result;",
            "RAISE EXCEPTION USING ERRCODE = 'MR001';",
            "END IF;",
        ],
    );
    // The check runs before anything is written.
    assert!(position(&sql, "IF FOUND THEN") < position(&sql, "INSERT INTO crm.tb_contact ("));
    assert!(sql.contains("v_conflict crm.tb_contact%ROWTYPE;"));
}

#[test]
fn duplicates_are_only_checked_on_opted_in_creates() {
    let report = compile_ok(&fixture("crm.yaml"));
    assert!(!core_sql(&report, "update_contact").contains("v_conflict"));
    assert!(!core_sql(&report, "archive_contact").contains("already_exists"));
}

#[test]
fn conflict_reference_carries_identifier_and_full_row_on_request() {
    let source = r#"
entities:
  - name: Tag
    schema: crm
    identifier:
      format: "{code}"
    fields:
      - { name: code, type: text, nullable: false }
      - { name: label, type: text }
    unique_constraints:
      - name: uq_tag_code
        fields: [code]
        return_conflict_object: true
      - fields: [label]
        check_on_create: false
    actions:
      - name: create_tag
        duplicate_detection: true
        steps:
          - type: insert
"#;
    let report = compile_ok(source);
    let sql = core_sql(&report, "create_tag");
    assert!(sql.contains(
        "v_result := ROW('NOOP', 'already_exists', 'Tag already exists', v_before, NULL, ARRAY[]::TEXT[], jsonb_build_object('constraint', 'uq_tag_code', 'conflict', jsonb_build_object('id', v_conflict.id, 'identifier', v_conflict.identifier), 'conflict_object', to_jsonb(v_conflict)))::app.mutation_result;"
    ));
    assert!(!sql.contains("uq_tag_label"));
}

// =============================================================================
// Blocking dependencies
// =============================================================================

#[test]
fn hard_delete_is_blocked_by_live_dependents() {
    let report = compile_ok(&fixture("crm.yaml"));
    let sql = core_sql(&report, "delete_organization");
    assert_block(
        &sql,
        &[
            "v_blocked := ARRAY[]::TEXT[];",
            "IF EXISTS (SELECT 1 FROM crm.tb_contact WHERE fk_org = v_pk AND tenant_id = p_tenant_id AND deleted_at IS NULL) THEN",
            "v_blocked := array_append(v_blocked, 'Contact');",
            "END IF;",
            "IF cardinality(v_blocked) > 0 THEN",
            "v_result := ROW('ERROR', 'cannot_delete_with_dependencies', 'Organization has dependent records', v_before, NULL, ARRAY[]::TEXT[], jsonb_build_object('blocked_by', to_jsonb(v_blocked)))::app.mutation_result;",
            "RAISE EXCEPTION USING ERRCODE = 'MR001';",
            "END IF;",
            "DELETE FROM crm.tb_organization WHERE pk_organization = v_pk;",
        ],
    );
    assert!(sql.contains("v_after := NULL;"));
    assert!(sql.contains("ROW('SUCCESS', 'deleted', 'Organization deleted'"));
}

#[test]
fn hard_delete_without_dependencies_just_deletes() {
    let source = r#"
entities:
  - name: Organization
    schema: crm
    fields:
      - { name: name, type: text }
    delete_policy:
      mode: hard
    actions:
      - name: delete_organization
        steps:
          - type: delete
"#;
    let report = compile_ok(source);
    let sql = core_sql(&report, "delete_organization");
    assert!(!sql.contains("v_blocked"));
    assert!(sql.contains("DELETE FROM crm.tb_organization WHERE pk_organization = v_pk;"));
    // A hard-deleting entity has no soft-delete column to filter on.
    assert_block(
        &sql,
        &[
            "WHERE pk_organization = v_pk",
            "AND tenant_id = p_tenant_id;",
        ],
    );
}

#[test]
fn blocked_outcome_may_be_a_noop() {
    let source = fixture("crm.yaml").replace(
        "    delete_policy:\n      mode: hard\n",
        "    delete_policy:\n      mode: hard\n      blocked_outcome: noop\n",
    );
    let report = compile_ok(&source);
    let sql = core_sql(&report, "delete_organization");
    assert!(sql.contains("v_result := ROW('NOOP', 'cannot_delete_with_dependencies'"));
}

#[test]
fn soft_delete_skips_blocking_checks() {
    let source = r#"
entities:
  - name: Organization
    schema: crm
    fields:
      - { name: name, type: text }
    delete_policy:
      dependencies:
        - { entity: Contact, field: org }
    actions:
      - name: delete_organization
        steps:
          - type: delete
  - name: Contact
    schema: crm
    fields:
      - { name: org, type: ref, references: Organization }
"#;
    let report = compile_ok(source);
    let sql = core_sql(&report, "delete_organization");
    assert!(!sql.contains("v_blocked"));
    assert_block(
        &sql,
        &[
            "UPDATE crm.tb_organization SET deleted_at = NOW(), deleted_by = p_caller_id",
            "WHERE pk_organization = v_pk",
            "RETURNING * INTO v_current;",
            "v_changed_fields := array_append(v_changed_fields, 'deleted_at');",
        ],
    );
}

// =============================================================================
// Cascades
// =============================================================================

fn cascading(cascade: &str) -> String {
    format!(
        r#"
entities:
  - name: Organization
    schema: crm
    fields:
      - {{ name: name, type: text }}
    delete_policy:
      mode: hard
      dependencies:
        - {{ entity: Contact, field: org, blocking: false, cascade: {cascade} }}
    actions:
      - name: delete_organization
        steps:
          - type: delete
  - name: Contact
    schema: crm
    fields:
      - {{ name: org, type: ref, references: Organization }}
"#
    )
}

#[test]
fn cascade_delete_removes_dependents_first() {
    let report = compile_ok(&cascading("delete"));
    let sql = core_sql(&report, "delete_organization");
    assert_block(
        &sql,
        &[
            "-- cascade: Contact",
            "DELETE FROM crm.tb_contact",
            "WHERE fk_org = v_pk",
            "AND tenant_id = p_tenant_id;",
            "DELETE FROM crm.tb_organization WHERE pk_organization = v_pk;",
        ],
    );
    assert!(!sql.contains("v_blocked"));
}

#[test]
fn cascade_nullify_detaches_dependents() {
    let report = compile_ok(&cascading("nullify"));
    let sql = core_sql(&report, "delete_organization");
    assert_block(
        &sql,
        &[
            "-- cascade: Contact",
            "UPDATE crm.tb_contact SET fk_org = NULL, updated_at = NOW(), updated_by = p_caller_id",
            "WHERE fk_org = v_pk",
            "AND tenant_id = p_tenant_id",
            "AND deleted_at IS NULL;",
        ],
    );
}

#[test]
fn cascade_soft_delete_marks_dependents() {
    let report = compile_ok(&cascading("soft_delete"));
    let sql = core_sql(&report, "delete_organization");
    assert_block(
        &sql,
        &[
            "-- cascade: Contact",
            "UPDATE crm.tb_contact SET deleted_at = NOW(), deleted_by = p_caller_id",
            "WHERE fk_org = v_pk",
            "AND tenant_id = p_tenant_id",
            "AND deleted_at IS NULL;",
        ],
    );
}

#[test]
fn soft_delete_of_hard_only_entity_is_rejected() {
    let source = r#"
entities:
  - name: Organization
    schema: crm
    fields:
      - { name: name, type: text }
    delete_policy:
      mode: hard
    actions:
      - name: delete_organization
        steps:
          - { type: delete, mode: soft }
"#;
    let report = compile(source);
    assert!(report.actions.is_empty());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].code(), "C005");
    assert_eq!(report.errors[0].context.step.as_deref(), Some("steps[0]"));
}
