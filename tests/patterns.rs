//! Built-in patterns expanded and compiled end to end.

#[allow(dead_code)]
mod helpers;

use action_compiler::error::Phase;
use action_compiler::ir::types::ArtifactKind;
use action_compiler::run::compile_source;
use helpers::*;

// =============================================================================
// state_machine
// =============================================================================

#[test]
fn state_machine_guards_the_transition() {
    let report = compile_ok(&fixture("sales.yaml"));
    let sql = core_sql(&report, "ship_order");

    assert_block(
        &sql,
        &[
            "IF NOT COALESCE(v_current.status IN ('paid', 'packed'), FALSE) THEN",
            r#"v_result := ROW('ERROR', 'invalid_state_transition', 'Transition not allowed from the current state', v_before, NULL, ARRAY[]::TEXT[], jsonb_build_object('allowed_states', '["paid","packed"]'::jsonb, 'current_state', to_jsonb(v_current.status), 'target_state', '"shipped"'::jsonb))::app.mutation_result;"#,
        ],
    );

    let transition = position(&sql, "'invalid_state_transition'");
    let extra = position(&sql, "IF NOT COALESCE(v_current.total > 0, FALSE) THEN");
    let write = position(&sql, "status = 'shipped',");
    let side_effect = position(&sql, "shipped_at = NOW(),");
    let notify = position(&sql, "PERFORM app.emit_event('order.shipped', 'sales.Order', v_pk, p_payload);");
    assert!(transition < extra && extra < write && write < side_effect && side_effect < notify);
    assert!(sql.contains("'empty_order', 'Nothing to ship'"));

    let action = action(&report, "ship_order");
    assert_eq!(action.artifacts.len(), 1);
    assert_eq!(action.artifacts[0].kind, ArtifactKind::Index);
    assert_eq!(action.artifacts[0].entity, "sales.Order");
    assert_eq!(
        action.artifacts[0].sql,
        "CREATE INDEX IF NOT EXISTS idx_order_status ON sales.tb_order (status);"
    );
}

#[test]
fn state_machine_requires_its_target_state() {
    let source = r#"
entities:
  - name: Order
    schema: sales
    fields:
      - { name: status, type: text }
    actions:
      - name: ship_order
        pattern: state_machine
        config:
          from_states: [paid]
"#;
    let report = compile(source);
    assert!(report.actions.is_empty());
    let err = &report.errors[0];
    assert_eq!(err.code(), "X002");
    assert_eq!(err.phase, Phase::Expand);
    assert_eq!(err.context.entity.as_deref(), Some("Order"));
    assert_eq!(err.context.action.as_deref(), Some("ship_order"));
    assert!(err.to_string().contains("parameter 'to_state' is required"));
}

#[test]
fn pattern_fields_must_exist_on_the_entity() {
    let source = r#"
entities:
  - name: Order
    schema: sales
    fields:
      - { name: status, type: text }
    actions:
      - name: ship_order
        pattern: state_machine
        config:
          from_states: [paid]
          to_state: shipped
          state_field: phase
"#;
    let report = compile(source);
    assert_eq!(report.errors[0].code(), "X002");
    assert!(report.errors[0].to_string().contains("names no field of 'Order': 'phase'"));
}

// =============================================================================
// recursive_dependency
// =============================================================================

#[test]
fn recursive_dependency_validates_the_selection() {
    let report = compile_ok(&fixture("catalog.yaml"));
    let sql = core_sql(&report, "configure_device");
    let selection = "ARRAY(SELECT jsonb_array_elements_text(COALESCE(p_payload->'features', '[]'::jsonb)))";

    assert_block(
        &sql,
        &[
            &format!("v_missing_dependencies := catalog.missing_dependencies_device({selection}, p_tenant_id);"),
            "IF NOT COALESCE(cardinality(v_missing_dependencies) = 0, FALSE) THEN",
            "v_result := ROW('ERROR', 'missing_dependencies', 'Selection is missing required dependencies', v_before, NULL, ARRAY[]::TEXT[], jsonb_build_object('missing', to_jsonb(v_missing_dependencies)))::app.mutation_result;",
        ],
    );
    assert_block(
        &sql,
        &[
            &format!("v_conflicting_dependencies := catalog.conflicting_dependencies_device({selection}, p_tenant_id);"),
            "IF NOT COALESCE(cardinality(v_conflicting_dependencies) = 0, FALSE) THEN",
            "v_result := ROW('ERROR', 'conflicting_dependencies', 'Selection contains conflicting entries', v_before, NULL, ARRAY[]::TEXT[], jsonb_build_object('conflicts', to_jsonb(v_conflicting_dependencies)))::app.mutation_result;",
        ],
    );
    // The selection is only stored once both checks pass.
    let stored = position(&sql, &format!("features = {selection},"));
    assert!(position(&sql, "'conflicting_dependencies', 'Selection contains") < stored);
    assert_contains_all(
        &sql,
        &["v_missing_dependencies TEXT[];", "v_conflicting_dependencies TEXT[];"],
    );
}

#[test]
fn missing_dependencies_follow_requirements_transitively() {
    // A device selecting `bluetooth` where bluetooth REQUIRES wifi and wifi
    // REQUIRES radio reports both: the CTE walks the REQUIRES chain.
    let report = compile_ok(&fixture("catalog.yaml"));
    let action = action(&report, "configure_device");
    let names: Vec<&str> = action.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "catalog.missing_dependencies_device",
            "catalog.conflicting_dependencies_device",
        ]
    );

    let missing = &action.artifacts[0].sql;
    assert_block(
        missing,
        &[
            "WITH RECURSIVE required (key, depth, path) AS (",
            "SELECT requires, 1, ARRAY[feature, requires]",
            "FROM catalog.tb_feature_rule",
            "WHERE feature = ANY(p_selected)",
            "AND kind = 'REQUIRES' AND deleted_at IS NULL",
            "UNION ALL",
            "SELECT d.requires, r.depth + 1, r.path || d.requires",
            "FROM required r",
            "JOIN catalog.tb_feature_rule d ON d.feature = r.key",
            "WHERE r.depth < 6",
            "AND d.kind = 'REQUIRES'",
            "AND NOT (d.requires = ANY(r.path)) AND deleted_at IS NULL",
            ")",
            "SELECT COALESCE(array_agg(DISTINCT key ORDER BY key), ARRAY[]::TEXT[])",
            "FROM required",
            "WHERE NOT (key = ANY(p_selected));",
        ],
    );
    // Global rule tables are not filtered by tenant.
    assert!(!missing.contains("tenant_id = p_tenant_id"));

    let conflicts = &action.artifacts[1].sql;
    assert_contains_all(
        conflicts,
        &[
            "array_agg(DISTINCT feature || ':' || requires",
            "WHERE kind = 'CONFLICTS_WITH'",
            "AND feature = ANY(p_selected)",
            "AND requires = ANY(p_selected) AND deleted_at IS NULL;",
        ],
    );
}

#[test]
fn dependency_entity_must_be_known() {
    let source = fixture("catalog.yaml").replace("dependency_entity: FeatureRule", "dependency_entity: Rule");
    let report = compile(&source);
    let err = report
        .errors
        .iter()
        .find(|e| e.context.action.as_deref() == Some("configure_device"))
        .expect("configure_device fails");
    assert_eq!(err.code(), "X002");
    assert!(err.to_string().contains("names unknown entity 'Rule'"));
    // The other entity's action is unaffected.
    assert!(report.action("resolve_category").is_some());
}

// =============================================================================
// template_inheritance
// =============================================================================

#[test]
fn template_inheritance_stores_the_merged_chain() {
    let report = compile_ok(&fixture("catalog.yaml"));
    let sql = core_sql(&report, "resolve_category");
    let call = position(&sql, "v_resolved_template := catalog.resolve_template_category(v_pk, p_tenant_id);");
    let store = position(&sql, "resolved_config = v_resolved_template,");
    assert!(call < store);
    assert!(sql.contains("v_resolved_template JSONB;"));

    let action = action(&report, "resolve_category");
    let function = &action.artifacts[0];
    assert_eq!(function.kind, ArtifactKind::Function);
    assert_block(
        &function.sql,
        &[
            "WITH RECURSIVE chain (node, parent, settings, depth, path) AS (",
            "SELECT pk_category, fk_template, config, 0, ARRAY[pk_category]",
            "FROM catalog.tb_category",
            "WHERE pk_category = p_pk AND tenant_id = p_tenant_id AND deleted_at IS NULL",
            "UNION ALL",
            "SELECT t.pk_category, t.fk_template, t.config, c.depth + 1, c.path || t.pk_category",
            "FROM chain c",
            "JOIN catalog.tb_category t ON t.pk_category = c.parent",
            "WHERE c.depth < 5",
        ],
    );
    // The nearest definition of a key wins.
    assert_block(
        &function.sql,
        &[
            "SELECT DISTINCT ON (e.key) e.key, e.value",
            "FROM chain c",
            "CROSS JOIN LATERAL jsonb_each(COALESCE(c.settings, '{}'::jsonb)) e",
            "ORDER BY e.key, c.depth",
        ],
    );
    assert_eq!(
        action.artifacts[1].sql,
        "CREATE INDEX IF NOT EXISTS idx_category_template ON catalog.tb_category (fk_template);"
    );
}

// =============================================================================
// scd_type2
// =============================================================================

#[test]
fn scd_type2_closes_the_current_version_and_inserts_the_next() {
    let report = compile_ok(&fixture("sales.yaml"));
    let sql = core_sql(&report, "revise_price");

    assert!(sql.contains("IF NOT COALESCE(v_current.is_current IS TRUE, FALSE) THEN"));
    assert_block(
        &sql,
        &[
            "UPDATE sales.tb_price SET",
            "effective_to = NOW(),",
            "is_current = FALSE,",
            "updated_at = NOW(),",
            "updated_by = p_caller_id",
        ],
    );
    assert!(sql.contains("v_next_version := sales.next_version_price(v_pk, p_tenant_id);"));
    assert_block(
        &sql,
        &[
            ") VALUES (",
            "gen_random_uuid(),",
            "p_tenant_id,",
            "NOW(),",
            "NULL,",
            "TRUE,",
            "v_next_version,",
            "CASE WHEN p_payload ? 'sku' THEN (p_payload->>'sku') ELSE v_current.sku END,",
            "CASE WHEN p_payload ? 'amount' THEN (p_payload->>'amount')::NUMERIC ELSE v_current.amount END,",
        ],
    );
    // The response describes the new version.
    let insert = position(&sql, "INSERT INTO sales.tb_price (");
    assert!(insert < position(&sql, "v_pk := v_current.pk_price;"));
    assert!(!sql.contains("missing_required_field"));
}

#[test]
fn scd_type2_artifacts_enforce_one_current_version() {
    let report = compile_ok(&fixture("sales.yaml"));
    let action = action(&report, "revise_price");
    assert_eq!(action.artifacts.len(), 2);
    assert_eq!(
        action.artifacts[0].sql,
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_price_current ON sales.tb_price (tenant_id, sku) WHERE is_current AND deleted_at IS NULL;"
    );
    assert_contains_all(
        &action.artifacts[1].sql,
        &[
            "CREATE OR REPLACE FUNCTION sales.next_version_price(",
            "SELECT COALESCE(MAX(v.version), 0) + 1",
            "ON v.sku = c.sku",
            "WHERE c.pk_price = p_pk",
            "AND c.tenant_id = p_tenant_id",
        ],
    );
}

#[test]
fn unversioned_scd_type2_skips_numbering() {
    let source = fixture("sales.yaml").replace("          version_field: version\n", "");
    let report = compile_ok(&source);
    let sql = core_sql(&report, "revise_price");
    assert!(!sql.contains("next_version"));
    assert_eq!(action(&report, "revise_price").artifacts.len(), 1);
}

// =============================================================================
// Action flags on pattern actions
// =============================================================================

/// Add action-level flags to `action` in a fixture.
fn with_flags(source: &str, action: &str, flags: &[&str]) -> String {
    let header = format!("      - name: {action}\n");
    assert!(source.contains(&header), "no action '{action}' in fixture");
    let mut replacement = header.clone();
    for flag in flags {
        replacement.push_str(&format!("        {flag}\n"));
    }
    source.replace(&header, &replacement)
}

const ALL_FLAGS: &[&str] = &[
    "partial_update: true",
    "duplicate_detection: true",
    "recalc_identifier: false",
];

#[test]
fn state_transition_is_written_under_partial_update() {
    let report = compile_ok(&with_flags(&fixture("sales.yaml"), "ship_order", ALL_FLAGS));
    let sql = core_sql(&report, "ship_order");
    assert_block(
        &sql,
        &[
            "UPDATE sales.tb_order SET",
            "status = 'shipped',",
            "updated_at = NOW(),",
            "updated_by = p_caller_id",
        ],
    );
    // Side effects assigning non-payload values are not presence-gated either.
    assert!(sql.contains("shipped_at = NOW(),"));
    assert!(!sql.contains("p_payload ? 'status'"));
    assert!(!sql.contains("v_conflict"));
}

#[test]
fn scd_close_out_is_written_under_partial_update() {
    let report = compile_ok(&with_flags(&fixture("sales.yaml"), "revise_price", ALL_FLAGS));
    let sql = core_sql(&report, "revise_price");
    assert_block(
        &sql,
        &[
            "UPDATE sales.tb_price SET",
            "effective_to = NOW(),",
            "is_current = FALSE,",
            "updated_at = NOW(),",
            "updated_by = p_caller_id",
        ],
    );
    assert!(!sql.contains("p_payload ? 'is_current'"));
    assert!(!sql.contains("p_payload ? 'effective_to'"));
    assert!(!sql.contains("v_conflict"));
}

#[test]
fn inherited_template_is_stored_under_partial_update() {
    let report = compile_ok(&with_flags(&fixture("catalog.yaml"), "resolve_category", ALL_FLAGS));
    let sql = core_sql(&report, "resolve_category");
    assert!(sql.contains("resolved_config = v_resolved_template,"));
    assert!(!sql.contains("p_payload ? 'resolved_config'"));
}

#[test]
fn dependency_selection_stays_gated_on_its_payload_key() {
    let report = compile_ok(&with_flags(&fixture("catalog.yaml"), "configure_device", ALL_FLAGS));
    let sql = core_sql(&report, "configure_device");
    let selection = "ARRAY(SELECT jsonb_array_elements_text(COALESCE(p_payload->'features', '[]'::jsonb)))";
    assert!(sql.contains(&format!(
        "features = CASE WHEN p_payload ? 'features' THEN {selection} ELSE features END,"
    )));
    assert!(!sql.contains("v_conflict"));
}

// =============================================================================
// Library errors
// =============================================================================

#[test]
fn unknown_pattern_aborts_only_its_action() {
    let source = fixture("crm.yaml").replace(
        "      - name: update_contact\n        partial_update: true\n        steps:\n          - type: update\n",
        "      - name: update_contact\n        pattern: audit_trail\n",
    );
    let report = compile(&source);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].code(), "X001");
    assert_eq!(report.errors[0].context.action.as_deref(), Some("update_contact"));
    assert!(report.action("create_contact").is_some());
    assert!(report.action("archive_contact").is_some());
    assert!(report.action("update_contact").is_none());
}

#[test]
fn unknown_pattern_version_is_an_error() {
    let source = fixture("sales.yaml").replace("scd_type2@1.0.0", "scd_type2@9.0.0");
    let report = compile(&source);
    assert_eq!(report.errors[0].code(), "X001");
    assert!(report.errors[0].to_string().contains("scd_type2@9.0.0"));
}

#[test]
fn templates_cannot_expand_into_other_patterns() {
    let mut library = library();
    library
        .load_yaml(
            r#"
name: ship_and_audit
template: |
  steps:
    - pattern: state_machine
"#,
        )
        .unwrap();
    let source = r#"
entities:
  - name: Order
    schema: sales
    fields:
      - { name: status, type: text }
    actions:
      - name: ship_order
        pattern: ship_and_audit
"#;
    let report = compile_source(source, &library, &config());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].code(), "X003");
}
