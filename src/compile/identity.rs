//! Identity resolver: external id → internal key, scoped to the caller's
//! tenant and blind to soft-deleted rows.
//!
//! The wrapper resolves the record it was called for with `INTO STRICT` so
//! a duplicate external id aborts instead of picking a row. The core function
//! reloads by internal key under the same scope and resolves any reference
//! fields the payload carries.

use crate::codegen::writer::CodeWriter;
use crate::compile::context::CompileContext;
use crate::compile::response::{Outcome, emit_short_circuit};
use crate::compile::sql::{emit_where, jsonb_object, quote_literal};
use crate::config::GeneratorConfig;
use crate::error::CompilerError;
use crate::ir::types::{
    CompiledFunction, Declaration, FunctionMetadata, FunctionParam, FunctionRole,
};
use crate::parse::types::{ActionDefinition, ActionKind, EntityDefinition};

/// Emit `SELECT pk INTO [STRICT] target FROM table WHERE id = external_id`
/// under the entity's scope filter.
pub fn emit_resolve(
    w: &mut CodeWriter,
    entity: &EntityDefinition,
    external_id: &str,
    target: &str,
    strict: bool,
    config: &GeneratorConfig,
) {
    let into = if strict { "INTO STRICT" } else { "INTO" };
    w.line(&format!(
        "SELECT {} {} {}",
        config.pk_column(entity),
        into,
        target
    ));
    w.line(&format!("FROM {}", config.table(entity)));
    let mut conditions = vec![format!("{} = {}", config.naming.external_id, external_id)];
    conditions.extend(config.scope_filter(entity, None));
    emit_where(w, &conditions, ";");
}

/// Load the owning record by internal key; not found short-circuits.
pub fn emit_record_load(w: &mut CodeWriter, ctx: &CompileContext) {
    let entity = ctx.entity;
    let config = ctx.config;
    w.line("SELECT * INTO v_current");
    w.line(&format!("FROM {}", config.table(entity)));
    let mut conditions = vec![format!("{} = v_pk", config.pk_column(entity))];
    conditions.extend(config.scope_filter(entity, None));
    emit_where(w, &conditions, ";");
    w.if_open("NOT FOUND");
    let outcome = Outcome::error("not_found", &format!("{} not found", entity.name))
        .without_before()
        .with_metadata(jsonb_object(&[("pk", "v_pk".to_string())]));
    emit_short_circuit(w, &outcome, config);
    w.if_close();
    w.line("v_before := to_jsonb(v_current);");
}

/// Resolve every reference field the payload supplies. Absent keys leave
/// the variable NULL; unknown ids short-circuit to `<field>_not_found`.
pub fn emit_reference_resolution(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
) -> Result<(), CompilerError> {
    let config = ctx.config;
    let entity = ctx.entity;
    let schema = ctx.schema;
    let refs: Vec<String> = ctx.payload_refs().iter().cloned().collect();

    for name in refs {
        let Some(field) = entity.field(&name) else {
            continue;
        };
        let target_name = field.references.as_deref().unwrap_or_default();
        let target = schema.lookup(target_name).map_err(|k| ctx.error(k))?;

        let var = config.fk_variable(field);
        let key = quote_literal(&config.payload_key(field));
        ctx.declare(Declaration::new(&var, "INTEGER"));

        w.if_open(&format!("p_payload->>{} IS NOT NULL", key));
        emit_resolve(
            w,
            target,
            &format!("(p_payload->>{})::UUID", key),
            &var,
            false,
            config,
        );
        w.if_open("NOT FOUND");
        let outcome = Outcome::error(
            &format!("{}_not_found", field.name),
            &format!("{} not found", target.name),
        )
        .with_metadata(jsonb_object(&[
            ("field", quote_literal(&field.name)),
            ("id", format!("p_payload->{}", key)),
        ]));
        emit_short_circuit(w, &outcome, config);
        w.if_close();
        w.if_close();
    }
    Ok(())
}

/// Wrapper parameter carrying the record's external id: `p_contact_id`.
pub fn external_id_param(entity: &EntityDefinition, config: &GeneratorConfig) -> String {
    format!("p_{}_{}", entity.snake_name(), config.naming.external_id)
}

/// The public function: accepts external identifiers, resolves them and
/// delegates to `core`.
pub fn wrapper_function(
    entity: &EntityDefinition,
    action: &ActionDefinition,
    kind: ActionKind,
    core: &CompiledFunction,
    config: &GeneratorConfig,
) -> CompiledFunction {
    let mut params = vec![
        FunctionParam::new("p_tenant_id", "UUID"),
        FunctionParam::new("p_caller_id", "UUID"),
    ];
    let mut declarations = Vec::new();
    let mut w = CodeWriter::new();

    if kind.targets_record() {
        let id_param = external_id_param(entity, config);
        params.push(FunctionParam::new(&id_param, "UUID"));
        declarations.push(Declaration::new("v_pk", "INTEGER"));

        w.block_open("BEGIN");
        emit_resolve(&mut w, entity, &id_param, "v_pk", true, config);
        w.block_divider("EXCEPTION");
        w.block_open("WHEN NO_DATA_FOUND THEN");
        let outcome = Outcome::error("not_found", &format!("{} not found", entity.name))
            .without_before()
            .with_metadata(jsonb_object(&[(
                config.naming.external_id.as_str(),
                id_param.clone(),
            )]));
        w.line(&format!("RETURN {};", outcome.to_row(config)));
        w.dedent();
        w.block_close("END;");
        w.blank();
    }

    params.push(FunctionParam {
        name: "p_payload".into(),
        sql_type: "JSONB".into(),
        default: Some("'{}'::jsonb".into()),
    });

    let mut args = Vec::new();
    if kind.targets_record() {
        args.push("v_pk");
    }
    args.extend(["p_tenant_id", "p_caller_id", "p_payload"]);
    w.line(&format!(
        "RETURN {}({});",
        core.qualified_name(),
        args.join(", ")
    ));

    let schema = config.api_schema.clone();
    let metadata = FunctionMetadata {
        function: format!("{}.{}", schema, action.name),
        role: FunctionRole::Wrapper,
        entity: entity.qualified_name(),
        action: action.name.clone(),
        action_kind: kind,
        params: params.clone(),
        returns: config.result_type.clone(),
        description: action.description.clone(),
        delegates_to: Some(core.qualified_name()),
    };

    CompiledFunction {
        schema,
        name: action.name.clone(),
        params,
        returns: config.result_type.clone(),
        declarations,
        body: w.finish(),
        role: FunctionRole::Wrapper,
        metadata,
    }
}
