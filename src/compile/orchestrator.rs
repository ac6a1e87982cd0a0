//! Action orchestrator: wraps the caller's steps in the fixed stage order
//! and assembles the core/wrapper function pair.
//!
//! `Resolve → Check → Execute → Recalculate → Refresh → Respond`. Any stage
//! may short-circuit with NOOP or ERROR; the staged block's handler catches
//! the private SQLSTATE, which also rolls back whatever ran before it.

use std::collections::BTreeMap;

use tracing::debug;

use crate::codegen::writer::CodeWriter;
use crate::compile::checks::{emit_duplicate_checks, emit_required_parameters};
use crate::compile::context::CompileContext;
use crate::compile::identifier::{emit_recalculate, identifier_artifacts, recalculates};
use crate::compile::identity::{emit_record_load, emit_reference_resolution, wrapper_function};
use crate::compile::response::{Outcome, emit_result};
use crate::compile::sql::quote_literal;
use crate::compile::steps::{compile_steps, emit_refresh};
use crate::config::GeneratorConfig;
use crate::error::CompilerError;
use crate::expand::Expansion;
use crate::ir::types::{
    CompiledAction, CompiledFunction, Declaration, FunctionMetadata, FunctionParam, FunctionRole,
};
use crate::ir::validate::validate_steps;
use crate::parse::types::{ActionDefinition, ActionKind, DeleteMode, EntityDefinition, Step};
use crate::schema::SchemaService;

/// Kind of an action: declared, else from its name, else from the first
/// mutation of the owning record.
pub fn infer_kind(entity: &EntityDefinition, action: &ActionDefinition, steps: &[Step]) -> ActionKind {
    if let Some(kind) = action.kind {
        return kind;
    }
    let name = action.name.as_str();
    if name.starts_with("create_") {
        return ActionKind::Create;
    }
    if name.starts_with("update_") {
        return ActionKind::Update;
    }
    if name.starts_with("delete_") || name.starts_with("remove_") {
        return ActionKind::Delete;
    }

    let owns = |target: &Option<String>| target.as_deref().is_none_or(|t| t == entity.name);
    for step in steps {
        match step {
            Step::Insert { entity: target, .. } if owns(target) => return ActionKind::Create,
            Step::Update {
                entity: target,
                filter: None,
                ..
            } if owns(target) => return ActionKind::Update,
            Step::Delete {
                entity: target,
                filter: None,
                ..
            } if owns(target) => return ActionKind::Delete,
            _ => {}
        }
    }

    if action.pattern.is_some() {
        ActionKind::Update
    } else {
        ActionKind::Custom
    }
}

/// Default success code and message for a completed action.
fn success_response(entity: &EntityDefinition, action: &ActionDefinition, kind: ActionKind) -> (String, String) {
    let (code, message) = match kind {
        ActionKind::Create => ("created".to_string(), format!("{} created", entity.name)),
        ActionKind::Update => ("updated".to_string(), format!("{} updated", entity.name)),
        ActionKind::Delete => ("deleted".to_string(), format!("{} deleted", entity.name)),
        ActionKind::Custom => (
            format!("{}_completed", action.name),
            format!("{} completed", action.name),
        ),
    };
    (
        action.success_code.clone().unwrap_or(code),
        action.success_message.clone().unwrap_or(message),
    )
}

/// Compiles the actions of one project. Holds only shared, read-only state.
pub struct Orchestrator<'a> {
    schema: &'a dyn SchemaService,
    config: &'a GeneratorConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(schema: &'a dyn SchemaService, config: &'a GeneratorConfig) -> Self {
        Self { schema, config }
    }

    /// Compile one action from its expanded steps. `siblings` holds the
    /// kinds of every action on the same entity, for `invoke`.
    pub fn compile(
        &self,
        entity: &EntityDefinition,
        action: &ActionDefinition,
        expansion: Expansion,
        siblings: &BTreeMap<String, ActionKind>,
    ) -> Result<CompiledAction, Vec<CompilerError>> {
        let Expansion { steps, artifacts } = expansion;

        let problems = validate_steps(&steps);
        if !problems.is_empty() {
            return Err(problems
                .into_iter()
                .map(|p| {
                    CompilerError::from(p)
                        .with_entity(&entity.name)
                        .with_action(&action.name)
                })
                .collect());
        }

        let kind = infer_kind(entity, action, &steps);
        let mut compiled = self
            .compile_checked(entity, action, kind, &steps, siblings)
            .map_err(|e| vec![e])?;

        let mut all = artifacts;
        all.append(&mut compiled.artifacts);
        compiled.artifacts = all;

        debug!(
            entity = %entity.name,
            action = %action.name,
            kind = kind.as_str(),
            artifacts = compiled.artifacts.len(),
            "compiled action"
        );
        Ok(compiled)
    }

    fn compile_checked(
        &self,
        entity: &EntityDefinition,
        action: &ActionDefinition,
        kind: ActionKind,
        steps: &[Step],
        siblings: &BTreeMap<String, ActionKind>,
    ) -> Result<CompiledAction, CompilerError> {
        let config = self.config;
        let mut ctx = CompileContext::new(entity, action, kind, self.schema, config, siblings);

        // Stages are compiled out of order: resolution depends on which
        // references the later stages read from the payload.
        let mut check = CodeWriter::new();
        emit_required_parameters(&mut check, &ctx);
        if action.duplicate_detection && kind == ActionKind::Create {
            emit_duplicate_checks(&mut check, &mut ctx)?;
        }

        let execute = compile_steps(steps, "steps", &mut ctx)?;

        let mut recalculate = CodeWriter::new();
        let mut artifacts = Vec::new();
        if recalculates(&ctx) {
            emit_recalculate(&mut recalculate, &mut ctx)?;
            artifacts = identifier_artifacts(entity, self.schema, config).map_err(|k| ctx.error(k))?;
        }

        let mut refresh = CodeWriter::new();
        let refreshes = action
            .refresh_projection
            .unwrap_or(!entity.projections.is_empty());
        if refreshes {
            emit_refresh(&mut refresh, &ctx, entity, "v_pk");
        }

        let mut resolve = CodeWriter::new();
        if kind.targets_record() {
            emit_record_load(&mut resolve, &ctx);
        }
        emit_reference_resolution(&mut resolve, &mut ctx)?;

        let mut respond = CodeWriter::new();
        let snapshot = format!(
            "v_after := (SELECT to_jsonb(r) FROM {} r WHERE r.{} = v_pk);",
            config.table(entity),
            config.pk_column(entity)
        );
        if ctx.owner_deleted == Some(DeleteMode::Hard) {
            respond.line("v_after := NULL;");
        } else if ctx.conditional_delete == Some(DeleteMode::Hard) {
            respond.if_open("v_deleted");
            respond.line("v_after := NULL;");
            respond.if_else();
            respond.line(&snapshot);
            respond.if_close();
        } else {
            respond.line(&snapshot);
        }
        let (code, message) = success_response(entity, action, kind);
        emit_result(&mut respond, &Outcome::success(&code, &message), config);

        let stages = [
            ("Resolve", resolve.finish()),
            ("Check", check.finish()),
            ("Execute", execute),
            ("Recalculate", recalculate.finish()),
            ("Refresh", refresh.finish()),
            ("Respond", respond.finish()),
        ];

        let mut w = CodeWriter::new();
        w.block_open("BEGIN");
        let mut first = true;
        for (label, body) in stages.iter().filter(|(_, body)| !body.is_empty()) {
            if !first {
                w.blank();
            }
            first = false;
            w.comment(label);
            w.lines(body);
        }
        w.block_divider("EXCEPTION");
        w.block_open(&format!(
            "WHEN SQLSTATE {} THEN",
            quote_literal(&config.short_circuit_sqlstate)
        ));
        w.line("NULL;");
        w.dedent();
        w.block_close("END;");
        w.blank();
        w.line("RETURN v_result;");

        let core = self.core_function(entity, action, kind, &ctx, w.finish());
        let wrapper = wrapper_function(entity, action, kind, &core, config);

        Ok(CompiledAction {
            entity: entity.qualified_name(),
            action: action.name.clone(),
            kind,
            core,
            wrapper,
            artifacts,
        })
    }

    fn core_function(
        &self,
        entity: &EntityDefinition,
        action: &ActionDefinition,
        kind: ActionKind,
        ctx: &CompileContext,
        body: String,
    ) -> CompiledFunction {
        let config = self.config;

        let mut params = Vec::new();
        let mut v_pk = Declaration::new("v_pk", "INTEGER");
        if kind.targets_record() {
            params.push(FunctionParam::new("p_pk", "INTEGER"));
            v_pk = v_pk.with_default("p_pk");
        }
        params.extend([
            FunctionParam::new("p_tenant_id", "UUID"),
            FunctionParam::new("p_caller_id", "UUID"),
            FunctionParam::new("p_payload", "JSONB"),
        ]);

        let mut declarations = vec![
            Declaration::new("v_result", &config.result_type),
            v_pk,
            Declaration::new("v_current", &format!("{}%ROWTYPE", config.table(entity))),
            Declaration::new("v_before", "JSONB"),
            Declaration::new("v_after", "JSONB"),
            Declaration::new("v_changed_fields", "TEXT[]").with_default("ARRAY[]::TEXT[]"),
            Declaration::new("v_metadata", "JSONB").with_default("'{}'::jsonb"),
        ];
        declarations.extend(ctx.declarations());

        let metadata = FunctionMetadata {
            function: format!("{}.{}", entity.schema, action.name),
            role: FunctionRole::Core,
            entity: entity.qualified_name(),
            action: action.name.clone(),
            action_kind: kind,
            params: params.clone(),
            returns: config.result_type.clone(),
            description: action.description.clone(),
            delegates_to: None,
        };

        CompiledFunction {
            schema: entity.schema.clone(),
            name: action.name.clone(),
            params,
            returns: config.result_type.clone(),
            declarations,
            body,
            role: FunctionRole::Core,
            metadata,
        }
    }
}
