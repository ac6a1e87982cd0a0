//! Duplicate and dependency checks, plus the cascades a delete triggers.

use crate::codegen::writer::CodeWriter;
use crate::compile::context::CompileContext;
use crate::compile::expression::payload_read;
use crate::compile::response::{Outcome, Status, emit_short_circuit};
use crate::compile::sql::{emit_where, jsonb_object, quote_literal};
use crate::error::{CompilerError, ErrorKind};
use crate::ir::types::Declaration;
use crate::parse::types::{
    BlockedOutcome, CascadeMode, DeleteMode, DependencyRule, EntityDefinition, FieldType,
};

/// Required action parameters must be present and non-null.
pub fn emit_required_parameters(w: &mut CodeWriter, ctx: &CompileContext) {
    for param in ctx.action.parameters.iter().filter(|p| p.required) {
        let key = quote_literal(&param.name);
        w.if_open(&format!(
            "p_payload->{key} IS NULL OR jsonb_typeof(p_payload->{key}) = 'null'"
        ));
        let outcome = Outcome::error(
            "missing_parameter",
            &format!("Missing required parameter: {}", param.name),
        )
        .with_metadata(jsonb_object(&[("parameter", key.clone())]));
        emit_short_circuit(w, &outcome, ctx.config);
        w.if_close();
    }
}

/// One existence query per unique constraint checked on create. A match
/// short-circuits to NOOP `already_exists` naming the conflicting record.
pub fn emit_duplicate_checks(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
) -> Result<(), CompilerError> {
    let entity = ctx.entity;
    let config = ctx.config;
    let n = &config.naming;

    for constraint in entity.unique_constraints.iter().filter(|c| c.check_on_create) {
        let mut conditions = config.scope_filter(entity, None);
        for name in &constraint.fields {
            let field = entity.field(name).ok_or_else(|| {
                ctx.error(ErrorKind::UnknownField {
                    entity: entity.name.clone(),
                    field: name.clone(),
                })
            })?;
            let value = match field.field_type {
                FieldType::Ref => {
                    ctx.require_payload_ref(&field.name);
                    config.fk_variable(field)
                }
                ty => payload_read(&config.payload_key(field), ty),
            };
            conditions.push(format!("{} = {}", config.column(field), value));
        }

        ctx.declare(Declaration::new(
            "v_conflict",
            &format!("{}%ROWTYPE", config.table(entity)),
        ));

        let constraint_name = constraint.name_for(entity);
        w.comment(&format!("unique: {}", constraint_name));
        w.line("SELECT * INTO v_conflict");
        w.line(&format!("FROM {}", config.table(entity)));
        emit_where(w, &conditions, "");
        w.line("LIMIT 1;");
        w.if_open("FOUND");

        let mut reference = vec![(
            n.external_id.as_str(),
            format!("v_conflict.{}", n.external_id),
        )];
        if entity.identifier.is_some() {
            reference.push((n.identifier.as_str(), format!("v_conflict.{}", n.identifier)));
        }
        let mut metadata = vec![
            ("constraint", quote_literal(&constraint_name)),
            ("conflict", jsonb_object(&reference)),
        ];
        if constraint.return_conflict_object {
            metadata.push(("conflict_object", "to_jsonb(v_conflict)".to_string()));
        }

        let message = constraint
            .message
            .clone()
            .unwrap_or_else(|| format!("{} already exists", entity.name));
        let outcome = Outcome::noop("already_exists", &message).with_metadata(jsonb_object(&metadata));
        emit_short_circuit(w, &outcome, config);
        w.if_close();
    }
    Ok(())
}

/// Blocking dependency checks for a hard delete of the record keyed `key`.
/// Any live dependent short-circuits with the list of blocking entities.
pub fn emit_dependency_checks(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    owner: &EntityDefinition,
    key: &str,
) -> Result<(), CompilerError> {
    let config = ctx.config;
    let rules: Vec<&DependencyRule> = owner
        .delete_policy
        .dependencies
        .iter()
        .filter(|r| r.blocking)
        .collect();
    if rules.is_empty() {
        return Ok(());
    }

    ctx.declare(Declaration::new("v_blocked", "TEXT[]"));
    w.line("v_blocked := ARRAY[]::TEXT[];");

    for rule in rules {
        let (dependent, column) = dependent_column(ctx, rule)?;
        let mut conditions = vec![format!("{} = {}", column, key)];
        conditions.extend(config.scope_filter(dependent, None));
        w.if_open(&format!(
            "EXISTS (SELECT 1 FROM {} WHERE {})",
            config.table(dependent),
            conditions.join(" AND ")
        ));
        w.line(&format!(
            "v_blocked := array_append(v_blocked, {});",
            quote_literal(&dependent.name)
        ));
        w.if_close();
    }

    w.if_open("cardinality(v_blocked) > 0");
    let message = format!("{} has dependent records", owner.name);
    let status = match owner.delete_policy.blocked_outcome {
        BlockedOutcome::Error => Status::Error,
        BlockedOutcome::Noop => Status::Noop,
    };
    let outcome = Outcome::early(status, "cannot_delete_with_dependencies", &message)
        .with_metadata(jsonb_object(&[("blocked_by", "to_jsonb(v_blocked)".to_string())]));
    emit_short_circuit(w, &outcome, config);
    w.if_close();
    Ok(())
}

/// Cascades of the non-blocking rules, run before the owner itself is
/// deleted with `mode`.
pub fn emit_cascades(
    w: &mut CodeWriter,
    ctx: &CompileContext,
    owner: &EntityDefinition,
    key: &str,
    mode: DeleteMode,
) -> Result<(), CompilerError> {
    let config = ctx.config;
    let n = &config.naming;

    for rule in owner
        .delete_policy
        .dependencies
        .iter()
        .filter(|r| !r.blocking && r.cascade != CascadeMode::None)
    {
        let (dependent, column) = dependent_column(ctx, rule)?;
        let table = config.table(dependent);
        let mut conditions = vec![format!("{} = {}", column, key)];

        let soft = match rule.cascade {
            CascadeMode::SoftDelete => dependent.soft_deletes(),
            CascadeMode::Delete => mode == DeleteMode::Soft && dependent.soft_deletes(),
            CascadeMode::Nullify | CascadeMode::None => false,
        };

        w.comment(&format!("cascade: {}", dependent.name));
        if rule.cascade == CascadeMode::Nullify {
            w.line(&format!(
                "UPDATE {} SET {} = NULL, {} = NOW(), {} = p_caller_id",
                table, column, n.updated_at, n.updated_by
            ));
            conditions.extend(config.scope_filter(dependent, None));
        } else if soft {
            w.line(&format!(
                "UPDATE {} SET {} = NOW(), {} = p_caller_id",
                table, n.deleted_at, n.deleted_by
            ));
            conditions.extend(config.scope_filter(dependent, None));
        } else {
            // Hard removal reaches soft-deleted dependents too.
            w.line(&format!("DELETE FROM {}", table));
            if dependent.tenant_scoped {
                conditions.push(format!("{} = p_tenant_id", n.tenant));
            }
        }
        emit_where(w, &conditions, ";");
    }
    Ok(())
}

/// The dependent entity of a rule and its column referencing the owner.
fn dependent_column<'a>(
    ctx: &CompileContext<'a>,
    rule: &DependencyRule,
) -> Result<(&'a EntityDefinition, String), CompilerError> {
    let schema = ctx.schema;
    let dependent = schema.lookup(&rule.entity).map_err(|k| ctx.error(k))?;
    let field = dependent.field(&rule.field).ok_or_else(|| {
        ctx.error(ErrorKind::UnknownField {
            entity: dependent.name.clone(),
            field: rule.field.clone(),
        })
    })?;
    Ok((dependent, ctx.config.column(field)))
}
