//! Step compilers: one PL/pgSQL fragment per primitive step.
//!
//! `Step` is a closed enum and every variant is handled here; pattern
//! expansion has already reduced everything else to these.

use std::collections::BTreeMap;

use crate::codegen::writer::CodeWriter;
use crate::compile::checks::{emit_cascades, emit_dependency_checks};
use crate::compile::context::{CompileContext, LocalKind};
use crate::compile::expression::payload_read;
use crate::compile::response::{Outcome, emit_short_circuit};
use crate::compile::sql::{emit_where, jsonb_literal, jsonb_object, quote_literal, text_array};
use crate::error::{CompilerError, ErrorKind};
use crate::ir::types::Declaration;
use crate::parse::types::{
    ActionKind, DeleteMode, EntityDefinition, Expression, FieldDefinition, FieldSource,
    FieldType, RelatedRows, Step,
};

/// Compiled form of one step.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    pub body: String,
    /// Locals this step bound for the steps after it.
    pub locals: Vec<Declaration>,
}

/// Compile a sequence in order; paths are recorded as `label[i]`.
pub fn compile_steps(
    steps: &[Step],
    label: &str,
    ctx: &mut CompileContext,
) -> Result<String, CompilerError> {
    let mut body = String::new();
    for (i, step) in steps.iter().enumerate() {
        ctx.enter(format!("{}[{}]", label, i));
        let fragment = compile_step(step, ctx);
        ctx.leave();
        body.push_str(&fragment?.body);
    }
    Ok(body)
}

pub fn compile_step(step: &Step, ctx: &mut CompileContext) -> Result<Fragment, CompilerError> {
    let mut w = CodeWriter::new();
    let mut locals = Vec::new();

    match step {
        Step::Validate {
            condition,
            error,
            message,
            details,
        } => compile_validate(&mut w, ctx, condition, error, message.as_deref(), details)?,
        Step::If {
            condition,
            then,
            otherwise,
        } => compile_if(&mut w, ctx, condition, then, otherwise)?,
        Step::Insert {
            entity,
            fields,
            store,
        } => {
            let target = ctx.target_entity(entity.as_deref())?;
            if ctx.is_owner(target) {
                compile_owner_insert(&mut w, ctx, fields)?;
                if let Some(store) = store {
                    let decl = ctx.bind_local(store, "INTEGER", LocalKind::Scalar)?;
                    w.line(&format!("{} := v_pk;", decl.name));
                    locals.push(decl);
                }
            } else {
                locals.extend(compile_related_insert(
                    &mut w,
                    ctx,
                    target,
                    fields,
                    store.as_deref(),
                )?);
            }
        }
        Step::Update {
            entity,
            fields,
            partial,
            filter,
        } => {
            let target = ctx.target_entity(entity.as_deref())?;
            let partial = partial.unwrap_or(ctx.action.partial_update);
            match filter {
                None if ctx.is_owner(target) => compile_owner_update(&mut w, ctx, fields, partial)?,
                None => {
                    return Err(ctx.error(ErrorKind::InvalidStep(format!(
                        "update of '{}' needs a filter",
                        target.name
                    ))));
                }
                Some(filter) => {
                    compile_filtered_update(&mut w, ctx, target, fields, partial, filter)?
                }
            }
        }
        Step::Delete {
            entity,
            filter,
            mode,
        } => {
            let target = ctx.target_entity(entity.as_deref())?;
            match filter {
                None if ctx.is_owner(target) => compile_owner_delete(&mut w, ctx, *mode)?,
                None => {
                    return Err(ctx.error(ErrorKind::InvalidStep(format!(
                        "delete of '{}' needs a filter",
                        target.name
                    ))));
                }
                Some(filter) => compile_filtered_delete(&mut w, ctx, target, filter, *mode)?,
            }
        }
        Step::Invoke {
            function,
            args,
            store,
            returns,
        } => {
            if let Some(decl) =
                compile_invoke(&mut w, ctx, function, args, store.as_deref(), returns.as_deref())?
            {
                locals.push(decl);
            }
        }
        Step::Notify { event, payload } => compile_notify(&mut w, ctx, event, payload.as_ref())?,
        Step::Iterate {
            item,
            collection,
            related,
            steps,
        } => compile_iterate(&mut w, ctx, item, collection.as_ref(), related.as_ref(), steps)?,
        Step::RefreshProjection { entity, key } => {
            let target = ctx.target_entity(entity.as_deref())?;
            let key = match key {
                Some(expr) => ctx.expr(expr)?.sql,
                None => "v_pk".into(),
            };
            emit_refresh(&mut w, ctx, target, &key);
        }
    }

    Ok(Fragment {
        body: w.finish(),
        locals,
    })
}

// =============================================================================
// CONTROL FLOW
// =============================================================================

fn compile_validate(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    condition: &Expression,
    code: &str,
    message: Option<&str>,
    details: &BTreeMap<String, Expression>,
) -> Result<(), CompilerError> {
    let condition = ctx.expr(condition)?;
    let mut metadata = Vec::with_capacity(details.len());
    for (key, expr) in details {
        let value = match expr {
            Expression::Literal { value } => jsonb_literal(value),
            other => format!("to_jsonb({})", ctx.expr(other)?.sql),
        };
        metadata.push((key.as_str(), value));
    }

    let message = message
        .map(str::to_string)
        .unwrap_or_else(|| format!("Validation failed: {}", code));
    w.if_open(&format!("NOT COALESCE({}, FALSE)", condition.sql));
    let outcome = Outcome::error(code, &message).with_metadata(jsonb_object(&metadata));
    emit_short_circuit(w, &outcome, ctx.config);
    w.if_close();
    Ok(())
}

fn compile_if(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    condition: &Expression,
    then: &[Step],
    otherwise: &[Step],
) -> Result<(), CompilerError> {
    let condition = ctx.expr(condition)?;
    let then_body = ctx.scoped(|ctx| compile_steps(then, "then", ctx))?;
    let else_body = ctx.scoped(|ctx| compile_steps(otherwise, "else", ctx))?;

    w.if_open(&condition.sql);
    w.lines(&then_body);
    if !otherwise.is_empty() {
        w.if_else();
        w.lines(&else_body);
    }
    w.if_close();
    Ok(())
}

fn compile_iterate(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    item: &str,
    collection: Option<&Expression>,
    related: Option<&RelatedRows>,
    steps: &[Step],
) -> Result<(), CompilerError> {
    let config = ctx.config;
    let header = match (collection, related) {
        (Some(expr), None) => {
            let source = ctx.expr(expr)?.sql;
            (
                format!(
                    "SELECT value FROM jsonb_array_elements(COALESCE({}, '[]'::jsonb))",
                    source
                ),
                "JSONB",
                LocalKind::Json,
            )
        }
        (None, Some(rows)) => {
            let schema = ctx.schema;
            let dependent = schema.lookup(&rows.entity).map_err(|k| ctx.error(k))?;
            let field = dependent.field(&rows.field).ok_or_else(|| {
                ctx.error(ErrorKind::UnknownField {
                    entity: dependent.name.clone(),
                    field: rows.field.clone(),
                })
            })?;
            let mut conditions = vec![format!("{} = v_pk", config.column(field))];
            conditions.extend(config.scope_filter(dependent, None));
            let query = format!(
                "SELECT * FROM {} WHERE {} ORDER BY {}",
                config.table(dependent),
                conditions.join(" AND "),
                config.pk_column(dependent)
            );
            let mut columns: BTreeMap<String, String> = dependent
                .fields
                .iter()
                .map(|f| (f.name.clone(), config.column(f)))
                .collect();
            for column in config.system_columns(dependent) {
                columns.insert(column.clone(), column);
            }
            (
                query,
                "RECORD",
                LocalKind::Row {
                    entity: dependent.name.clone(),
                    columns,
                },
            )
        }
        _ => {
            return Err(ctx.error(ErrorKind::InvalidStep(
                "iterate needs exactly one of 'collection' or 'related'".into(),
            )));
        }
    };
    let (query, sql_type, kind) = header;

    let (var, body) = ctx.scoped(|ctx| {
        let decl = ctx.bind_local(item, sql_type, kind)?;
        let body = compile_steps(steps, "steps", ctx)?;
        Ok((decl.name, body))
    })?;

    w.block_open(&format!("FOR {} IN {} LOOP", var, query));
    w.lines(&body);
    w.block_close("END LOOP;");
    Ok(())
}

// =============================================================================
// INSERT
// =============================================================================

fn target_field<'e>(
    ctx: &CompileContext,
    target: &'e EntityDefinition,
    name: &str,
) -> Result<&'e FieldDefinition, CompilerError> {
    target.field(name).ok_or_else(|| {
        ctx.error(ErrorKind::UnknownField {
            entity: target.name.clone(),
            field: name.to_string(),
        })
    })
}

/// Value of an owning-entity field as supplied in the payload.
fn payload_value(ctx: &mut CompileContext, field: &FieldDefinition) -> String {
    match field.field_type {
        FieldType::Ref => {
            ctx.require_payload_ref(&field.name);
            ctx.config.fk_variable(field)
        }
        ty => payload_read(&ctx.config.payload_key(field), ty),
    }
}

/// Identity, tenant and audit columns every new row gets.
fn stamped_columns(
    ctx: &CompileContext,
    target: &EntityDefinition,
) -> (Vec<(String, String)>, Vec<(String, String)>) {
    let n = &ctx.config.naming;
    let mut head = vec![(n.external_id.clone(), "gen_random_uuid()".to_string())];
    if target.tenant_scoped {
        head.push((n.tenant.clone(), "p_tenant_id".into()));
    }
    let tail = vec![
        (n.created_at.clone(), "NOW()".to_string()),
        (n.created_by.clone(), "p_caller_id".to_string()),
        (n.updated_at.clone(), "NOW()".to_string()),
        (n.updated_by.clone(), "p_caller_id".to_string()),
    ];
    (head, tail)
}

fn emit_insert(
    w: &mut CodeWriter,
    table: &str,
    columns: &[(String, String)],
    returning: Option<String>,
) {
    w.line(&format!("INSERT INTO {} (", table));
    w.indent();
    for (i, (column, _)) in columns.iter().enumerate() {
        let sep = if i + 1 < columns.len() { "," } else { "" };
        w.line(&format!("{}{}", column, sep));
    }
    w.dedent();
    w.line(") VALUES (");
    w.indent();
    for (i, (_, value)) in columns.iter().enumerate() {
        let sep = if i + 1 < columns.len() { "," } else { "" };
        w.line(&format!("{}{}", value, sep));
    }
    w.dedent();
    match returning {
        Some(returning) => {
            w.line(")");
            w.line(&format!("RETURNING {};", returning));
        }
        None => w.line(");"),
    }
}

fn compile_owner_insert(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    fields: &BTreeMap<String, Expression>,
) -> Result<(), CompilerError> {
    let entity = ctx.entity;
    let config = ctx.config;
    let creating = ctx.kind == ActionKind::Create;

    let mut assigned = Vec::new();
    for (name, expr) in fields {
        let field = target_field(ctx, entity, name)?;
        assigned.push((field, ctx.expr(expr)?.sql));
    }

    for field in &entity.fields {
        if fields.contains_key(&field.name) {
            continue;
        }
        let key = quote_literal(&config.payload_key(field));
        if creating && !field.nullable {
            w.if_open(&format!(
                "p_payload->{key} IS NULL OR jsonb_typeof(p_payload->{key}) = 'null'"
            ));
            let outcome = Outcome::error(
                "missing_required_field",
                &format!("Missing required field: {}", field.name),
            )
            .with_metadata(jsonb_object(&[("field", quote_literal(&field.name))]));
            emit_short_circuit(w, &outcome, config);
            w.if_close();
        }
        let value = payload_value(ctx, field);
        let value = if creating {
            value
        } else {
            format!(
                "CASE WHEN p_payload ? {} THEN {} ELSE v_current.{} END",
                key,
                value,
                config.column(field)
            )
        };
        assigned.push((field, value));
    }

    let (head, tail) = stamped_columns(ctx, entity);
    let mut columns = head;
    columns.extend(assigned.iter().map(|(f, v)| (config.column(f), v.clone())));
    columns.extend(tail);

    emit_insert(
        w,
        &config.table(entity),
        &columns,
        Some("* INTO v_current".into()),
    );
    w.line(&format!("v_pk := v_current.{};", config.pk_column(entity)));
    if creating {
        let names: Vec<&str> = assigned.iter().map(|(f, _)| f.name.as_str()).collect();
        w.line(&format!("v_changed_fields := {};", text_array(&names)));
    }
    Ok(())
}

fn compile_related_insert(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    target: &EntityDefinition,
    fields: &BTreeMap<String, Expression>,
    store: Option<&str>,
) -> Result<Option<Declaration>, CompilerError> {
    let config = ctx.config;
    let mut assigned = Vec::new();
    for (name, expr) in fields {
        let field = target_field(ctx, target, name)?;
        assigned.push((config.column(field), ctx.expr(expr)?.sql));
    }

    let (head, tail) = stamped_columns(ctx, target);
    let mut columns = head;
    columns.extend(assigned);
    columns.extend(tail);

    let decl = match store {
        Some(store) => Some(ctx.bind_local(store, "INTEGER", LocalKind::Scalar)?),
        None => None,
    };
    let returning = decl
        .as_ref()
        .map(|d| format!("{} INTO {}", config.pk_column(target), d.name));
    emit_insert(w, &config.table(target), &columns, returning);
    Ok(decl)
}

// =============================================================================
// UPDATE
// =============================================================================

/// One `SET` entry: column, value, and the payload key that gates it in
/// partial mode.
struct Assignment<'e> {
    field: &'e FieldDefinition,
    value: String,
    /// Payload key the value is read from; only these are presence-gated
    /// by a partial update.
    key: Option<String>,
}

fn assignments<'e>(
    ctx: &mut CompileContext,
    target: &'e EntityDefinition,
    fields: &BTreeMap<String, Expression>,
    on_columns: bool,
) -> Result<Vec<Assignment<'e>>, CompilerError> {
    let config = ctx.config;
    let owner = ctx.entity;

    if fields.is_empty() {
        return Ok(target
            .fields
            .iter()
            .map(|field| Assignment {
                field,
                value: payload_value(ctx, field),
                key: Some(config.payload_key(field)),
            })
            .collect());
    }

    let mut out = Vec::with_capacity(fields.len());
    for (name, expr) in fields {
        let field = target_field(ctx, target, name)?;
        let value = if on_columns {
            ctx.expr_on(expr, target)?.sql
        } else {
            ctx.expr(expr)?.sql
        };
        let key = match expr {
            Expression::Field {
                field: source,
                source: FieldSource::Input,
            } => Some(
                owner
                    .field(source)
                    .map(|def| config.payload_key(def))
                    .unwrap_or_else(|| source.clone()),
            ),
            Expression::Payload { key, .. } => Some(key.clone()),
            _ => None,
        };
        out.push(Assignment { field, value, key });
    }
    Ok(out)
}

fn emit_set(
    w: &mut CodeWriter,
    ctx: &CompileContext,
    table: &str,
    assignments: &[Assignment],
    partial: bool,
) {
    let config = ctx.config;
    let n = &config.naming;
    let mut lines: Vec<String> = assignments
        .iter()
        .map(|a| {
            let column = config.column(a.field);
            match &a.key {
                Some(key) if partial => format!(
                    "{} = CASE WHEN p_payload ? {} THEN {} ELSE {} END",
                    column,
                    quote_literal(key),
                    a.value,
                    column
                ),
                _ => format!("{} = {}", column, a.value),
            }
        })
        .collect();
    lines.push(format!("{} = NOW()", n.updated_at));
    lines.push(format!("{} = p_caller_id", n.updated_by));

    w.line(&format!("UPDATE {} SET", table));
    w.indent();
    let last = lines.len() - 1;
    for (i, line) in lines.iter().enumerate() {
        let sep = if i < last { "," } else { "" };
        w.line(&format!("{}{}", line, sep));
    }
    w.dedent();
}

fn compile_owner_update(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    fields: &BTreeMap<String, Expression>,
    partial: bool,
) -> Result<(), CompilerError> {
    let entity = ctx.entity;
    let config = ctx.config;
    let assignments = assignments(ctx, entity, fields, false)?;
    ctx.declare(Declaration::new(
        "v_prior",
        &format!("{}%ROWTYPE", config.table(entity)),
    ));

    w.line("v_prior := v_current;");
    emit_set(w, ctx, &config.table(entity), &assignments, partial);
    w.line(&format!("WHERE {} = v_pk", config.pk_column(entity)));
    w.line("RETURNING * INTO v_current;");

    for a in &assignments {
        let column = config.column(a.field);
        let name = quote_literal(&a.field.name);
        w.if_open(&format!(
            "v_current.{column} IS DISTINCT FROM v_prior.{column} AND NOT ({name} = ANY(v_changed_fields))"
        ));
        w.line(&format!(
            "v_changed_fields := array_append(v_changed_fields, {});",
            name
        ));
        w.if_close();
    }
    Ok(())
}

fn compile_filtered_update(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    target: &EntityDefinition,
    fields: &BTreeMap<String, Expression>,
    partial: bool,
    filter: &Expression,
) -> Result<(), CompilerError> {
    if fields.is_empty() {
        return Err(ctx.error(ErrorKind::InvalidStep(format!(
            "filtered update of '{}' assigns no fields",
            target.name
        ))));
    }
    let config = ctx.config;
    let assignments = assignments(ctx, target, fields, true)?;
    let filter = ctx.expr_on(filter, target)?;

    emit_set(w, ctx, &config.table(target), &assignments, partial);
    let mut conditions = config.scope_filter(target, None);
    conditions.push(format!("({})", filter.sql));
    emit_where(w, &conditions, ";");
    Ok(())
}

// =============================================================================
// DELETE
// =============================================================================

fn delete_mode(
    ctx: &CompileContext,
    target: &EntityDefinition,
    requested: Option<DeleteMode>,
) -> Result<DeleteMode, CompilerError> {
    let mode = requested.unwrap_or(target.delete_policy.mode);
    if mode == DeleteMode::Soft && !target.soft_deletes() {
        return Err(ctx.error(ErrorKind::InvalidStep(format!(
            "'{}' is hard-delete only and has no soft-delete columns",
            target.name
        ))));
    }
    Ok(mode)
}

fn compile_owner_delete(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    requested: Option<DeleteMode>,
) -> Result<(), CompilerError> {
    let entity = ctx.entity;
    let config = ctx.config;
    let n = &config.naming;
    let mode = delete_mode(ctx, entity, requested)?;
    let table = config.table(entity);
    let pk = config.pk_column(entity);

    match mode {
        DeleteMode::Hard => {
            emit_dependency_checks(w, ctx, entity, "v_pk")?;
            emit_cascades(w, ctx, entity, "v_pk", mode)?;
            w.line(&format!("DELETE FROM {} WHERE {} = v_pk;", table, pk));
        }
        DeleteMode::Soft => {
            emit_cascades(w, ctx, entity, "v_pk", mode)?;
            w.line(&format!(
                "UPDATE {} SET {} = NOW(), {} = p_caller_id",
                table, n.deleted_at, n.deleted_by
            ));
            w.line(&format!("WHERE {} = v_pk", pk));
            w.line("RETURNING * INTO v_current;");
            w.line(&format!(
                "v_changed_fields := array_append(v_changed_fields, {});",
                quote_literal(&n.deleted_at)
            ));
        }
    }
    if ctx.is_nested() {
        ctx.declare(Declaration::new("v_deleted", "BOOLEAN").with_default("FALSE"));
        w.line("v_deleted := TRUE;");
        if ctx.conditional_delete != Some(DeleteMode::Hard) {
            ctx.conditional_delete = Some(mode);
        }
    } else {
        ctx.owner_deleted = Some(mode);
    }
    Ok(())
}

fn compile_filtered_delete(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    target: &EntityDefinition,
    filter: &Expression,
    requested: Option<DeleteMode>,
) -> Result<(), CompilerError> {
    let config = ctx.config;
    let n = &config.naming;
    let mode = delete_mode(ctx, target, requested)?;
    let filter = ctx.expr_on(filter, target)?;
    let table = config.table(target);

    let mut conditions = Vec::new();
    if target.tenant_scoped {
        conditions.push(format!("{} = p_tenant_id", n.tenant));
    }
    match mode {
        DeleteMode::Hard => w.line(&format!("DELETE FROM {}", table)),
        DeleteMode::Soft => {
            w.line(&format!(
                "UPDATE {} SET {} = NOW(), {} = p_caller_id",
                table, n.deleted_at, n.deleted_by
            ));
            conditions.push(format!("{} IS NULL", n.deleted_at));
        }
    }
    conditions.push(format!("({})", filter.sql));
    emit_where(w, &conditions, ";");
    Ok(())
}

// =============================================================================
// INVOKE / NOTIFY / REFRESH
// =============================================================================

fn is_function_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn compile_invoke(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    function: &str,
    args: &[Expression],
    store: Option<&str>,
    returns: Option<&str>,
) -> Result<Option<Declaration>, CompilerError> {
    let config = ctx.config;

    if let Some(&sibling_kind) = ctx.siblings.get(function) {
        let payload = match args {
            [] => "p_payload".to_string(),
            [payload] => ctx.expr(payload)?.sql,
            _ => {
                return Err(ctx.error(ErrorKind::InvalidStep(format!(
                    "invoke of action '{}' takes at most one payload argument",
                    function
                ))));
            }
        };
        let (var, decl) = match store {
            Some(store) => {
                let decl = ctx.bind_local(store, &config.result_type, LocalKind::Result)?;
                (decl.name.clone(), Some(decl))
            }
            None => {
                let var = format!("v_invoke_{}", function);
                ctx.declare(Declaration::new(&var, &config.result_type));
                (var, None)
            }
        };

        let mut call_args = Vec::new();
        if sibling_kind.targets_record() {
            call_args.push("v_pk".to_string());
        }
        call_args.extend(["p_tenant_id".to_string(), "p_caller_id".to_string(), payload]);
        w.line(&format!(
            "{} := {}.{}({});",
            var,
            ctx.entity.schema,
            function,
            call_args.join(", ")
        ));
        w.if_open(&format!("({}).status <> 'SUCCESS'", var));
        w.line(&format!("v_result := {};", var));
        w.line(&format!(
            "RAISE EXCEPTION USING ERRCODE = {};",
            quote_literal(&config.short_circuit_sqlstate)
        ));
        w.if_close();
        if ctx.kind != ActionKind::Create {
            w.line(&format!(
                "SELECT * INTO v_current FROM {} WHERE {} = v_pk;",
                config.table(ctx.entity),
                config.pk_column(ctx.entity)
            ));
        }
        return Ok(decl);
    }

    if !is_function_name(function) {
        return Err(ctx.error(ErrorKind::InvalidStep(format!(
            "'{}' is neither a sibling action nor a function name",
            function
        ))));
    }
    let rendered = args
        .iter()
        .map(|a| ctx.expr(a).map(|c| c.sql))
        .collect::<Result<Vec<_>, _>>()?;
    let call = format!("{}({})", function, rendered.join(", "));

    match store {
        None => {
            w.line(&format!("PERFORM {};", call));
            Ok(None)
        }
        Some(store) => {
            let sql_type = returns.unwrap_or("JSONB");
            let kind = if sql_type.eq_ignore_ascii_case("JSONB") {
                LocalKind::Json
            } else {
                LocalKind::Scalar
            };
            let decl = ctx.bind_local(store, sql_type, kind)?;
            w.line(&format!("{} := {};", decl.name, call));
            Ok(Some(decl))
        }
    }
}

fn compile_notify(
    w: &mut CodeWriter,
    ctx: &mut CompileContext,
    event: &str,
    payload: Option<&Expression>,
) -> Result<(), CompilerError> {
    let payload = match payload {
        None => "p_payload".to_string(),
        Some(Expression::Literal { value }) => jsonb_literal(value),
        Some(expr @ Expression::Payload { as_type: None, .. }) => ctx.expr(expr)?.sql,
        Some(expr) => format!("to_jsonb({})", ctx.expr(expr)?.sql),
    };
    w.line(&format!(
        "PERFORM {}({}, {}, v_pk, {});",
        ctx.config.notify_function,
        quote_literal(event),
        quote_literal(&ctx.entity.qualified_name()),
        payload
    ));
    Ok(())
}

/// One refresher call per projection; entities without declared projections
/// refresh under their own qualified name.
pub fn emit_refresh(w: &mut CodeWriter, ctx: &CompileContext, target: &EntityDefinition, key: &str) {
    let names = if target.projections.is_empty() {
        vec![target.qualified_name()]
    } else {
        target.projections.clone()
    };
    for name in names {
        w.line(&format!(
            "PERFORM {}({}, {});",
            ctx.config.refresh_function,
            quote_literal(&name),
            key
        ));
    }
}
