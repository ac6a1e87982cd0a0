//! Expression compiler: `Expression` → SQL expression text.
//!
//! Pure function of the expression and its scope. Reports the fields it
//! touched so callers can track dependencies and resolve payload references.

use std::collections::BTreeSet;

use crate::compile::context::{LocalKind, Locals};
use crate::compile::sql::{quote_literal, render_literal};
use crate::config::GeneratorConfig;
use crate::error::ErrorKind;
use crate::parse::types::{
    ActionParameter, ContextValue, EntityDefinition, Expression, FieldSource, FieldType,
};

/// Functions with a defined lowering, keyed by their lowercase name.
const FUNCTIONS: &[(&str, &str)] = &[
    ("abs", "ABS"),
    ("array_length", "array_length"),
    ("cardinality", "cardinality"),
    ("coalesce", "COALESCE"),
    ("concat", "CONCAT"),
    ("current_date", "CURRENT_DATE"),
    ("greatest", "GREATEST"),
    ("jsonb_array_length", "jsonb_array_length"),
    ("least", "LEAST"),
    ("length", "LENGTH"),
    ("lower", "LOWER"),
    ("now", "NOW"),
    ("nullif", "NULLIF"),
    ("position", "POSITION"),
    ("round", "ROUND"),
    ("substring", "SUBSTRING"),
    ("trim", "TRIM"),
    ("upper", "UPPER"),
];

const RESULT_FIELDS: &[&str] = &[
    "status",
    "code",
    "message",
    "before",
    "after",
    "changed_fields",
    "metadata",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledExpr {
    pub sql: String,
    /// Every entity field referenced, from the record or the payload.
    pub fields: BTreeSet<String>,
    /// Owning-entity fields read from the payload.
    pub inputs: BTreeSet<String>,
}

/// How record fields are addressed.
#[derive(Debug, Clone, Copy)]
pub enum RecordAccess<'a> {
    /// Through a row variable: `v_current.email`.
    Variable(&'a str),
    /// As bare columns, inside a statement on the table itself.
    Columns,
}

static NO_LOCALS: Locals = Locals::new();

pub struct ExprScope<'a> {
    /// Entity whose payload the action receives.
    pub owner: &'a EntityDefinition,
    /// Entity whose columns bare field names refer to.
    pub record: &'a EntityDefinition,
    pub access: RecordAccess<'a>,
    pub params: &'a [ActionParameter],
    pub locals: &'a Locals,
    pub config: &'a GeneratorConfig,
}

impl<'a> ExprScope<'a> {
    /// Fields read from the current record of `entity`, no params or locals.
    pub fn new(entity: &'a EntityDefinition, config: &'a GeneratorConfig) -> Self {
        Self {
            owner: entity,
            record: entity,
            access: RecordAccess::Variable("v_current"),
            params: &[],
            locals: &NO_LOCALS,
            config,
        }
    }

    pub fn with_params(mut self, params: &'a [ActionParameter]) -> Self {
        self.params = params;
        self
    }

    pub fn with_locals(mut self, locals: &'a Locals) -> Self {
        self.locals = locals;
        self
    }

    pub fn on_columns_of(mut self, record: &'a EntityDefinition) -> Self {
        self.record = record;
        self.access = RecordAccess::Columns;
        self
    }
}

pub fn compile_expression(expr: &Expression, scope: &ExprScope) -> Result<CompiledExpr, ErrorKind> {
    let mut out = CompiledExpr::default();
    let sql = lower(expr, scope, &mut out)?;
    out.sql = sql;
    Ok(out)
}

/// Read a payload key with the cast its type needs.
pub fn payload_read(key: &str, ty: FieldType) -> String {
    let key = quote_literal(key);
    match ty {
        FieldType::Json => format!("p_payload->{}", key),
        FieldType::Text | FieldType::Enum => format!("(p_payload->>{})", key),
        FieldType::TextList => format!(
            "ARRAY(SELECT jsonb_array_elements_text(COALESCE(p_payload->{}, '[]'::jsonb)))",
            key
        ),
        FieldType::Ref => format!("(p_payload->>{})::UUID", key),
        other => format!("(p_payload->>{})::{}", key, other.sql_type()),
    }
}

fn lower(expr: &Expression, scope: &ExprScope, out: &mut CompiledExpr) -> Result<String, ErrorKind> {
    match expr {
        Expression::Field {
            field,
            source: FieldSource::Record,
        } => lower_record_field(field, scope, out),
        Expression::Field {
            field,
            source: FieldSource::Input,
        } => lower_input_field(field, scope, out),
        Expression::Literal { value } => Ok(render_literal(value)),
        Expression::List { items } => {
            let rendered = lower_all(items, scope, out)?;
            Ok(format!("ARRAY[{}]", rendered.join(", ")))
        }
        Expression::Binary { op, left, right } => lower_binary(op, left, right, scope, out),
        Expression::Not { operand } => Ok(format!("NOT {}", lower_operand(operand, scope, out)?)),
        Expression::And { operands } => lower_logical(operands, " AND ", "TRUE", scope, out),
        Expression::Or { operands } => lower_logical(operands, " OR ", "FALSE", scope, out),
        Expression::Call { function, args } => lower_call(function, args, scope, out),
        Expression::Param { name } => {
            let param = scope
                .params
                .iter()
                .find(|p| &p.name == name)
                .ok_or_else(|| ErrorKind::UnknownParameter(name.clone()))?;
            Ok(payload_read(&param.name, param.param_type))
        }
        Expression::Payload { key, as_type } => Ok(match as_type {
            Some(ty) => payload_read(key, *ty),
            None => payload_read(key, FieldType::Json),
        }),
        Expression::Local { name, path } => lower_local(name, path, scope),
        Expression::Context { value } => Ok(match value {
            ContextValue::User => "p_caller_id".into(),
            ContextValue::Tenant => "p_tenant_id".into(),
            ContextValue::Now => "NOW()".into(),
            ContextValue::Pk => "v_pk".into(),
        }),
    }
}

fn lower_all(
    exprs: &[Expression],
    scope: &ExprScope,
    out: &mut CompiledExpr,
) -> Result<Vec<String>, ErrorKind> {
    exprs.iter().map(|e| lower(e, scope, out)).collect()
}

/// Lower a sub-expression, parenthesized when it is itself compound.
fn lower_operand(
    expr: &Expression,
    scope: &ExprScope,
    out: &mut CompiledExpr,
) -> Result<String, ErrorKind> {
    let sql = lower(expr, scope, out)?;
    Ok(match expr {
        Expression::Binary { .. }
        | Expression::Not { .. }
        | Expression::And { .. }
        | Expression::Or { .. } => format!("({})", sql),
        _ => sql,
    })
}

fn lower_record_field(
    field: &str,
    scope: &ExprScope,
    out: &mut CompiledExpr,
) -> Result<String, ErrorKind> {
    let column = match scope.record.field(field) {
        Some(def) => scope.config.column(def),
        None if scope
            .config
            .system_columns(scope.record)
            .iter()
            .any(|c| c == field) =>
        {
            field.to_string()
        }
        None => {
            return Err(ErrorKind::UnknownField {
                entity: scope.record.name.clone(),
                field: field.to_string(),
            });
        }
    };
    out.fields.insert(field.to_string());
    Ok(match scope.access {
        RecordAccess::Variable(var) => format!("{}.{}", var, column),
        RecordAccess::Columns => column,
    })
}

fn lower_input_field(
    field: &str,
    scope: &ExprScope,
    out: &mut CompiledExpr,
) -> Result<String, ErrorKind> {
    let def = scope
        .owner
        .field(field)
        .ok_or_else(|| ErrorKind::UnknownField {
            entity: scope.owner.name.clone(),
            field: field.to_string(),
        })?;
    out.fields.insert(field.to_string());
    out.inputs.insert(field.to_string());
    Ok(match def.field_type {
        FieldType::Ref => scope.config.fk_variable(def),
        ty => payload_read(&def.name, ty),
    })
}

fn lower_binary(
    op: &str,
    left: &Expression,
    right: &Expression,
    scope: &ExprScope,
    out: &mut CompiledExpr,
) -> Result<String, ErrorKind> {
    let op = op.to_ascii_lowercase();
    let l = lower_operand(left, scope, out)?;

    match op.as_str() {
        "in" | "not_in" => {
            let negated = op == "not_in";
            let members = match right {
                Expression::Literal {
                    value: serde_json::Value::Array(items),
                } => Some(items.iter().map(render_literal).collect::<Vec<_>>()),
                Expression::List { items } => Some(lower_all(items, scope, out)?),
                _ => None,
            };
            Ok(match members {
                Some(members) if members.is_empty() => {
                    if negated { "TRUE".into() } else { "FALSE".into() }
                }
                Some(members) => format!(
                    "{} {}IN ({})",
                    l,
                    if negated { "NOT " } else { "" },
                    members.join(", ")
                ),
                None => {
                    let r = lower(right, scope, out)?;
                    if negated {
                        format!("NOT ({} = ANY({}))", l, r)
                    } else {
                        format!("{} = ANY({})", l, r)
                    }
                }
            })
        }
        "is" | "is_not" => {
            let not = if op == "is_not" { "NOT " } else { "" };
            Ok(match right {
                Expression::Literal { value } if value.is_null() || value.is_boolean() => {
                    format!("{} IS {}{}", l, not, render_literal(value))
                }
                _ => {
                    let r = lower_operand(right, scope, out)?;
                    let distinct = if op == "is_not" { "" } else { "NOT " };
                    format!("{} IS {}DISTINCT FROM {}", l, distinct, r)
                }
            })
        }
        _ => {
            let sql_op = match op.as_str() {
                "=" | "==" | "eq" => "=",
                "!=" | "<>" | "ne" => "<>",
                "<" | "lt" => "<",
                "<=" | "lte" => "<=",
                ">" | "gt" => ">",
                ">=" | "gte" => ">=",
                "like" => "LIKE",
                "ilike" => "ILIKE",
                "+" => "+",
                "-" => "-",
                "*" => "*",
                "/" => "/",
                "||" => "||",
                _ => return Err(ErrorKind::UnsupportedOperator(op)),
            };
            let r = lower_operand(right, scope, out)?;
            Ok(format!("{} {} {}", l, sql_op, r))
        }
    }
}

fn lower_logical(
    operands: &[Expression],
    joiner: &str,
    empty: &str,
    scope: &ExprScope,
    out: &mut CompiledExpr,
) -> Result<String, ErrorKind> {
    if operands.is_empty() {
        return Ok(empty.into());
    }
    let parts = operands
        .iter()
        .map(|e| lower_operand(e, scope, out))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(joiner))
}

fn lower_call(
    function: &str,
    args: &[Expression],
    scope: &ExprScope,
    out: &mut CompiledExpr,
) -> Result<String, ErrorKind> {
    let name = function.to_ascii_lowercase();
    let sql_name = FUNCTIONS
        .iter()
        .find(|(f, _)| *f == name)
        .map(|(_, sql)| *sql)
        .ok_or_else(|| ErrorKind::UnsupportedOperator(format!("{}()", function)))?;

    let rendered = lower_all(args, scope, out)?;
    match name.as_str() {
        "current_date" if rendered.is_empty() => Ok(sql_name.into()),
        "now" if rendered.is_empty() => Ok("NOW()".into()),
        "current_date" | "now" => Err(ErrorKind::UnsupportedOperator(format!(
            "{}() with arguments",
            name
        ))),
        "position" if rendered.len() == 2 => {
            Ok(format!("POSITION({} IN {})", rendered[0], rendered[1]))
        }
        "position" => Err(ErrorKind::UnsupportedOperator(format!(
            "position() with {} arguments",
            rendered.len()
        ))),
        _ => Ok(format!("{}({})", sql_name, rendered.join(", "))),
    }
}

fn lower_local(name: &str, path: &[String], scope: &ExprScope) -> Result<String, ErrorKind> {
    let local = scope
        .locals
        .get(name)
        .ok_or_else(|| ErrorKind::UnknownLocal(name.to_string()))?;

    if path.is_empty() {
        return Ok(local.var.clone());
    }

    match &local.kind {
        LocalKind::Scalar => Err(ErrorKind::InvalidStep(format!(
            "local '{}' is a scalar and has no field '{}'",
            name,
            path.join(".")
        ))),
        LocalKind::Json if path.len() == 1 => {
            Ok(format!("({}->>{})", local.var, quote_literal(&path[0])))
        }
        LocalKind::Json => Ok(format!(
            "({}#>>{})",
            local.var,
            quote_literal(&format!("{{{}}}", path.join(",")))
        )),
        LocalKind::Row { entity, columns } => {
            let [field] = path else {
                return Err(ErrorKind::InvalidStep(format!(
                    "row local '{}' only has top-level fields",
                    name
                )));
            };
            let column = columns.get(field).ok_or_else(|| ErrorKind::UnknownField {
                entity: entity.clone(),
                field: field.clone(),
            })?;
            Ok(format!("{}.{}", local.var, column))
        }
        LocalKind::Result => {
            let [field] = path else {
                return Err(ErrorKind::InvalidStep(format!(
                    "result local '{}' only has top-level fields",
                    name
                )));
            };
            if !RESULT_FIELDS.contains(&field.as_str()) {
                return Err(ErrorKind::InvalidStep(format!(
                    "result local '{}' has no field '{}'",
                    name, field
                )));
            }
            Ok(format!("({}).{}", local.var, field))
        }
    }
}
