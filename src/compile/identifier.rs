//! Identifier recalculator: the per-entity function that derives the
//! human-readable identifier, and the post-stage that calls it.
//!
//! Format tokens: `{field}`, `{ref.column}`, `{seq}` and `{seq:N}` (zero
//! padded to N digits). Hierarchical identifiers prefix the parent's
//! identifier and cascade to every descendant within the same call.

use nom::{
    IResult,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{char, digit1},
    combinator::{map, opt},
    multi::many0,
    branch::alt,
    sequence::{delimited, preceded, tuple},
};

use crate::codegen::writer::CodeWriter;
use crate::compile::context::CompileContext;
use crate::compile::sql::{emit_where, quote_literal, text_array};
use crate::config::GeneratorConfig;
use crate::error::{CompilerError, ErrorKind};
use crate::ir::types::{Artifact, ArtifactKind, Declaration};
use crate::parse::types::{
    ActionKind, EntityDefinition, FieldType, HierarchyConfig, IdentifierConfig,
};
use crate::schema::SchemaService;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    Field(String),
    Ref { field: String, column: String },
    Seq { width: Option<usize> },
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

/// `{name}`, `{name.column}` or `{name:width}`.
fn placeholder(input: &str) -> IResult<&str, (&str, Option<&str>, Option<&str>)> {
    delimited(
        tag("{"),
        tuple((
            ident,
            opt(preceded(char('.'), ident)),
            opt(preceded(char(':'), digit1)),
        )),
        tag("}"),
    )(input)
}

enum Piece<'a> {
    Text(&'a str),
    Placeholder((&'a str, Option<&'a str>, Option<&'a str>)),
}

fn piece(input: &str) -> IResult<&str, Piece<'_>> {
    alt((
        map(placeholder, Piece::Placeholder),
        map(is_not("{"), Piece::Text),
    ))(input)
}

fn parse_format(format: &str) -> Result<Vec<Token>, ErrorKind> {
    let (rest, pieces) = many0(piece)(format).map_err(|e| {
        ErrorKind::InvalidDocument(format!("identifier format '{}': {}", format, e))
    })?;
    if !rest.is_empty() {
        return Err(ErrorKind::InvalidDocument(format!(
            "identifier format '{}' has an unterminated token at '{}'",
            format, rest
        )));
    }

    pieces
        .into_iter()
        .map(|p| match p {
            Piece::Text(text) => Ok(Token::Text(text.to_string())),
            Piece::Placeholder(("seq", None, width)) => Ok(Token::Seq {
                width: width.and_then(|w| w.parse().ok()),
            }),
            Piece::Placeholder((field, Some(column), None)) => Ok(Token::Ref {
                field: field.to_string(),
                column: column.to_string(),
            }),
            Piece::Placeholder((field, None, None)) => Ok(Token::Field(field.to_string())),
            Piece::Placeholder((name, _, Some(_))) => Err(ErrorKind::InvalidDocument(format!(
                "identifier token '{}' does not take a width",
                name
            ))),
        })
        .collect()
}

// =============================================================================
// ARTIFACTS
// =============================================================================

/// `crm.recalculate_identifier_contact`
pub fn function_name(entity: &EntityDefinition) -> String {
    format!("{}.recalculate_identifier_{}", entity.schema, entity.snake_name())
}

fn counter_table(entity: &EntityDefinition, config: &GeneratorConfig) -> String {
    format!("{}_identifier_counter", config.table(entity))
}

/// The recalculation function plus, when the format numbers records, the
/// counter table it allocates from.
pub fn identifier_artifacts(
    entity: &EntityDefinition,
    schema: &dyn SchemaService,
    config: &GeneratorConfig,
) -> Result<Vec<Artifact>, ErrorKind> {
    let Some(identifier) = &entity.identifier else {
        return Ok(Vec::new());
    };
    if identifier.format.is_none() && identifier.hierarchy.is_none() {
        return Err(ErrorKind::InvalidDocument(format!(
            "identifier of '{}' needs a format or a hierarchy",
            entity.name
        )));
    }

    let tokens = match &identifier.format {
        Some(format) => parse_format(format)?,
        None => Vec::new(),
    };
    let uses_seq = tokens.iter().any(|t| matches!(t, Token::Seq { .. }));

    let mut artifacts = Vec::new();
    if uses_seq {
        let table = counter_table(entity, config);
        let mut w = CodeWriter::new();
        w.line(&format!("CREATE TABLE IF NOT EXISTS {} (", table));
        w.indent();
        w.line("scope_key TEXT PRIMARY KEY,");
        w.line("last_value INTEGER NOT NULL DEFAULT 0");
        w.dedent();
        w.line(");");
        artifacts.push(Artifact {
            kind: ArtifactKind::Table,
            name: table,
            entity: entity.qualified_name(),
            sql: w.finish(),
        });
    }

    artifacts.push(Artifact {
        kind: ArtifactKind::Function,
        name: function_name(entity),
        entity: entity.qualified_name(),
        sql: render_function(entity, identifier, &tokens, schema, config)?,
    });
    Ok(artifacts)
}

fn render_function(
    entity: &EntityDefinition,
    identifier: &IdentifierConfig,
    tokens: &[Token],
    schema: &dyn SchemaService,
    config: &GeneratorConfig,
) -> Result<String, ErrorKind> {
    let n = &config.naming;
    let table = config.table(entity);
    let pk = config.pk_column(entity);
    let name = function_name(entity);
    let uses_seq = tokens.iter().any(|t| matches!(t, Token::Seq { .. }));
    let parent_fk = match &identifier.hierarchy {
        Some(h) => Some(parent_column(entity, h, config)?),
        None => None,
    };

    let mut w = CodeWriter::new();
    w.line(&format!("CREATE OR REPLACE FUNCTION {}(", name));
    w.indent();
    w.line("p_pk INTEGER,");
    w.line("p_tenant_id UUID,");
    w.line("p_depth INTEGER DEFAULT 0");
    w.dedent();
    w.line(") RETURNS INTEGER");
    w.line("LANGUAGE plpgsql");
    w.line("AS $$");
    w.block_open("DECLARE");
    w.line(&format!("v_row {}%ROWTYPE;", table));
    if uses_seq {
        w.line("v_seq INTEGER;");
    }
    if parent_fk.is_some() {
        w.line("v_parent TEXT;");
        w.line("v_child RECORD;");
    }
    w.line("v_candidate TEXT;");
    w.line("v_writes INTEGER := 0;");
    w.dedent();
    w.block_open("BEGIN");

    w.if_open(&format!("p_depth > {}", config.hierarchy_max_depth));
    w.line(&format!(
        "RAISE EXCEPTION 'identifier hierarchy of % exceeds % levels', {}, {};",
        quote_literal(&entity.qualified_name()),
        config.hierarchy_max_depth
    ));
    w.if_close();
    w.blank();

    w.line("SELECT * INTO v_row");
    w.line(&format!("FROM {}", table));
    let mut conditions = vec![format!("{} = p_pk", pk)];
    if entity.tenant_scoped {
        conditions.push(format!("{} = p_tenant_id", n.tenant));
    }
    emit_where(&mut w, &conditions, ";");
    w.if_open("NOT FOUND");
    w.line("RETURN 0;");
    w.if_close();
    w.blank();

    if uses_seq {
        let mut scope_parts = vec!["p_tenant_id::TEXT".to_string()];
        for field in &identifier.sequence_scope {
            let def = entity.field(field).ok_or_else(|| ErrorKind::UnknownField {
                entity: entity.name.clone(),
                field: field.clone(),
            })?;
            scope_parts.push(format!("v_row.{}::TEXT", config.column(def)));
        }
        let counter = counter_table(entity, config);

        w.line(&format!("v_seq := v_row.{};", n.identifier_seq));
        w.if_open("v_seq IS NULL");
        w.line(&format!("INSERT INTO {} (scope_key, last_value)", counter));
        w.line(&format!(
            "VALUES (concat_ws('|', {}), 1)",
            scope_parts.join(", ")
        ));
        w.line("ON CONFLICT (scope_key) DO UPDATE");
        w.indent();
        w.line(&format!("SET last_value = {}.last_value + 1", counter));
        w.dedent();
        w.line("RETURNING last_value INTO v_seq;");
        w.line(&format!(
            "UPDATE {} SET {} = v_seq WHERE {} = p_pk;",
            table, n.identifier_seq, pk
        ));
        w.if_close();
        w.blank();
    }

    let segment = if tokens.is_empty() {
        match &identifier.hierarchy {
            Some(h) => normalized_name(entity, h, config)?,
            None => "NULL".into(),
        }
    } else {
        render_tokens(entity, tokens, schema, config)?
    };

    match &parent_fk {
        Some(parent) => {
            let separator = identifier
                .hierarchy
                .as_ref()
                .map(|h| h.separator.as_str())
                .unwrap_or(".");
            w.if_open(&format!("v_row.{} IS NULL", parent));
            w.line(&format!("v_candidate := {};", segment));
            w.if_else();
            w.line(&format!(
                "SELECT {} INTO v_parent FROM {} WHERE {} = v_row.{};",
                n.identifier, table, pk, parent
            ));
            // A parent without an identifier yet contributes nothing.
            w.line(&format!(
                "v_candidate := COALESCE(v_parent || {}, '') || {};",
                quote_literal(separator),
                segment
            ));
            w.if_close();
        }
        None => w.line(&format!("v_candidate := {};", segment)),
    }
    w.blank();

    w.if_open(&format!("v_candidate IS DISTINCT FROM v_row.{}", n.identifier));
    w.line(&format!(
        "UPDATE {} SET {} = v_candidate WHERE {} = p_pk;",
        table, n.identifier, pk
    ));
    w.line("v_writes := 1;");
    if let Some(parent) = &parent_fk {
        let mut child_filter = vec![format!("{} = p_pk", parent)];
        child_filter.extend(config.scope_filter(entity, None));
        w.block_open(&format!(
            "FOR v_child IN SELECT {} FROM {} WHERE {} ORDER BY {} LOOP",
            pk,
            table,
            child_filter.join(" AND "),
            pk
        ));
        w.line(&format!(
            "v_writes := v_writes + {}(v_child.{}, p_tenant_id, p_depth + 1);",
            name, pk
        ));
        w.block_close("END LOOP;");
    }
    w.if_close();
    w.blank();
    w.line("RETURN v_writes;");
    w.block_close("END;");
    w.line("$$;");
    Ok(w.finish())
}

fn parent_column(
    entity: &EntityDefinition,
    hierarchy: &HierarchyConfig,
    config: &GeneratorConfig,
) -> Result<String, ErrorKind> {
    let field = entity
        .field(&hierarchy.parent_field)
        .ok_or_else(|| ErrorKind::UnknownField {
            entity: entity.name.clone(),
            field: hierarchy.parent_field.clone(),
        })?;
    if field.field_type != FieldType::Ref || field.references.as_deref() != Some(&entity.name) {
        return Err(ErrorKind::InvalidDocument(format!(
            "hierarchy parent '{}' must reference '{}' itself",
            field.name, entity.name
        )));
    }
    Ok(config.column(field))
}

/// `Home Office` → `home_office`
fn normalized_name(
    entity: &EntityDefinition,
    hierarchy: &HierarchyConfig,
    config: &GeneratorConfig,
) -> Result<String, ErrorKind> {
    let field = entity
        .field(&hierarchy.name_field)
        .ok_or_else(|| ErrorKind::UnknownField {
            entity: entity.name.clone(),
            field: hierarchy.name_field.clone(),
        })?;
    Ok(format!(
        "lower(regexp_replace(trim(COALESCE(v_row.{}::TEXT, '')), '[^a-zA-Z0-9]+', '_', 'g'))",
        config.column(field)
    ))
}

fn render_tokens(
    entity: &EntityDefinition,
    tokens: &[Token],
    schema: &dyn SchemaService,
    config: &GeneratorConfig,
) -> Result<String, ErrorKind> {
    let unknown = |field: &str| ErrorKind::UnknownField {
        entity: entity.name.clone(),
        field: field.to_string(),
    };

    let mut parts = Vec::with_capacity(tokens.len());
    for token in tokens {
        let part = match token {
            Token::Text(text) => quote_literal(text),
            Token::Seq { width: Some(width) } => format!("lpad(v_seq::TEXT, {}, '0')", width),
            Token::Seq { width: None } => "v_seq::TEXT".into(),
            Token::Field(field) => {
                let column = match entity.field(field) {
                    Some(def) => config.column(def),
                    None if config.system_columns(entity).iter().any(|c| c == field) => {
                        field.clone()
                    }
                    None => return Err(unknown(field)),
                };
                format!("COALESCE(v_row.{}::TEXT, '')", column)
            }
            Token::Ref { field, column } => {
                let def = entity.field(field).ok_or_else(|| unknown(field))?;
                let target_name = match (&def.field_type, &def.references) {
                    (FieldType::Ref, Some(target)) => target,
                    _ => {
                        return Err(ErrorKind::InvalidDocument(format!(
                            "identifier token '{}.{}' needs a reference field",
                            field, column
                        )));
                    }
                };
                let target = schema.lookup(target_name)?;
                let target_column = match target.field(column) {
                    Some(def) => config.column(def),
                    None if config.system_columns(target).iter().any(|c| c == column) => {
                        column.clone()
                    }
                    None => {
                        return Err(ErrorKind::UnknownField {
                            entity: target.name.clone(),
                            field: column.clone(),
                        });
                    }
                };
                format!(
                    "COALESCE((SELECT r.{}::TEXT FROM {} r WHERE r.{} = v_row.{}), '')",
                    target_column,
                    config.table(target),
                    config.pk_column(target),
                    config.column(def)
                )
            }
        };
        parts.push(part);
    }
    Ok(parts.join(" || "))
}

// =============================================================================
// RECALCULATE STAGE
// =============================================================================

/// Whether the post-stage runs for this action.
pub fn recalculates(ctx: &CompileContext) -> bool {
    ctx.entity.identifier.is_some()
        && ctx.action.recalc_identifier != Some(false)
        && ctx.owner_deleted.is_none()
}

/// Call the recalculation function and record its write count.
pub fn emit_recalculate(w: &mut CodeWriter, ctx: &mut CompileContext) -> Result<(), CompilerError> {
    let entity = ctx.entity;
    let Some(identifier) = &entity.identifier else {
        return Ok(());
    };
    let config = ctx.config;
    let n = &config.naming;
    ctx.declare(Declaration::new("v_identifier_writes", "INTEGER"));

    let conditional = ctx.conditional_delete.is_some();
    if conditional {
        w.if_open("NOT v_deleted");
    }
    let guarded = ctx.kind != ActionKind::Create && !identifier.recalculate_on.is_empty();
    if guarded {
        w.if_open(&format!(
            "v_changed_fields && {}",
            text_array(&identifier.recalculate_on)
        ));
    }
    w.line(&format!(
        "v_identifier_writes := {}(v_pk, p_tenant_id, 0);",
        function_name(entity)
    ));
    w.line("v_metadata := v_metadata || jsonb_build_object('identifier_writes', v_identifier_writes);");
    let field = quote_literal(&n.identifier);
    w.if_open(&format!(
        "v_identifier_writes > 0 AND NOT ({} = ANY(v_changed_fields))",
        field
    ));
    w.line(&format!(
        "v_changed_fields := array_append(v_changed_fields, {});",
        field
    ));
    w.if_close();
    if guarded {
        w.if_close();
    }
    if conditional {
        w.if_close();
    }
    Ok(())
}
