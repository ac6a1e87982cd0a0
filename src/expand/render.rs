//! Template rendering: handlebars over the pattern source, then YAML back
//! into the step and artifact types the orchestrator consumes.

use handlebars::Handlebars;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::compile::sql::quote_literal;
use crate::config::GeneratorConfig;
use crate::error::ErrorKind;
use crate::ir::types::Artifact;
use crate::parse::types::{EntityDefinition, Step};

/// Registry with the helpers every pattern may use. Output is SQL and YAML,
/// so HTML escaping is off.
pub fn registry() -> Handlebars<'static> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.register_helper("json", Box::new(json_helper));
    handlebars.register_helper("sql_list", Box::new(sql_list_helper));
    handlebars.register_helper("upper", Box::new(upper_helper));
    handlebars.register_helper("lower", Box::new(lower_helper));
    handlebars
}

/// Names, table, and column layout of an entity as templates see it.
pub fn entity_info(entity: &EntityDefinition, config: &GeneratorConfig) -> Value {
    let mut columns = Map::new();
    let mut field_types = Map::new();
    for column in config.system_columns(entity) {
        columns.insert(column.clone(), Value::String(column));
    }
    for field in &entity.fields {
        columns.insert(field.name.clone(), Value::String(config.column(field)));
        field_types.insert(
            field.name.clone(),
            Value::String(field.field_type.sql_type().to_string()),
        );
    }
    let scope: String = config
        .scope_filter(entity, None)
        .iter()
        .map(|f| format!(" AND {}", f))
        .collect();

    json!({
        "name": entity.name,
        "schema": entity.schema,
        "snake": entity.snake_name(),
        "table": config.table(entity),
        "pk": config.pk_column(entity),
        "qualified": entity.qualified_name(),
        "tenant_scoped": entity.tenant_scoped,
        "soft_deletes": entity.soft_deletes(),
        "scope": scope,
        "columns": columns,
        "field_types": field_types,
    })
}

#[derive(Deserialize)]
struct Rendered {
    #[serde(default)]
    steps: Vec<Step>,
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

/// Render `template` and parse the result. Nested pattern references are
/// rejected before the steps are typed.
pub fn render(
    handlebars: &Handlebars<'static>,
    pattern: &str,
    template: &str,
    context: &Value,
) -> Result<(Vec<Step>, Vec<Artifact>), ErrorKind> {
    let failed = |message: String| ErrorKind::TemplateRender {
        pattern: pattern.to_string(),
        message,
    };

    let text = handlebars
        .render_template(template, context)
        .map_err(|e| failed(e.to_string()))?;
    let document: Value = serde_yaml::from_str(&text)
        .map_err(|e| failed(format!("rendered YAML is invalid: {}", e)))?;

    if let Some(nested) = nested_pattern(&document) {
        return Err(ErrorKind::NestedPattern {
            pattern: pattern.to_string(),
            nested,
        });
    }

    let rendered: Rendered = match document {
        Value::Null => Rendered {
            steps: Vec::new(),
            artifacts: Vec::new(),
        },
        document => serde_json::from_value(document)
            .map_err(|e| failed(format!("rendered document is not a step list: {}", e)))?,
    };
    Ok((rendered.steps, rendered.artifacts))
}

/// First `pattern` reference found at the top of the document or in place
/// of a step, at any nesting depth.
fn nested_pattern(document: &Value) -> Option<String> {
    let Value::Object(map) = document else {
        return None;
    };
    if let Some(reference) = map.get("pattern") {
        return Some(reference_name(reference));
    }
    map.get("steps").and_then(nested_in_steps)
}

fn nested_in_steps(steps: &Value) -> Option<String> {
    for step in steps.as_array()?.iter() {
        let Value::Object(map) = step else { continue };
        if let Some(reference) = map.get("pattern") {
            return Some(reference_name(reference));
        }
        for key in ["then", "else", "steps"] {
            if let Some(found) = map.get(key).and_then(nested_in_steps) {
                return Some(found);
            }
        }
    }
    None
}

fn reference_name(reference: &Value) -> String {
    match reference {
        Value::String(name) => name.clone(),
        other => other.to_string(),
    }
}

// Helpers

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|p| p.value()).unwrap_or(&Value::Null);
    out.write(&serde_json::to_string(value).unwrap_or_default())?;
    Ok(())
}

/// `['a', 'b']` → `'a', 'b'`
fn sql_list_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let items = h
        .param(0)
        .and_then(|p| p.value().as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => quote_literal(s),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    out.write(&items)?;
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let param = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&param.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let param = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&param.to_lowercase())?;
    Ok(())
}
