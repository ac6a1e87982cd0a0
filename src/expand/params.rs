//! Pattern parameter checking: defaults, required keys, declared types.

use serde_json::{Map, Value};

use crate::error::ErrorKind;
use crate::expand::library::{ParameterType, PatternDefinition};
use crate::parse::types::EntityDefinition;
use crate::schema::SchemaService;

/// Check a caller's `config` against the pattern's declared parameters and
/// return the complete parameter map. Optional parameters without a value or
/// default are present as `null`, so templates can test them with `#if`.
pub fn resolve_config(
    pattern: &PatternDefinition,
    config: &Value,
    entity: &EntityDefinition,
    schema: &dyn SchemaService,
) -> Result<Map<String, Value>, ErrorKind> {
    let invalid = |parameter: &str, reason: String| ErrorKind::InvalidPatternConfig {
        pattern: pattern.name.clone(),
        parameter: parameter.to_string(),
        reason,
    };

    let supplied = match config {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        _ => return Err(invalid("config", "must be a mapping".into())),
    };

    if let Some(unknown) = supplied
        .keys()
        .find(|key| !pattern.parameters.iter().any(|p| &p.name == *key))
    {
        return Err(invalid(unknown, "is not declared by the pattern".into()));
    }

    let mut resolved = Map::new();
    for param in &pattern.parameters {
        let value = match supplied.get(&param.name) {
            Some(value) if !value.is_null() => value.clone(),
            _ => match &param.default {
                Some(default) if !default.is_null() => default.clone(),
                _ if param.required => return Err(invalid(&param.name, "is required".into())),
                _ => {
                    resolved.insert(param.name.clone(), Value::Null);
                    continue;
                }
            },
        };
        check_type(param.param_type, &value, entity, schema)
            .map_err(|reason| invalid(&param.name, reason))?;
        resolved.insert(param.name.clone(), value);
    }
    Ok(resolved)
}

fn check_type(
    expected: ParameterType,
    value: &Value,
    entity: &EntityDefinition,
    schema: &dyn SchemaService,
) -> Result<(), String> {
    let mismatch = || format!("must be of type {}", expected.as_str());
    match expected {
        ParameterType::String => value.is_string().then_some(()).ok_or_else(mismatch),
        ParameterType::Identifier => value
            .as_str()
            .filter(|s| is_identifier(s))
            .map(|_| ())
            .ok_or_else(mismatch),
        ParameterType::Integer => (value.is_i64() || value.is_u64())
            .then_some(())
            .ok_or_else(mismatch),
        ParameterType::Boolean => value.is_boolean().then_some(()).ok_or_else(mismatch),
        ParameterType::Array => value.is_array().then_some(()).ok_or_else(mismatch),
        ParameterType::Object => value.is_object().then_some(()).ok_or_else(mismatch),
        ParameterType::Field => {
            let name = value.as_str().ok_or_else(mismatch)?;
            check_field(entity, name)
        }
        ParameterType::FieldList => {
            let items = value.as_array().ok_or_else(mismatch)?;
            if items.is_empty() {
                return Err("must name at least one field".into());
            }
            for item in items {
                check_field(entity, item.as_str().ok_or_else(mismatch)?)?;
            }
            Ok(())
        }
        ParameterType::Entity => {
            let name = value.as_str().ok_or_else(mismatch)?;
            schema
                .entity(name)
                .map(|_| ())
                .ok_or_else(|| format!("names unknown entity '{}'", name))
        }
    }
}

fn check_field(entity: &EntityDefinition, name: &str) -> Result<(), String> {
    entity
        .field(name)
        .map(|_| ())
        .ok_or_else(|| format!("names no field of '{}': '{}'", entity.name, name))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
