//! Parse phase: YAML/JSON documents → Rust types.

pub mod expr;
pub mod types;

pub use expr::parse_expression;
pub use types::*;

use crate::error::{CompilerError, ErrorKind};

/// Deserialize a project document. JSON is a subset of YAML, so both go
/// through the YAML reader unless the text is unambiguously JSON.
pub fn parse_project(text: &str) -> Result<Project, Vec<CompilerError>> {
    let project = if looks_like_json(text) {
        serde_json::from_str::<Project>(text).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str::<Project>(text).map_err(|e| e.to_string())
    };

    let project = project.map_err(|e| {
        vec![CompilerError::parse(ErrorKind::InvalidDocument(format!(
            "failed to parse project document: {}",
            e
        )))]
    })?;

    let errors: Vec<CompilerError> = project
        .entities
        .iter()
        .flat_map(check_action_shapes)
        .collect();
    if errors.is_empty() {
        Ok(project)
    } else {
        Err(errors)
    }
}

/// Deserialize a single entity document.
pub fn parse_entity(text: &str) -> Result<EntityDefinition, Vec<CompilerError>> {
    let entity = serde_yaml::from_str::<EntityDefinition>(text).map_err(|e| {
        vec![CompilerError::parse(ErrorKind::InvalidDocument(format!(
            "failed to parse entity document: {}",
            e
        )))]
    })?;

    let errors = check_action_shapes(&entity);
    if errors.is_empty() {
        Ok(entity)
    } else {
        Err(errors)
    }
}

fn looks_like_json(text: &str) -> bool {
    text.trim_start().starts_with('{')
}

/// An action either lists steps or names a pattern, never both.
fn check_action_shapes(entity: &EntityDefinition) -> Vec<CompilerError> {
    let mut errors = Vec::new();
    for action in &entity.actions {
        let message = match (&action.pattern, action.steps.is_empty()) {
            (Some(_), false) => "declares both 'steps' and 'pattern'",
            (None, true) => "declares neither 'steps' nor 'pattern'",
            _ => continue,
        };
        errors.push(
            CompilerError::parse(ErrorKind::InvalidDocument(format!("action {}", message)))
                .with_entity(&entity.name)
                .with_action(&action.name),
        );
    }
    errors
}
