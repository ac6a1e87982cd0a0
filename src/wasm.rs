//! WASM entry points for browser use.

use wasm_bindgen::prelude::*;

use crate::codegen;
use crate::config::GeneratorConfig;
use crate::error::CompilerError;
use crate::expand::{PatternExpander, PatternLibrary};
use crate::parse::parse_project;
use crate::parse::types::Step;
use crate::ir::types::Artifact;
use crate::run::compile_source;
use crate::schema::{SchemaRegistry, SchemaService};

/// Full pipeline: parse → expand → compile → codegen.
/// `config_json` may be empty for the default generator config.
/// Returns a JSON object with either `files` (success) or `errors` (failure).
#[wasm_bindgen]
pub fn compile_project_json(project: &str, config_json: &str) -> JsValue {
    let result = compile_project_inner(project, config_json);
    serde_wasm_bindgen::to_value(&result).unwrap_or(JsValue::NULL)
}

fn compile_project_inner(project: &str, config_json: &str) -> CompileResult {
    let (library, config) = match setup(config_json) {
        Ok(setup) => setup,
        Err(e) => return CompileResult::Errors(vec![ErrorDto::from(e)]),
    };

    let report = compile_source(project, &library, &config);
    if !report.is_success() {
        return CompileResult::Errors(report.errors.into_iter().map(ErrorDto::from).collect());
    }

    match codegen::codegen(&report, &config) {
        Ok(output) => CompileResult::Success(
            output
                .files
                .into_iter()
                .map(|f| FileDto {
                    path: f.path,
                    content: f.content,
                })
                .collect(),
        ),
        Err(e) => CompileResult::Errors(vec![ErrorDto::from(e)]),
    }
}

/// Expand one built-in pattern against an entity of `project`, for previews.
/// Returns a JSON object with either `steps` and `artifacts` or `errors`.
#[wasm_bindgen]
pub fn expand_pattern_json(project: &str, entity: &str, pattern: &str, pattern_config: &str) -> JsValue {
    let result = expand_pattern_inner(project, entity, pattern, pattern_config);
    serde_wasm_bindgen::to_value(&result).unwrap_or(JsValue::NULL)
}

fn expand_pattern_inner(project: &str, entity: &str, pattern: &str, pattern_config: &str) -> ExpandResult {
    let errors = |errors: Vec<CompilerError>| {
        ExpandResult::Errors(errors.into_iter().map(ErrorDto::from).collect())
    };

    let (library, config) = match setup("") {
        Ok(setup) => setup,
        Err(e) => return errors(vec![e]),
    };
    let project = match parse_project(project) {
        Ok(project) => project,
        Err(e) => return errors(e),
    };
    let registry = match SchemaRegistry::from_project(&project) {
        Ok(registry) => registry,
        Err(e) => return errors(e),
    };
    let target = match registry.lookup(entity) {
        Ok(target) => target,
        Err(kind) => return errors(vec![CompilerError::expand(kind)]),
    };
    let pattern_config = if pattern_config.trim().is_empty() {
        serde_json::Value::Null
    } else {
        match serde_json::from_str(pattern_config) {
            Ok(value) => value,
            Err(e) => {
                return errors(vec![CompilerError::parse(
                    crate::error::ErrorKind::InvalidDocument(format!(
                        "failed to parse pattern config JSON: {}",
                        e
                    )),
                )]);
            }
        }
    };

    let expander = PatternExpander::new(&library, &registry, &config);
    match expander.expand(target, pattern, &pattern_config) {
        Ok(expansion) => ExpandResult::Success {
            steps: expansion.steps,
            artifacts: expansion.artifacts,
        },
        Err(kind) => errors(vec![
            CompilerError::expand(kind).with_entity(&target.name),
        ]),
    }
}

fn setup(config_json: &str) -> Result<(PatternLibrary, GeneratorConfig), CompilerError> {
    let config = if config_json.trim().is_empty() {
        GeneratorConfig::default()
    } else {
        GeneratorConfig::from_json(config_json)?
    };
    Ok((PatternLibrary::builtin()?, config))
}

// ---------------------------------------------------------------------------
// DTOs for serialization to JS
// ---------------------------------------------------------------------------

#[derive(serde::Serialize, serde::Deserialize)]
struct ErrorDto {
    code: String,
    phase: String,
    message: String,
    entity: Option<String>,
    action: Option<String>,
    step: Option<String>,
}

impl From<CompilerError> for ErrorDto {
    fn from(e: CompilerError) -> Self {
        ErrorDto {
            code: e.code().to_string(),
            phase: e.phase.to_string(),
            message: e.kind.to_string(),
            entity: e.context.entity,
            action: e.context.action,
            step: e.context.step,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct FileDto {
    path: String,
    content: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "status")]
enum CompileResult {
    #[serde(rename = "success")]
    Success(Vec<FileDto>),
    #[serde(rename = "errors")]
    Errors(Vec<ErrorDto>),
}

#[derive(serde::Serialize)]
#[serde(tag = "status")]
enum ExpandResult {
    #[serde(rename = "success")]
    Success {
        steps: Vec<Step>,
        artifacts: Vec<Artifact>,
    },
    #[serde(rename = "errors")]
    Errors(Vec<ErrorDto>),
}
