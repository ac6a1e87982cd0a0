//! Pattern expansion: an action that names a pattern is replaced by the
//! steps and artifacts its template renders to. Expansion is one level deep;
//! a template that renders another pattern reference is rejected.

pub mod library;
pub mod params;
pub mod render;

use handlebars::Handlebars;
use serde_json::{Map, Value, json};
use tracing::debug;

pub use library::{ParameterType, PatternDefinition, PatternLibrary, PatternParameter};

use crate::config::GeneratorConfig;
use crate::error::{CompilerError, ErrorKind};
use crate::ir::types::Artifact;
use crate::parse::types::{ActionDefinition, EntityDefinition, Step};
use crate::schema::SchemaService;

/// What the orchestrator compiles for one action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    pub steps: Vec<Step>,
    pub artifacts: Vec<Artifact>,
}

impl Expansion {
    /// An action written out step by step.
    pub fn explicit(steps: Vec<Step>) -> Self {
        Self {
            steps,
            artifacts: Vec::new(),
        }
    }
}

pub struct PatternExpander<'a> {
    library: &'a PatternLibrary,
    schema: &'a dyn SchemaService,
    config: &'a GeneratorConfig,
    handlebars: Handlebars<'static>,
}

impl<'a> PatternExpander<'a> {
    pub fn new(
        library: &'a PatternLibrary,
        schema: &'a dyn SchemaService,
        config: &'a GeneratorConfig,
    ) -> Self {
        Self {
            library,
            schema,
            config,
            handlebars: render::registry(),
        }
    }

    /// Steps of `action`, expanded from its pattern when it names one.
    pub fn expand_action(
        &self,
        entity: &EntityDefinition,
        action: &ActionDefinition,
    ) -> Result<Expansion, CompilerError> {
        let Some(reference) = &action.pattern else {
            return Ok(Expansion::explicit(action.steps.clone()));
        };
        let in_context = |kind: ErrorKind| {
            CompilerError::expand(kind)
                .with_entity(&entity.name)
                .with_action(&action.name)
        };
        if !action.steps.is_empty() {
            return Err(in_context(ErrorKind::InvalidDocument(format!(
                "action declares both steps and pattern '{}'",
                reference
            ))));
        }
        self.expand(entity, reference, &action.config)
            .map_err(in_context)
    }

    /// Render one pattern against `entity` with the caller's `config`.
    pub fn expand(
        &self,
        entity: &EntityDefinition,
        reference: &str,
        config: &Value,
    ) -> Result<Expansion, ErrorKind> {
        let pattern = self.library.get(reference)?;
        let resolved = params::resolve_config(pattern, config, entity, self.schema)?;

        let mut related = Map::new();
        for param in &pattern.parameters {
            if param.param_type != ParameterType::Entity {
                continue;
            }
            if let Some(name) = resolved.get(&param.name).and_then(Value::as_str) {
                let target = self.schema.lookup(name)?;
                related.insert(param.name.clone(), render::entity_info(target, self.config));
            }
        }

        let context = json!({
            "entity": render::entity_info(entity, self.config),
            "config": resolved,
            "related": related,
            "naming": self.config.naming,
        });

        let (steps, mut artifacts) =
            render::render(&self.handlebars, &pattern.name, &pattern.template, &context)?;
        for artifact in &mut artifacts {
            artifact.entity = entity.qualified_name();
        }

        debug!(
            pattern = %pattern.name,
            version = %pattern.version,
            entity = %entity.name,
            steps = steps.len(),
            artifacts = artifacts.len(),
            "expanded pattern"
        );
        Ok(Expansion { steps, artifacts })
    }
}
