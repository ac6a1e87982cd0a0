//! Pattern library: named, versioned templates, loaded once per run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{CompilerError, ErrorKind};

const BUILTIN: &[(&str, &str)] = &[
    ("state_machine", include_str!("patterns/state_machine.yaml")),
    (
        "recursive_dependency",
        include_str!("patterns/recursive_dependency.yaml"),
    ),
    (
        "template_inheritance",
        include_str!("patterns/template_inheritance.yaml"),
    ),
    ("scd_type2", include_str!("patterns/scd_type2.yaml")),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<PatternParameter>,
    /// Handlebars source rendering to a `{steps, artifacts}` YAML document.
    pub template: String,
}

fn default_version() -> String {
    "1.0.0".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Identifier,
    Integer,
    Boolean,
    Array,
    Object,
    /// A field of the entity the pattern is applied to.
    Field,
    FieldList,
    /// Any entity known to the schema service.
    Entity,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Identifier => "identifier",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
            ParameterType::Field => "field",
            ParameterType::FieldList => "field_list",
            ParameterType::Entity => "entity",
        }
    }
}

/// Read-only after loading; expanders borrow it.
#[derive(Debug, Clone, Default)]
pub struct PatternLibrary {
    patterns: BTreeMap<String, BTreeMap<String, PatternDefinition>>,
}

impl PatternLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The library with every built-in pattern registered.
    pub fn builtin() -> Result<Self, CompilerError> {
        let mut library = Self::new();
        for (name, source) in BUILTIN {
            library
                .load_yaml(source)
                .map_err(|e| CompilerError::expand(e.kind).with_action(*name))?;
        }
        info!(patterns = library.len(), "loaded built-in patterns");
        Ok(library)
    }

    /// Parse and register one pattern document.
    pub fn load_yaml(&mut self, text: &str) -> Result<(), CompilerError> {
        let definition: PatternDefinition = serde_yaml::from_str(text).map_err(|e| {
            CompilerError::parse(ErrorKind::InvalidDocument(format!(
                "failed to parse pattern YAML: {}",
                e
            )))
        })?;
        self.register(definition);
        Ok(())
    }

    /// Register a definition; an existing one with the same name and
    /// version is replaced.
    pub fn register(&mut self, definition: PatternDefinition) {
        let versions = self.patterns.entry(definition.name.clone()).or_default();
        if versions.contains_key(&definition.version) {
            warn!(
                pattern = %definition.name,
                version = %definition.version,
                "replacing registered pattern"
            );
        }
        versions.insert(definition.version.clone(), definition);
    }

    /// Look up `name` (latest version) or `name@version`.
    pub fn get(&self, reference: &str) -> Result<&PatternDefinition, ErrorKind> {
        let (name, version) = match reference.split_once('@') {
            Some((name, version)) => (name, Some(version)),
            None => (reference, None),
        };
        let versions = self
            .patterns
            .get(name)
            .ok_or_else(|| ErrorKind::UnknownPattern(reference.to_string()))?;
        let found = match version {
            Some(version) => versions.get(version),
            None => versions
                .values()
                .max_by(|a, b| version_key(&a.version).cmp(&version_key(&b.version))),
        };
        found.ok_or_else(|| ErrorKind::UnknownPattern(reference.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.patterns.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// `1.10.0` sorts after `1.9.2`.
fn version_key(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}
