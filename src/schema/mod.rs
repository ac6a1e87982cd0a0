//! Schema service: entity lookup for the expression and step compilers.

pub mod graph;

use std::collections::BTreeMap;

pub use graph::{EntityGraph, invoke_cycles};

use crate::error::{CompilerError, ErrorKind};
use crate::parse::types::{EntityDefinition, FieldDefinition, FieldType, Project};

/// Answers "what does entity X look like". Implemented in memory by
/// [`SchemaRegistry`]; embedders may back it with a live catalog.
pub trait SchemaService {
    fn entity(&self, name: &str) -> Option<&EntityDefinition>;

    fn lookup(&self, name: &str) -> Result<&EntityDefinition, ErrorKind> {
        self.entity(name)
            .ok_or_else(|| ErrorKind::SchemaLookup(name.to_string()))
    }

    fn fields(&self, name: &str) -> Result<&[FieldDefinition], ErrorKind> {
        self.lookup(name).map(|e| e.fields.as_slice())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntityDefinition>,
}

impl SchemaService for SchemaRegistry {
    fn entity(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.get(name)
    }
}

impl SchemaRegistry {
    /// Register every entity of a project and check that references resolve.
    pub fn from_project(project: &Project) -> Result<Self, Vec<CompilerError>> {
        let mut registry = SchemaRegistry::default();
        let mut errors = Vec::new();

        for entity in &project.entities {
            if registry.entities.contains_key(&entity.name) {
                errors.push(
                    CompilerError::parse(ErrorKind::InvalidDocument(format!(
                        "entity '{}' is declared more than once",
                        entity.name
                    )))
                    .with_entity(&entity.name),
                );
                continue;
            }
            registry.entities.insert(entity.name.clone(), entity.clone());
        }

        errors.extend(registry.check_references());
        if errors.is_empty() {
            Ok(registry)
        } else {
            Err(errors)
        }
    }

    pub fn insert(&mut self, entity: EntityDefinition) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDefinition> {
        self.entities.values()
    }

    fn check_references(&self) -> Vec<CompilerError> {
        let mut errors = Vec::new();
        for entity in self.entities.values() {
            for field in &entity.fields {
                if field.field_type != FieldType::Ref {
                    continue;
                }
                let kind = match &field.references {
                    None => ErrorKind::InvalidDocument(format!(
                        "reference field '{}' does not name its target entity",
                        field.name
                    )),
                    Some(target) if !self.entities.contains_key(target) => {
                        ErrorKind::SchemaLookup(target.clone())
                    }
                    Some(_) => continue,
                };
                errors.push(CompilerError::parse(kind).with_entity(&entity.name));
            }
            for rule in &entity.delete_policy.dependencies {
                if !self.entities.contains_key(&rule.entity) {
                    errors.push(
                        CompilerError::parse(ErrorKind::SchemaLookup(rule.entity.clone()))
                            .with_entity(&entity.name),
                    );
                }
            }
        }
        errors
    }
}
