//! Run driver: every action of a project, compiled with partial failure.
//!
//! An error aborts only the action it belongs to; the report carries every
//! compiled action plus the full error list.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::compile::{Orchestrator, infer_kind};
use crate::config::GeneratorConfig;
use crate::error::CompilerError;
use crate::expand::{Expansion, PatternExpander, PatternLibrary};
use crate::ir::types::CompiledAction;
use crate::parse::parse_project;
use crate::parse::types::{ActionDefinition, ActionKind, EntityDefinition, Project, Step};
use crate::schema::{EntityGraph, SchemaRegistry, SchemaService, invoke_cycles};

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// In emission order: referenced entities first, actions in declaration order.
    pub actions: Vec<CompiledAction>,
    pub errors: Vec<CompilerError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.errors.is_empty() { 0 } else { 1 }
    }

    pub fn action(&self, name: &str) -> Option<&CompiledAction> {
        self.actions.iter().find(|a| a.action == name)
    }
}

/// Parse a project document and compile it.
pub fn compile_source(text: &str, library: &PatternLibrary, config: &GeneratorConfig) -> RunReport {
    match parse_project(text) {
        Ok(project) => compile_project(&project, library, config),
        Err(errors) => RunReport {
            actions: Vec::new(),
            errors,
        },
    }
}

pub fn compile_project(project: &Project, library: &PatternLibrary, config: &GeneratorConfig) -> RunReport {
    let registry = match SchemaRegistry::from_project(project) {
        Ok(registry) => registry,
        Err(errors) => {
            warn!(errors = errors.len(), "project schema is invalid");
            return RunReport {
                actions: Vec::new(),
                errors,
            };
        }
    };

    let mut report = RunReport::default();
    let expander = PatternExpander::new(library, &registry, config);
    let orchestrator = Orchestrator::new(&registry, config);

    for name in EntityGraph::build(registry.entities()).emission_order() {
        let Some(entity) = registry.entity(&name) else {
            continue;
        };
        compile_entity(entity, &expander, &orchestrator, &mut report);
    }

    for error in &report.errors {
        debug!(code = error.code(), "{}", error);
    }
    info!(
        actions = report.actions.len(),
        errors = report.errors.len(),
        "compilation finished"
    );
    report
}

fn compile_entity(
    entity: &EntityDefinition,
    expander: &PatternExpander,
    orchestrator: &Orchestrator,
    report: &mut RunReport,
) {
    let mut expanded: Vec<(&ActionDefinition, Expansion)> = Vec::new();
    for action in &entity.actions {
        match expander.expand_action(entity, action) {
            Ok(expansion) => expanded.push((action, expansion)),
            Err(e) => report.errors.push(e),
        }
    }

    let siblings: BTreeMap<String, ActionKind> = expanded
        .iter()
        .map(|(action, expansion)| {
            (
                action.name.clone(),
                infer_kind(entity, action, &expansion.steps),
            )
        })
        .collect();

    let bodies: Vec<(&str, &[Step])> = expanded
        .iter()
        .map(|(action, expansion)| (action.name.as_str(), expansion.steps.as_slice()))
        .collect();
    let cycles = invoke_cycles(entity, &bodies);
    let cyclic: BTreeSet<String> = cycles
        .iter()
        .filter_map(|e| e.context.action.clone())
        .collect();
    report.errors.extend(cycles);

    let before = report.actions.len();
    for (action, expansion) in expanded {
        if cyclic.contains(&action.name) {
            continue;
        }
        match orchestrator.compile(entity, action, expansion, &siblings) {
            Ok(compiled) => report.actions.push(compiled),
            Err(errors) => report.errors.extend(errors),
        }
    }

    info!(
        entity = %entity.name,
        compiled = report.actions.len() - before,
        declared = entity.actions.len(),
        "compiled entity"
    );
}
