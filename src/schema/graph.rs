//! petgraph views over the schema: entity references and action invocations.

use std::collections::BTreeMap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{CompilerError, ErrorKind};
use crate::parse::types::{EntityDefinition, FieldType, Step};

/// Directed graph with an edge from each entity to every entity it references.
pub struct EntityGraph {
    pub graph: DiGraph<String, ()>,
    pub node_indices: BTreeMap<String, NodeIndex>,
}

impl EntityGraph {
    pub fn build<'a>(entities: impl IntoIterator<Item = &'a EntityDefinition>) -> Self {
        let entities: Vec<&EntityDefinition> = entities.into_iter().collect();
        let mut graph = DiGraph::new();
        let mut node_indices = BTreeMap::new();

        let mut names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        for name in names {
            let idx = graph.add_node(name.to_string());
            node_indices.insert(name.to_string(), idx);
        }

        for entity in &entities {
            let Some(&from) = node_indices.get(&entity.name) else {
                continue;
            };
            for field in &entity.fields {
                if field.field_type != FieldType::Ref {
                    continue;
                }
                if let Some(&to) = field.references.as_ref().and_then(|t| node_indices.get(t)) {
                    graph.update_edge(from, to, ());
                }
            }
            // Dependents reference us even when they are declared elsewhere.
            for rule in &entity.delete_policy.dependencies {
                if let Some(&dependent) = node_indices.get(&rule.entity) {
                    graph.update_edge(dependent, from, ());
                }
            }
        }

        EntityGraph {
            graph,
            node_indices,
        }
    }

    /// Entity names with referenced entities before the entities that
    /// reference them. Reference cycles are allowed; members of a cycle are
    /// emitted together in name order.
    pub fn emission_order(&self) -> Vec<String> {
        // tarjan_scc yields components in reverse topological order, which
        // is exactly "targets first".
        let mut order = Vec::with_capacity(self.graph.node_count());
        for component in tarjan_scc(&self.graph) {
            let mut names: Vec<String> = component
                .into_iter()
                .map(|idx| self.graph[idx].clone())
                .collect();
            names.sort();
            order.extend(names);
        }
        order
    }
}

/// Report every action of `entity` that can reach itself through `invoke`
/// steps naming sibling actions. `actions` pairs each action name with its
/// fully expanded steps.
pub fn invoke_cycles(entity: &EntityDefinition, actions: &[(&str, &[Step])]) -> Vec<CompilerError> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut node_indices = BTreeMap::new();
    for (name, _) in actions {
        let idx = graph.add_node(name.to_string());
        node_indices.insert(name.to_string(), idx);
    }

    for (name, steps) in actions {
        let from = node_indices[*name];
        let mut targets = Vec::new();
        collect_invoked(steps, &mut targets);
        for target in targets {
            if let Some(&to) = node_indices.get(target) {
                graph.update_edge(from, to, ());
            }
        }
    }

    let mut errors = Vec::new();
    for component in tarjan_scc(&graph) {
        let cyclic = component.len() > 1
            || component
                .first()
                .is_some_and(|&idx| graph.contains_edge(idx, idx));
        if !cyclic {
            continue;
        }

        let mut members: Vec<&str> = component.iter().map(|&idx| graph[idx].as_str()).collect();
        members.sort_unstable();
        let cycle = members.join(" -> ");
        for member in &members {
            errors.push(
                CompilerError::compile(ErrorKind::RecursiveInvoke {
                    action: member.to_string(),
                    cycle: cycle.clone(),
                })
                .with_entity(&entity.name)
                .with_action(*member),
            );
        }
    }
    errors
}

fn collect_invoked<'a>(steps: &'a [Step], out: &mut Vec<&'a str>) {
    for step in steps {
        match step {
            Step::Invoke { function, .. } => out.push(function.as_str()),
            Step::If {
                then, otherwise, ..
            } => {
                collect_invoked(then, out);
                collect_invoked(otherwise, out);
            }
            Step::Iterate { steps, .. } => collect_invoked(steps, out),
            Step::Validate { .. }
            | Step::Insert { .. }
            | Step::Update { .. }
            | Step::Delete { .. }
            | Step::Notify { .. }
            | Step::RefreshProjection { .. } => {}
        }
    }
}
