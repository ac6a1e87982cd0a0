//! Codegen pass: compiled actions → SQL files plus a metadata manifest.
//!
//! Public API: `codegen(&report, &config) -> CodegenOutput`

pub mod function;
pub mod writer;

use std::collections::BTreeMap;

use tracing::warn;

use crate::compile::response::result_type_sql;
use crate::config::GeneratorConfig;
use crate::error::{CompilerError, ErrorKind};
use crate::ir::types::{Artifact, ArtifactKind, FunctionMetadata};
use crate::parse::types::to_snake_case;
use crate::run::RunReport;

pub use function::render_function;

/// A generated file with its path and content.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// The complete output of the codegen pass.
#[derive(Debug, Clone)]
pub struct CodegenOutput {
    pub files: Vec<GeneratedFile>,
}

impl CodegenOutput {
    pub fn file(&self, path: &str) -> Option<&GeneratedFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Render every compiled action of a run. Failed actions are simply absent.
pub fn codegen(report: &RunReport, config: &GeneratorConfig) -> Result<CodegenOutput, CompilerError> {
    let mut files = vec![GeneratedFile {
        path: "000_mutation_result.sql".into(),
        content: result_type_sql(config),
    }];

    // Shared artifacts (identifier functions, counters) come from several
    // actions of one entity; the first rendering wins.
    let mut artifacts: BTreeMap<String, BTreeMap<(ArtifactKind, String), &Artifact>> =
        BTreeMap::new();
    let mut manifest: Vec<&FunctionMetadata> = Vec::new();

    for action in &report.actions {
        let content = action
            .functions()
            .iter()
            .map(|f| render_function(f))
            .collect::<Vec<_>>()
            .join("\n");
        files.push(GeneratedFile {
            path: format!("functions/{}.sql", action.core.qualified_name()),
            content,
        });
        manifest.push(&action.core.metadata);
        manifest.push(&action.wrapper.metadata);

        for artifact in &action.artifacts {
            let by_entity = artifacts.entry(artifact_file(&artifact.entity)).or_default();
            let key = (artifact.kind, artifact.name.clone());
            match by_entity.get(&key) {
                Some(existing) if existing.sql != artifact.sql => warn!(
                    artifact = %artifact.name,
                    entity = %artifact.entity,
                    "conflicting definitions for artifact; keeping the first"
                ),
                Some(_) => {}
                None => {
                    by_entity.insert(key, artifact);
                }
            }
        }
    }

    for (path, by_entity) in artifacts {
        let content = by_entity
            .values()
            .map(|a| a.sql.trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n\n");
        files.push(GeneratedFile {
            path,
            content: format!("{}\n", content),
        });
    }

    let metadata = serde_json::to_string_pretty(&manifest).map_err(|e| {
        CompilerError::codegen(ErrorKind::InvalidDocument(format!(
            "failed to serialize function metadata: {}",
            e
        )))
    })?;
    files.push(GeneratedFile {
        path: "metadata.json".into(),
        content: format!("{}\n", metadata),
    });

    Ok(CodegenOutput { files })
}

/// `crm.OrderLine` → `artifacts/crm.order_line.sql`
fn artifact_file(entity: &str) -> String {
    match entity.split_once('.') {
        Some((schema, name)) => format!("artifacts/{}.{}.sql", schema, to_snake_case(name)),
        None => format!("artifacts/{}.sql", to_snake_case(entity)),
    }
}
