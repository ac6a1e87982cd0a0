//! Compiled output types.
//!
//! An action compiles to a pair of linked functions plus the auxiliary
//! artifacts (indexes, helper functions, counter tables) its steps rely on.
//! Codegen renders these to SQL files; the metadata travels to whatever
//! annotates the API without re-parsing generated code.

use serde::{Deserialize, Serialize};

use crate::parse::types::ActionKind;

// =============================================================================
// ACTIONS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledAction {
    /// Qualified entity name, e.g. `crm.Contact`.
    pub entity: String,
    pub action: String,
    pub kind: ActionKind,
    /// Runs on resolved internal keys.
    pub core: CompiledFunction,
    /// Accepts external identifiers, resolves them, delegates to `core`.
    pub wrapper: CompiledFunction,
    pub artifacts: Vec<Artifact>,
}

impl CompiledAction {
    pub fn functions(&self) -> [&CompiledFunction; 2] {
        [&self.core, &self.wrapper]
    }
}

// =============================================================================
// FUNCTIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionRole {
    Core,
    Wrapper,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionParam {
    pub name: String,
    pub sql_type: String,
    pub default: Option<String>,
}

impl FunctionParam {
    pub fn new(name: &str, sql_type: &str) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            default: None,
        }
    }
}

/// A `DECLARE` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub sql_type: String,
    pub default: Option<String>,
}

impl Declaration {
    pub fn new(name: &str, sql_type: &str) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledFunction {
    pub schema: String,
    pub name: String,
    pub params: Vec<FunctionParam>,
    pub returns: String,
    pub declarations: Vec<Declaration>,
    /// Statements between `BEGIN` and `END`, unindented.
    pub body: String,
    pub role: FunctionRole,
    pub metadata: FunctionMetadata,
}

impl CompiledFunction {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// `crm.update_contact(INTEGER, UUID, UUID, JSONB)`
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.params.iter().map(|p| p.sql_type.as_str()).collect();
        format!("{}({})", self.qualified_name(), types.join(", "))
    }
}

/// What an API annotator needs to know about a generated function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    pub function: String,
    pub role: FunctionRole,
    pub entity: String,
    pub action: String,
    pub action_kind: ActionKind,
    pub params: Vec<FunctionParam>,
    pub returns: String,
    pub description: Option<String>,
    /// For wrappers: the core function they delegate to.
    pub delegates_to: Option<String>,
}

// =============================================================================
// ARTIFACTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Table,
    Function,
    Index,
    Trigger,
}

/// Auxiliary SQL riding alongside an action. Never a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    /// Qualified owning entity; filled in by the producer.
    #[serde(default)]
    pub entity: String,
    pub sql: String,
}
