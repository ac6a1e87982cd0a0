//! Unified compiler error type used across all phases.
//!
//! Every error aborts only the action it was raised for; the run driver
//! collects them and reports the whole list at the end.

use crate::ir::validate::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Parse,
    Expand,
    Validate,
    Compile,
    Codegen,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Parse => write!(f, "Parse"),
            Phase::Expand => write!(f, "Expand"),
            Phase::Validate => write!(f, "Validate"),
            Phase::Compile => write!(f, "Compile"),
            Phase::Codegen => write!(f, "Codegen"),
        }
    }
}

/// What went wrong, independent of where.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    #[error("unsupported operator or function '{0}'")]
    UnsupportedOperator(String),

    #[error("unknown pattern '{0}'")]
    UnknownPattern(String),

    #[error("invalid config for pattern '{pattern}': parameter '{parameter}' {reason}")]
    InvalidPatternConfig {
        pattern: String,
        parameter: String,
        reason: String,
    },

    #[error("pattern '{pattern}' expanded into a reference to pattern '{nested}'")]
    NestedPattern { pattern: String, nested: String },

    #[error("schema lookup failed for entity '{0}'")]
    SchemaLookup(String),

    #[error("unknown action parameter '{0}'")]
    UnknownParameter(String),

    #[error("unknown local '{0}'")]
    UnknownLocal(String),

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("rendering pattern '{pattern}' failed: {message}")]
    TemplateRender { pattern: String, message: String },

    #[error("action '{action}' is part of an invoke cycle ({cycle})")]
    RecursiveInvoke { action: String, cycle: String },

    #[error("{message}")]
    Validation { code: &'static str, message: String },
}

impl ErrorKind {
    /// Stable code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidDocument(_) => "P001",
            ErrorKind::SchemaLookup(_) => "S001",
            ErrorKind::UnknownPattern(_) => "X001",
            ErrorKind::InvalidPatternConfig { .. } => "X002",
            ErrorKind::NestedPattern { .. } => "X003",
            ErrorKind::TemplateRender { .. } => "X004",
            ErrorKind::UnknownField { .. } => "C001",
            ErrorKind::UnsupportedOperator(_) => "C002",
            ErrorKind::UnknownParameter(_) => "C003",
            ErrorKind::UnknownLocal(_) => "C004",
            ErrorKind::InvalidStep(_) => "C005",
            ErrorKind::RecursiveInvoke { .. } => "C006",
            ErrorKind::Validation { code, .. } => *code,
        }
    }
}

/// Where an error was raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub entity: Option<String>,
    pub action: Option<String>,
    pub step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerError {
    pub kind: ErrorKind,
    pub phase: Phase,
    pub context: ErrorContext,
}

impl std::fmt::Display for CompilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.phase, self.code(), self.kind)?;

        let mut parts = Vec::new();
        if let Some(entity) = &self.context.entity {
            parts.push(format!("entity '{}'", entity));
        }
        if let Some(action) = &self.context.action {
            parts.push(format!("action '{}'", action));
        }
        if let Some(step) = &self.context.step {
            parts.push(format!("step '{}'", step));
        }
        if !parts.is_empty() {
            write!(f, " ({})", parts.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for CompilerError {}

impl From<ValidationError> for CompilerError {
    fn from(e: ValidationError) -> Self {
        CompilerError {
            kind: ErrorKind::Validation {
                code: e.code,
                message: e.message,
            },
            phase: Phase::Validate,
            context: ErrorContext {
                step: e.step_path,
                ..ErrorContext::default()
            },
        }
    }
}

impl CompilerError {
    fn new(kind: ErrorKind, phase: Phase) -> Self {
        CompilerError {
            kind,
            phase,
            context: ErrorContext::default(),
        }
    }

    pub fn parse(kind: ErrorKind) -> Self {
        Self::new(kind, Phase::Parse)
    }

    pub fn expand(kind: ErrorKind) -> Self {
        Self::new(kind, Phase::Expand)
    }

    pub fn compile(kind: ErrorKind) -> Self {
        Self::new(kind, Phase::Compile)
    }

    pub fn codegen(kind: ErrorKind) -> Self {
        Self::new(kind, Phase::Codegen)
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.context.entity = Some(entity.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.context.action = Some(action.into());
        self
    }

    /// Attach a step path unless a more specific one is already set.
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        if self.context.step.is_none() {
            self.context.step = Some(step.into());
        }
        self
    }
}
