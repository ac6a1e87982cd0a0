//! Response builder: the one result shape every generated action returns.

use crate::codegen::writer::CodeWriter;
use crate::compile::sql::quote_literal;
use crate::config::GeneratorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Noop,
    Error,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Noop => "NOOP",
            Status::Error => "ERROR",
        }
    }
}

/// One result value. Every member except `status` and `code` is SQL text.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: Status,
    pub code: String,
    pub message: String,
    pub before: String,
    pub after: String,
    pub changed_fields: String,
    pub metadata: String,
}

impl Outcome {
    /// A short-circuit outcome: snapshot before, nothing after.
    pub fn early(status: Status, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.into(),
            message: quote_literal(message),
            before: "v_before".into(),
            after: "NULL".into(),
            changed_fields: "ARRAY[]::TEXT[]".into(),
            metadata: "'{}'::jsonb".into(),
        }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self::early(Status::Error, code, message)
    }

    pub fn noop(code: &str, message: &str) -> Self {
        Self::early(Status::Noop, code, message)
    }

    /// The final outcome of a completed action.
    pub fn success(code: &str, message: &str) -> Self {
        Self {
            status: Status::Success,
            code: code.into(),
            message: quote_literal(message),
            before: "v_before".into(),
            after: "v_after".into(),
            changed_fields: "v_changed_fields".into(),
            metadata: "v_metadata".into(),
        }
    }

    pub fn with_metadata(mut self, metadata: String) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn without_before(mut self) -> Self {
        self.before = "NULL".into();
        self
    }

    /// `ROW(...)::app.mutation_result`
    pub fn to_row(&self, config: &GeneratorConfig) -> String {
        format!(
            "ROW({}, {}, {}, {}, {}, {}, {})::{}",
            quote_literal(self.status.as_str()),
            quote_literal(&self.code),
            self.message,
            self.before,
            self.after,
            self.changed_fields,
            self.metadata,
            config.result_type
        )
    }
}

/// Assign the result and leave the staged body. Everything the body wrote
/// so far is rolled back by the handler; `v_result` survives.
pub fn emit_short_circuit(w: &mut CodeWriter, outcome: &Outcome, config: &GeneratorConfig) {
    w.line(&format!("v_result := {};", outcome.to_row(config)));
    w.line(&format!(
        "RAISE EXCEPTION USING ERRCODE = {};",
        quote_literal(&config.short_circuit_sqlstate)
    ));
}

pub fn emit_result(w: &mut CodeWriter, outcome: &Outcome, config: &GeneratorConfig) {
    w.line(&format!("v_result := {};", outcome.to_row(config)));
}

/// Shared composite type, created once per database.
pub fn result_type_sql(config: &GeneratorConfig) -> String {
    let mut w = CodeWriter::new();
    let schema = config
        .result_type
        .split_once('.')
        .map(|(schema, _)| schema)
        .unwrap_or("public");

    w.line(&format!("CREATE SCHEMA IF NOT EXISTS {};", schema));
    w.blank();
    w.line("DO $$");
    w.block_open("BEGIN");
    w.line(&format!("CREATE TYPE {} AS (", config.result_type));
    w.indent();
    w.line("status TEXT,");
    w.line("code TEXT,");
    w.line("message TEXT,");
    w.line("before JSONB,");
    w.line("after JSONB,");
    w.line("changed_fields TEXT[],");
    w.line("metadata JSONB");
    w.dedent();
    w.line(");");
    w.block_divider("EXCEPTION");
    w.line("WHEN duplicate_object THEN NULL;");
    w.block_close("END;");
    w.line("$$;");
    w.finish()
}
