//! Compile context threaded through the step compilers of one action.

use std::collections::{BTreeMap, BTreeSet};

use crate::compile::expression::{CompiledExpr, ExprScope, compile_expression};
use crate::config::GeneratorConfig;
use crate::error::{CompilerError, ErrorKind};
use crate::ir::types::Declaration;
use crate::parse::types::{
    ActionDefinition, ActionKind, DeleteMode, EntityDefinition, Expression, FieldType,
};
use crate::schema::SchemaService;

/// Variables every core function declares; locals never take these names.
const RESERVED_VARS: &[&str] = &[
    "v_result",
    "v_pk",
    "v_current",
    "v_prior",
    "v_conflict",
    "v_before",
    "v_after",
    "v_changed_fields",
    "v_metadata",
    "v_blocked",
    "v_identifier_writes",
    "v_deleted",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalKind {
    Scalar,
    Json,
    /// A table row; `columns` maps field names to storage columns.
    Row {
        entity: String,
        columns: BTreeMap<String, String>,
    },
    /// The uniform result of another action.
    Result,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    pub var: String,
    pub sql_type: String,
    pub kind: LocalKind,
}

/// Locals visible at the current point of compilation.
#[derive(Debug, Clone, Default)]
pub struct Locals {
    visible: BTreeMap<String, Local>,
}

impl Locals {
    pub const fn new() -> Self {
        Self {
            visible: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Local> {
        self.visible.get(name)
    }

    pub fn bind(&mut self, name: &str, local: Local) {
        self.visible.insert(name.to_string(), local);
    }
}

pub struct CompileContext<'a> {
    pub entity: &'a EntityDefinition,
    pub action: &'a ActionDefinition,
    pub kind: ActionKind,
    pub schema: &'a dyn SchemaService,
    pub config: &'a GeneratorConfig,
    /// Kinds of the sibling actions an `invoke` may target.
    pub siblings: &'a BTreeMap<String, ActionKind>,
    /// Set once a top-level step deletes the owning record.
    pub owner_deleted: Option<DeleteMode>,
    /// Set when a nested step may delete the owning record; the generated
    /// code tracks it in `v_deleted`. `Hard` wins over `Soft`.
    pub conditional_delete: Option<DeleteMode>,
    locals: Locals,
    declarations: BTreeMap<String, Declaration>,
    payload_refs: BTreeSet<String>,
    path: Vec<String>,
}

impl<'a> CompileContext<'a> {
    pub fn new(
        entity: &'a EntityDefinition,
        action: &'a ActionDefinition,
        kind: ActionKind,
        schema: &'a dyn SchemaService,
        config: &'a GeneratorConfig,
        siblings: &'a BTreeMap<String, ActionKind>,
    ) -> Self {
        Self {
            entity,
            action,
            kind,
            schema,
            config,
            siblings,
            owner_deleted: None,
            conditional_delete: None,
            locals: Locals::new(),
            declarations: BTreeMap::new(),
            payload_refs: BTreeSet::new(),
            path: Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------------------

    /// Compile against the owning entity's current record.
    pub fn expr(&mut self, expr: &Expression) -> Result<CompiledExpr, CompilerError> {
        let scope = ExprScope::new(self.entity, self.config)
            .with_params(&self.action.parameters)
            .with_locals(&self.locals);
        let compiled = compile_expression(expr, &scope).map_err(|k| self.error(k))?;
        self.note_inputs(&compiled);
        Ok(compiled)
    }

    /// Compile inside a statement on `target`'s table: bare fields are its columns.
    pub fn expr_on(
        &mut self,
        expr: &Expression,
        target: &EntityDefinition,
    ) -> Result<CompiledExpr, CompilerError> {
        let scope = ExprScope::new(self.entity, self.config)
            .with_params(&self.action.parameters)
            .with_locals(&self.locals)
            .on_columns_of(target);
        let compiled = compile_expression(expr, &scope).map_err(|k| self.error(k))?;
        self.note_inputs(&compiled);
        Ok(compiled)
    }

    fn note_inputs(&mut self, compiled: &CompiledExpr) {
        for name in &compiled.inputs {
            self.require_payload_ref(name);
        }
    }

    /// Record that a reference field is read from the payload, so the
    /// resolve stage looks its external id up.
    pub fn require_payload_ref(&mut self, field: &str) {
        if let Some(def) = self.entity.field(field) {
            if def.field_type == FieldType::Ref {
                self.payload_refs.insert(def.name.clone());
            }
        }
    }

    pub fn payload_refs(&self) -> &BTreeSet<String> {
        &self.payload_refs
    }

    // -------------------------------------------------------------------------
    // Entities
    // -------------------------------------------------------------------------

    /// `None` or the owner's own name means the owning entity.
    pub fn target_entity(&self, name: Option<&str>) -> Result<&'a EntityDefinition, CompilerError> {
        match name {
            None => Ok(self.entity),
            Some(name) if name == self.entity.name => Ok(self.entity),
            Some(name) => self.schema.lookup(name).map_err(|k| self.error(k)),
        }
    }

    pub fn is_owner(&self, entity: &EntityDefinition) -> bool {
        std::ptr::eq(entity, self.entity) || entity.name == self.entity.name
    }

    // -------------------------------------------------------------------------
    // Locals and declarations
    // -------------------------------------------------------------------------

    pub fn locals(&self) -> &Locals {
        &self.locals
    }

    /// Declare a helper variable; repeated declarations of the same name
    /// are merged.
    pub fn declare(&mut self, decl: Declaration) {
        self.declarations.entry(decl.name.clone()).or_insert(decl);
    }

    /// Bind a user-visible local and declare its variable.
    pub fn bind_local(
        &mut self,
        name: &str,
        sql_type: &str,
        kind: LocalKind,
    ) -> Result<Declaration, CompilerError> {
        let var = self.local_var(name);
        if let Some(existing) = self.declarations.get(&var) {
            if !existing.sql_type.eq_ignore_ascii_case(sql_type) {
                return Err(self.error(ErrorKind::InvalidStep(format!(
                    "local '{}' is bound as both {} and {}",
                    name, existing.sql_type, sql_type
                ))));
            }
        }
        let decl = Declaration::new(&var, sql_type);
        self.declare(decl.clone());
        self.locals.bind(
            name,
            Local {
                var,
                sql_type: sql_type.to_string(),
                kind,
            },
        );
        Ok(decl)
    }

    /// Run `f` in a nested block; locals it binds are dropped afterwards.
    pub fn scoped<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, CompilerError>,
    ) -> Result<T, CompilerError> {
        let saved = self.locals.clone();
        let result = f(self);
        self.locals = saved;
        result
    }

    fn local_var(&self, name: &str) -> String {
        let var = format!("v_{}", name);
        let prefix = format!("v_{}", self.config.naming.fk_prefix);
        if RESERVED_VARS.contains(&var.as_str()) || var.starts_with(&prefix) {
            format!("v_local_{}", name)
        } else {
            var
        }
    }

    /// Every helper and local declaration, in name order.
    pub fn declarations(&self) -> Vec<Declaration> {
        self.declarations.values().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Step paths and errors
    // -------------------------------------------------------------------------

    pub fn enter(&mut self, segment: String) {
        self.path.push(segment);
    }

    pub fn leave(&mut self) {
        self.path.pop();
    }

    /// Whether the current step sits inside an `if` or `iterate` body.
    pub fn is_nested(&self) -> bool {
        self.path.len() > 1
    }

    pub fn step_path(&self) -> String {
        self.path.join(".")
    }

    /// Wrap an error kind with entity, action and step context.
    pub fn error(&self, kind: ErrorKind) -> CompilerError {
        let err = CompilerError::compile(kind)
            .with_entity(&self.entity.name)
            .with_action(&self.action.name);
        if self.path.is_empty() {
            err
        } else {
            err.with_step(self.step_path())
        }
    }
}
