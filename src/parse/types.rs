//! Rust types for entity and action specification documents.
//!
//! These are the serde targets for the YAML/JSON project documents. The same
//! `Step` and `Expression` types are produced by pattern expansion, so the
//! orchestrator never sees anything else.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// PROJECT
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
}

// =============================================================================
// ENTITIES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub description: Option<String>,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraint>,
    #[serde(default)]
    pub identifier: Option<IdentifierConfig>,
    #[serde(default)]
    pub delete_policy: DeletePolicy,
    #[serde(default)]
    pub projections: Vec<String>,
    #[serde(default = "default_true")]
    pub tenant_scoped: bool,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

fn default_schema() -> String {
    "public".into()
}

fn default_true() -> bool {
    true
}

impl EntityDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// `OrderLine` → `order_line`
    pub fn snake_name(&self) -> String {
        to_snake_case(&self.name)
    }

    /// `crm.Contact`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn soft_deletes(&self) -> bool {
        self.delete_policy.mode == DeleteMode::Soft
    }
}

pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c == '-' || c == ' ' {
            out.push('_');
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Target entity name for `ref` fields.
    #[serde(default)]
    pub references: Option<String>,
    /// Allowed values for `enum` fields.
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Uuid,
    Json,
    TextList,
    Enum,
    Ref,
}

impl FieldType {
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldType::Text | FieldType::Enum => "TEXT",
            FieldType::Integer | FieldType::Ref => "INTEGER",
            FieldType::Decimal => "NUMERIC",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Date => "DATE",
            FieldType::Timestamp => "TIMESTAMPTZ",
            FieldType::Uuid => "UUID",
            FieldType::Json => "JSONB",
            FieldType::TextList => "TEXT[]",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueConstraint {
    #[serde(default)]
    pub name: Option<String>,
    pub fields: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_true")]
    pub check_on_create: bool,
    #[serde(default)]
    pub return_conflict_object: bool,
}

impl UniqueConstraint {
    pub fn name_for(&self, entity: &EntityDefinition) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("uq_{}_{}", entity.snake_name(), self.fields.join("_")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifierConfig {
    /// Tokens: `{field}`, `{ref.column}`, `{seq}`, `{seq:N}`.
    #[serde(default)]
    pub format: Option<String>,
    /// Fields partitioning the sequence counter.
    #[serde(default)]
    pub sequence_scope: Vec<String>,
    #[serde(default)]
    pub hierarchy: Option<HierarchyConfig>,
    /// Fields whose change triggers recalculation on update; empty means always.
    #[serde(default)]
    pub recalculate_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyConfig {
    pub parent_field: String,
    pub name_field: String,
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    ".".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletePolicy {
    #[serde(default)]
    pub mode: DeleteMode,
    #[serde(default)]
    pub dependencies: Vec<DependencyRule>,
    #[serde(default)]
    pub blocked_outcome: BlockedOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    Soft,
    Hard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedOutcome {
    #[default]
    Error,
    Noop,
}

/// A dependent entity whose `field` references the owning entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRule {
    pub entity: String,
    pub field: String,
    #[serde(default = "default_true")]
    pub blocking: bool,
    #[serde(default)]
    pub cascade: CascadeMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeMode {
    #[default]
    None,
    SoftDelete,
    Nullify,
    Delete,
}

// =============================================================================
// ACTIONS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: Option<ActionKind>,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// `name` or `name@version`; exclusive with `steps`.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub partial_update: bool,
    #[serde(default)]
    pub duplicate_detection: bool,
    /// Defaults to on when the entity has an identifier config.
    #[serde(default)]
    pub recalc_identifier: Option<bool>,
    /// Defaults to on when the entity lists projections.
    #[serde(default)]
    pub refresh_projection: Option<bool>,
    #[serde(default)]
    pub success_code: Option<String>,
    #[serde(default)]
    pub success_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    Custom,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::Custom => "custom",
        }
    }

    /// Whether the action operates on an existing record.
    pub fn targets_record(self) -> bool {
        self != ActionKind::Create
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionParameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

// =============================================================================
// STEPS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Validate {
        condition: Expression,
        error: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        details: BTreeMap<String, Expression>,
    },
    If {
        condition: Expression,
        then: Vec<Step>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Step>,
    },
    Insert {
        #[serde(default)]
        entity: Option<String>,
        #[serde(default)]
        fields: BTreeMap<String, Expression>,
        #[serde(default)]
        store: Option<String>,
    },
    Update {
        #[serde(default)]
        entity: Option<String>,
        #[serde(default)]
        fields: BTreeMap<String, Expression>,
        #[serde(default)]
        partial: Option<bool>,
        #[serde(default)]
        filter: Option<Expression>,
    },
    Delete {
        #[serde(default)]
        entity: Option<String>,
        #[serde(default)]
        filter: Option<Expression>,
        #[serde(default)]
        mode: Option<DeleteMode>,
    },
    Invoke {
        function: String,
        #[serde(default)]
        args: Vec<Expression>,
        #[serde(default)]
        store: Option<String>,
        /// SQL type of the stored result for external functions.
        #[serde(default)]
        returns: Option<String>,
    },
    Notify {
        event: String,
        #[serde(default)]
        payload: Option<Expression>,
    },
    Iterate {
        item: String,
        #[serde(default)]
        collection: Option<Expression>,
        #[serde(default)]
        related: Option<RelatedRows>,
        steps: Vec<Step>,
    },
    RefreshProjection {
        #[serde(default)]
        entity: Option<String>,
        #[serde(default)]
        key: Option<Expression>,
    },
}

/// Rows of `entity` whose `field` references the current record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedRows {
    pub entity: String,
    pub field: String,
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Validate { .. } => "validate",
            Step::If { .. } => "if",
            Step::Insert { .. } => "insert",
            Step::Update { .. } => "update",
            Step::Delete { .. } => "delete",
            Step::Invoke { .. } => "invoke",
            Step::Notify { .. } => "notify",
            Step::Iterate { .. } => "iterate",
            Step::RefreshProjection { .. } => "refresh_projection",
        }
    }

    /// Expressions evaluated by this step itself, not by nested steps.
    pub fn expressions(&self) -> Vec<&Expression> {
        match self {
            Step::Validate {
                condition, details, ..
            } => std::iter::once(condition).chain(details.values()).collect(),
            Step::If { condition, .. } => vec![condition],
            Step::Insert { fields, .. } => fields.values().collect(),
            Step::Update { fields, filter, .. } => fields.values().chain(filter.iter()).collect(),
            Step::Delete { filter, .. } => filter.iter().collect(),
            Step::Invoke { args, .. } => args.iter().collect(),
            Step::Notify { payload, .. } => payload.iter().collect(),
            Step::Iterate { collection, .. } => collection.iter().collect(),
            Step::RefreshProjection { key, .. } => key.iter().collect(),
        }
    }

    /// Local name this step binds for the steps after it.
    pub fn binding(&self) -> Option<&str> {
        match self {
            Step::Insert { store, .. } | Step::Invoke { store, .. } => store.as_deref(),
            _ => None,
        }
    }
}

// =============================================================================
// EXPRESSIONS
// =============================================================================

/// Typed expression tree. Deserializes from either a tagged node or the
/// compact text syntax (`status IN ('draft') AND NOT archived`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", try_from = "ExpressionRepr")]
pub enum Expression {
    Field {
        field: String,
        #[serde(default)]
        source: FieldSource,
    },
    Literal {
        value: Value,
    },
    List {
        items: Vec<Expression>,
    },
    Binary {
        op: String,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not {
        operand: Box<Expression>,
    },
    And {
        operands: Vec<Expression>,
    },
    Or {
        operands: Vec<Expression>,
    },
    Call {
        function: String,
        #[serde(default)]
        args: Vec<Expression>,
    },
    Param {
        name: String,
    },
    Payload {
        key: String,
        #[serde(default, rename = "type")]
        as_type: Option<FieldType>,
    },
    Local {
        name: String,
        #[serde(default)]
        path: Vec<String>,
    },
    Context {
        value: ContextValue,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    #[default]
    Record,
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextValue {
    User,
    Tenant,
    Now,
    Pk,
}

impl Expression {
    pub fn field(name: impl Into<String>) -> Self {
        Expression::Field {
            field: name.into(),
            source: FieldSource::Record,
        }
    }

    pub fn input(name: impl Into<String>) -> Self {
        Expression::Field {
            field: name.into(),
            source: FieldSource::Input,
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal {
            value: value.into(),
        }
    }

    pub fn null() -> Self {
        Expression::Literal { value: Value::Null }
    }

    pub fn binary(op: &str, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op: op.into(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Expression::Local {
            name: name.into(),
            path: Vec::new(),
        }
    }

    /// Visit this node and every descendant, parents first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expression)) {
        f(self);
        match self {
            Expression::List { items: children }
            | Expression::And { operands: children }
            | Expression::Or { operands: children }
            | Expression::Call { args: children, .. } => {
                for child in children {
                    child.walk(f);
                }
            }
            Expression::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expression::Not { operand } => operand.walk(f),
            Expression::Field { .. }
            | Expression::Literal { .. }
            | Expression::Param { .. }
            | Expression::Payload { .. }
            | Expression::Local { .. }
            | Expression::Context { .. } => {}
        }
    }

    /// Names of the locals referenced anywhere in the tree.
    pub fn local_refs(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |e| {
            if let Expression::Local { name, .. } = e {
                names.push(name.as_str());
            }
        });
        names
    }
}

/// Accepted shapes for an expression in a document.
#[derive(Deserialize)]
#[serde(untagged)]
enum ExpressionRepr {
    Text(String),
    Node(ExpressionNode),
    Scalar(Value),
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ExpressionNode {
    Field {
        field: String,
        #[serde(default)]
        source: FieldSource,
    },
    Literal {
        value: Value,
    },
    List {
        items: Vec<Expression>,
    },
    Binary {
        op: String,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not {
        operand: Box<Expression>,
    },
    And {
        operands: Vec<Expression>,
    },
    Or {
        operands: Vec<Expression>,
    },
    Call {
        function: String,
        #[serde(default)]
        args: Vec<Expression>,
    },
    Param {
        name: String,
    },
    Payload {
        key: String,
        #[serde(default, rename = "type")]
        as_type: Option<FieldType>,
    },
    Local {
        name: String,
        #[serde(default)]
        path: Vec<String>,
    },
    Context {
        value: ContextValue,
    },
}

impl TryFrom<ExpressionRepr> for Expression {
    type Error = String;

    fn try_from(repr: ExpressionRepr) -> Result<Self, Self::Error> {
        match repr {
            ExpressionRepr::Text(text) => super::expr::parse_expression(&text),
            ExpressionRepr::Scalar(value) => Ok(Expression::Literal { value }),
            ExpressionRepr::Node(node) => Ok(match node {
                ExpressionNode::Field { field, source } => Expression::Field { field, source },
                ExpressionNode::Literal { value } => Expression::Literal { value },
                ExpressionNode::List { items } => Expression::List { items },
                ExpressionNode::Binary { op, left, right } => {
                    Expression::Binary { op, left, right }
                }
                ExpressionNode::Not { operand } => Expression::Not { operand },
                ExpressionNode::And { operands } => Expression::And { operands },
                ExpressionNode::Or { operands } => Expression::Or { operands },
                ExpressionNode::Call { function, args } => Expression::Call { function, args },
                ExpressionNode::Param { name } => Expression::Param { name },
                ExpressionNode::Payload { key, as_type } => Expression::Payload { key, as_type },
                ExpressionNode::Local { name, path } => Expression::Local { name, path },
                ExpressionNode::Context { value } => Expression::Context { value },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_names() {
        assert_eq!(to_snake_case("OrderLine"), "order_line");
        assert_eq!(to_snake_case("contact"), "contact");
        assert_eq!(to_snake_case("Feature2Rule"), "feature2_rule");
    }

    #[test]
    fn expression_accepts_text_and_nodes() {
        let from_text: Expression = serde_json::from_str(r#""input.email""#).unwrap();
        assert_eq!(from_text, Expression::input("email"));

        let from_node: Expression =
            serde_json::from_str(r#"{"kind": "field", "field": "email", "source": "input"}"#)
                .unwrap();
        assert_eq!(from_node, Expression::input("email"));

        let scalar: Expression = serde_json::from_str("42").unwrap();
        assert_eq!(scalar, Expression::literal(42));
    }

    #[test]
    fn step_tagged_by_type() {
        let step: Step = serde_yaml::from_str(
            "type: validate\ncondition: \"amount > 0\"\nerror: invalid_amount\n",
        )
        .unwrap();
        assert_eq!(step.kind(), "validate");
        assert_eq!(step.expressions().len(), 1);
    }

    #[test]
    fn walk_collects_nested_locals() {
        let expr = Expression::And {
            operands: vec![
                Expression::local("a"),
                Expression::Not {
                    operand: Box::new(Expression::local("b")),
                },
            ],
        };
        assert_eq!(expr.local_refs(), vec!["a", "b"]);
    }
}
