//! Step-sequence validation.
//!
//! Runs on the fully expanded step list of one action before compilation,
//! catching structural mistakes with a stable code instead of emitting SQL
//! that fails at install time.

use std::collections::BTreeSet;

use crate::parse::types::Step;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
    /// Path of the offending step, e.g. `steps[2].then[0]`.
    pub step_path: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.step_path {
            Some(path) => write!(f, "[{}] {} (at {})", self.code, self.message, path),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Validate an action body against all invariants. Returns all errors found.
pub fn validate_steps(steps: &[Step]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_non_empty(steps, &mut errors);
    validate_block(steps, "steps", &BTreeSet::new(), &mut errors);

    errors
}

// ---------------------------------------------------------------------------
// Invariant: the action body is non-empty
// ---------------------------------------------------------------------------

fn validate_non_empty(steps: &[Step], errors: &mut Vec<ValidationError>) {
    if steps.is_empty() {
        errors.push(ValidationError {
            code: "E001",
            message: "Action body must contain at least one step".into(),
            step_path: None,
        });
    }
}

// ---------------------------------------------------------------------------
// Invariants: single binding per scope, forward-only local references,
// non-empty nested bodies, one iteration source
// ---------------------------------------------------------------------------

fn validate_block(
    steps: &[Step],
    label: &str,
    parent_scope: &BTreeSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    // Bindings made inside a block never leak back into the parent.
    let mut scope = parent_scope.clone();

    for (i, step) in steps.iter().enumerate() {
        let path = format!("{}[{}]", label, i);

        for expr in step.expressions() {
            for name in expr.local_refs() {
                if !scope.contains(name) {
                    errors.push(ValidationError {
                        code: "E003",
                        message: format!(
                            "{} step references local '{}' before any step binds it",
                            step.kind(),
                            name
                        ),
                        step_path: Some(path.clone()),
                    });
                }
            }
        }

        match step {
            Step::If {
                then, otherwise, ..
            } => {
                if then.is_empty() {
                    errors.push(empty_body("if", "then", &path));
                }
                validate_block(then, &format!("{}.then", path), &scope, errors);
                validate_block(otherwise, &format!("{}.else", path), &scope, errors);
            }
            Step::Iterate {
                item,
                collection,
                related,
                steps: body,
            } => {
                if collection.is_some() == related.is_some() {
                    errors.push(ValidationError {
                        code: "E005",
                        message: "iterate needs exactly one of 'collection' or 'related'".into(),
                        step_path: Some(path.clone()),
                    });
                }
                if body.is_empty() {
                    errors.push(empty_body("iterate", "steps", &path));
                }
                if scope.contains(item) {
                    errors.push(rebound(item, &path));
                }
                let mut inner = scope.clone();
                inner.insert(item.clone());
                validate_block(body, &format!("{}.steps", path), &inner, errors);
            }
            _ => {}
        }

        if let Some(name) = step.binding() {
            if !scope.insert(name.to_string()) {
                errors.push(rebound(name, &path));
            }
        }
    }
}

fn empty_body(kind: &str, part: &str, path: &str) -> ValidationError {
    ValidationError {
        code: "E004",
        message: format!("{} step has an empty '{}' body", kind, part),
        step_path: Some(path.to_string()),
    }
}

fn rebound(name: &str, path: &str) -> ValidationError {
    ValidationError {
        code: "E002",
        message: format!("local '{}' is already bound in this scope", name),
        step_path: Some(path.to_string()),
    }
}
