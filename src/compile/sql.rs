//! Small SQL text helpers shared by the compilers.

use serde_json::Value;

use crate::codegen::writer::CodeWriter;

/// `it's` → `'it''s'`
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// `ARRAY['a', 'b']::TEXT[]`, or an empty typed array.
pub fn text_array<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        return "ARRAY[]::TEXT[]".into();
    }
    let quoted: Vec<String> = items.iter().map(|s| quote_literal(s.as_ref())).collect();
    format!("ARRAY[{}]::TEXT[]", quoted.join(", "))
}

/// Render a JSON value as a SQL literal.
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::Bool(true) => "TRUE".into(),
        Value::Bool(false) => "FALSE".into(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_literal(s),
        Value::Array(items) if items.is_empty() => "ARRAY[]::TEXT[]".into(),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render_literal).collect();
            format!("ARRAY[{}]", rendered.join(", "))
        }
        Value::Object(_) => format!("{}::jsonb", quote_literal(&value.to_string())),
    }
}

/// A JSON value as a `jsonb` literal, for metadata maps.
pub fn jsonb_literal(value: &Value) -> String {
    format!("{}::jsonb", quote_literal(&value.to_string()))
}

/// `jsonb_build_object('k1', v1, 'k2', v2)`, or `'{}'::jsonb` when empty.
pub fn jsonb_object<K: AsRef<str>>(entries: &[(K, String)]) -> String {
    if entries.is_empty() {
        return "'{}'::jsonb".into();
    }
    let parts: Vec<String> = entries
        .iter()
        .map(|(k, v)| format!("{}, {}", quote_literal(k.as_ref()), v))
        .collect();
    format!("jsonb_build_object({})", parts.join(", "))
}

/// `WHERE a` followed by one indented `AND b` line per further condition.
pub fn emit_where(w: &mut CodeWriter, conditions: &[String], terminator: &str) {
    let Some((first, rest)) = conditions.split_first() else {
        return;
    };
    if rest.is_empty() {
        w.line(&format!("WHERE {}{}", first, terminator));
        return;
    }
    w.line(&format!("WHERE {}", first));
    w.indent();
    for (i, condition) in rest.iter().enumerate() {
        let end = if i + 1 == rest.len() { terminator } else { "" };
        w.line(&format!("AND {}{}", condition, end));
    }
    w.dedent();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literals() {
        assert_eq!(render_literal(&json!("o'brien")), "'o''brien'");
        assert_eq!(render_literal(&json!(3.5)), "3.5");
        assert_eq!(render_literal(&json!(["a", "b"])), "ARRAY['a', 'b']");
        assert_eq!(render_literal(&json!({"k": 1})), "'{\"k\":1}'::jsonb");
        assert_eq!(render_literal(&json!(null)), "NULL");
    }

    #[test]
    fn text_arrays() {
        assert_eq!(text_array::<&str>(&[]), "ARRAY[]::TEXT[]");
        assert_eq!(text_array(&["email"]), "ARRAY['email']::TEXT[]");
    }

    #[test]
    fn where_clause_layout() {
        let mut w = CodeWriter::new();
        emit_where(&mut w, &["a = 1".into(), "b IS NULL".into()], ";");
        assert_eq!(w.finish(), "WHERE a = 1\n    AND b IS NULL;\n");
    }

    #[test]
    fn jsonb_objects() {
        assert_eq!(jsonb_object::<&str>(&[]), "'{}'::jsonb");
        assert_eq!(
            jsonb_object(&[("field", "'email'".to_string())]),
            "jsonb_build_object('field', 'email')"
        );
    }
}
