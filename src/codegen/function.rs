//! `CREATE OR REPLACE FUNCTION` rendering for compiled functions.

use crate::codegen::writer::CodeWriter;
use crate::compile::sql::quote_literal;
use crate::ir::types::CompiledFunction;

pub fn render_function(f: &CompiledFunction) -> String {
    let mut w = CodeWriter::new();

    if f.params.is_empty() {
        w.line(&format!("CREATE OR REPLACE FUNCTION {}()", f.qualified_name()));
    } else {
        w.line(&format!("CREATE OR REPLACE FUNCTION {}(", f.qualified_name()));
        w.indent();
        let last = f.params.len() - 1;
        for (i, param) in f.params.iter().enumerate() {
            let default = param
                .default
                .as_ref()
                .map(|d| format!(" DEFAULT {}", d))
                .unwrap_or_default();
            let comma = if i < last { "," } else { "" };
            w.line(&format!("{} {}{}{}", param.name, param.sql_type, default, comma));
        }
        w.dedent();
        w.line(")");
    }
    w.line(&format!("RETURNS {}", f.returns));
    w.line("LANGUAGE plpgsql");
    w.line("AS $$");

    if !f.declarations.is_empty() {
        w.block_open("DECLARE");
        for decl in &f.declarations {
            match &decl.default {
                Some(default) => w.line(&format!("{} {} := {};", decl.name, decl.sql_type, default)),
                None => w.line(&format!("{} {};", decl.name, decl.sql_type)),
            }
        }
        w.dedent();
    }

    w.block_open("BEGIN");
    w.lines(&f.body);
    w.block_close("END;");
    w.line("$$;");

    if let Some(description) = &f.metadata.description {
        w.blank();
        w.line(&format!(
            "COMMENT ON FUNCTION {} IS {};",
            f.signature(),
            quote_literal(description)
        ));
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{Declaration, FunctionMetadata, FunctionParam, FunctionRole};
    use crate::parse::types::ActionKind;

    fn function(description: Option<&str>) -> CompiledFunction {
        let params = vec![
            FunctionParam::new("p_tenant_id", "UUID"),
            FunctionParam {
                name: "p_payload".into(),
                sql_type: "JSONB".into(),
                default: Some("'{}'::jsonb".into()),
            },
        ];
        CompiledFunction {
            schema: "app".into(),
            name: "ping".into(),
            params: params.clone(),
            returns: "app.mutation_result".into(),
            declarations: vec![Declaration::new("v_n", "INTEGER").with_default("0")],
            body: "RETURN NULL;\n".into(),
            role: FunctionRole::Wrapper,
            metadata: FunctionMetadata {
                function: "app.ping".into(),
                role: FunctionRole::Wrapper,
                entity: "app.Ping".into(),
                action: "ping".into(),
                action_kind: ActionKind::Custom,
                params,
                returns: "app.mutation_result".into(),
                description: description.map(str::to_string),
                delegates_to: None,
            },
        }
    }

    #[test]
    fn renders_signature_declarations_and_body() {
        assert_eq!(
            render_function(&function(None)),
            "\
CREATE OR REPLACE FUNCTION app.ping(
    p_tenant_id UUID,
    p_payload JSONB DEFAULT '{}'::jsonb
)
RETURNS app.mutation_result
LANGUAGE plpgsql
AS $$
DECLARE
    v_n INTEGER := 0;
BEGIN
    RETURN NULL;
END;
$$;
"
        );
    }

    #[test]
    fn description_becomes_a_comment() {
        let sql = render_function(&function(Some("Checks it's alive")));
        assert!(sql.ends_with(
            "COMMENT ON FUNCTION app.ping(UUID, JSONB) IS 'Checks it''s alive';\n"
        ));
    }
}
