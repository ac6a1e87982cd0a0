//! Generator configuration: target schema names, runtime collaborators, and
//! the column naming conventions shared by every generated function.

use serde::{Deserialize, Serialize};

use crate::error::{CompilerError, ErrorKind};
use crate::parse::types::{EntityDefinition, FieldDefinition, FieldType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Schema that holds the public wrapper functions and the result type.
    pub api_schema: String,
    pub result_type: String,
    /// `refresh(entity TEXT, key INTEGER)`.
    pub refresh_function: String,
    /// `emit(event TEXT, entity TEXT, key INTEGER, payload JSONB)`.
    pub notify_function: String,
    /// Private SQLSTATE raised to leave the staged body early.
    pub short_circuit_sqlstate: String,
    pub hierarchy_max_depth: u32,
    pub naming: NamingConventions,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_schema: "app".into(),
            result_type: "app.mutation_result".into(),
            refresh_function: "app.refresh_projection".into(),
            notify_function: "app.emit_event".into(),
            short_circuit_sqlstate: "MR001".into(),
            hierarchy_max_depth: 32,
            naming: NamingConventions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConventions {
    pub table_prefix: String,
    pub pk_prefix: String,
    pub fk_prefix: String,
    pub external_id: String,
    pub identifier: String,
    pub identifier_seq: String,
    pub tenant: String,
    pub created_at: String,
    pub created_by: String,
    pub updated_at: String,
    pub updated_by: String,
    pub deleted_at: String,
    pub deleted_by: String,
}

impl Default for NamingConventions {
    fn default() -> Self {
        Self {
            table_prefix: "tb_".into(),
            pk_prefix: "pk_".into(),
            fk_prefix: "fk_".into(),
            external_id: "id".into(),
            identifier: "identifier".into(),
            identifier_seq: "identifier_seq".into(),
            tenant: "tenant_id".into(),
            created_at: "created_at".into(),
            created_by: "created_by".into(),
            updated_at: "updated_at".into(),
            updated_by: "updated_by".into(),
            deleted_at: "deleted_at".into(),
            deleted_by: "deleted_by".into(),
        }
    }
}

impl GeneratorConfig {
    pub fn from_yaml(text: &str) -> Result<Self, CompilerError> {
        serde_yaml::from_str(text).map_err(|e| {
            CompilerError::parse(ErrorKind::InvalidDocument(format!(
                "failed to parse generator config YAML: {}",
                e
            )))
        })
    }

    pub fn from_json(text: &str) -> Result<Self, CompilerError> {
        serde_json::from_str(text).map_err(|e| {
            CompilerError::parse(ErrorKind::InvalidDocument(format!(
                "failed to parse generator config JSON: {}",
                e
            )))
        })
    }

    /// `crm.tb_contact`
    pub fn table(&self, entity: &EntityDefinition) -> String {
        format!(
            "{}.{}{}",
            entity.schema,
            self.naming.table_prefix,
            entity.snake_name()
        )
    }

    /// `pk_contact`
    pub fn pk_column(&self, entity: &EntityDefinition) -> String {
        format!("{}{}", self.naming.pk_prefix, entity.snake_name())
    }

    /// Storage column of a declared field; reference fields hold internal keys.
    pub fn column(&self, field: &FieldDefinition) -> String {
        match field.field_type {
            FieldType::Ref => format!("{}{}", self.naming.fk_prefix, field.name),
            _ => field.name.clone(),
        }
    }

    /// Payload key a field is supplied under; references travel as external ids.
    pub fn payload_key(&self, field: &FieldDefinition) -> String {
        match field.field_type {
            FieldType::Ref => format!("{}_{}", field.name, self.naming.external_id),
            _ => field.name.clone(),
        }
    }

    /// Local variable holding a resolved reference from the payload.
    pub fn fk_variable(&self, field: &FieldDefinition) -> String {
        format!("v_{}{}", self.naming.fk_prefix, field.name)
    }

    /// Columns that exist on every entity table besides the declared fields.
    pub fn system_columns(&self, entity: &EntityDefinition) -> Vec<String> {
        let n = &self.naming;
        let mut columns = vec![n.external_id.clone()];
        if entity.identifier.is_some() {
            columns.push(n.identifier.clone());
        }
        columns.push(n.created_at.clone());
        columns.push(n.updated_at.clone());
        columns
    }

    /// Row filter keeping queries inside the caller's tenant and away from
    /// soft-deleted rows. Empty when neither applies.
    pub fn scope_filter(&self, entity: &EntityDefinition, alias: Option<&str>) -> Vec<String> {
        let prefix = alias.map(|a| format!("{}.", a)).unwrap_or_default();
        let mut filters = Vec::new();
        if entity.tenant_scoped {
            filters.push(format!("{}{} = p_tenant_id", prefix, self.naming.tenant));
        }
        if entity.soft_deletes() {
            filters.push(format!("{}{} IS NULL", prefix, self.naming.deleted_at));
        }
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config = GeneratorConfig::from_yaml("api_schema: api\nnaming:\n  table_prefix: t_\n")
            .unwrap();
        assert_eq!(config.api_schema, "api");
        assert_eq!(config.result_type, "app.mutation_result");
        assert_eq!(config.naming.table_prefix, "t_");
        assert_eq!(config.naming.pk_prefix, "pk_");
    }

    #[test]
    fn json_config_is_accepted() {
        let config = GeneratorConfig::from_json(r#"{"hierarchy_max_depth": 8}"#).unwrap();
        assert_eq!(config.hierarchy_max_depth, 8);
        assert_eq!(config.short_circuit_sqlstate, "MR001");
    }

    #[test]
    fn malformed_config_is_a_parse_error() {
        let err = GeneratorConfig::from_yaml("hierarchy_max_depth: [").unwrap_err();
        assert_eq!(err.code(), "P001");
    }
}
