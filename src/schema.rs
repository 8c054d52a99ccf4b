// TableSchema and friends. Every field here is an owned type (String, Vec,
// Option, BTreeMap) so `#[derive(Clone)]` already gives the deep copy the
// MVCC manager is required to hand back from `GetTableInfo`/`CreateTable`.

use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::value::ValueType;

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: ValueType,
    pub nullable: bool,
    pub primary: bool,
    pub auto_increment: bool,
    pub foreign_key: Option<ForeignKeyRef>,
    /// Non-empty iff this is a generated column; names of the columns it is
    /// computed from.
    pub generated_depends: Vec<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: ValueType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary: false,
            auto_increment: false,
            foreign_key: None,
            generated_depends: Vec::new(),
        }
    }

    pub fn is_generated(&self) -> bool {
        !self.generated_depends.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub namespace: String,
    pub columns: Vec<ColumnInfo>,
    pub attributes: Option<BTreeMap<String, String>>,
    pub temporary: bool,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            columns,
            attributes: None,
            temporary: false,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// The generated-column validator's interface — a host may supply its own,
/// more elaborate implementation; `DefaultSchemaValidator` below is the
/// conservative one shipped with this crate.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema: &TableSchema) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSchemaValidator;

impl SchemaValidator for DefaultSchemaValidator {
    fn validate(&self, schema: &TableSchema) -> Result<()> {
        for (idx, column) in schema.columns.iter().enumerate() {
            if !column.is_generated() {
                continue;
            }
            let earlier: Vec<&str> = schema.columns[..idx].iter().map(|c| c.name.as_str()).collect();
            for dep in &column.generated_depends {
                if dep == &column.name {
                    return Err(EngineError::GeneratedColumnValidation {
                        table: schema.name.clone(),
                        column: column.name.clone(),
                        reason: "generated column cannot depend on itself".to_string(),
                    });
                }
                if !earlier.contains(&dep.as_str()) {
                    return Err(EngineError::GeneratedColumnValidation {
                        table: schema.name.clone(),
                        column: column.name.clone(),
                        reason: format!("depends on unknown or forward-declared column '{dep}'"),
                    });
                }
            }
        }
        Ok(())
    }
}

pub fn validate_generated_columns(schema: &TableSchema) -> Result<()> {
    DefaultSchemaValidator.validate(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> ColumnInfo {
        ColumnInfo::new(name, ValueType::Int64)
    }

    #[test]
    fn generated_column_with_valid_earlier_dependency() {
        let mut price = col("price");
        let mut total = col("total");
        total.generated_depends = vec!["price".to_string()];
        let schema = TableSchema::new("orders", vec![{ price.primary = true; price }, total]);
        assert!(validate_generated_columns(&schema).is_ok());
    }

    #[test]
    fn generated_column_forward_reference_fails() {
        let mut first = col("total");
        first.generated_depends = vec!["price".to_string()];
        let schema = TableSchema::new("orders", vec![first, col("price")]);
        assert!(matches!(
            validate_generated_columns(&schema),
            Err(EngineError::GeneratedColumnValidation { .. })
        ));
    }

    #[test]
    fn generated_column_self_reference_fails() {
        let mut total = col("total");
        total.generated_depends = vec!["total".to_string()];
        let schema = TableSchema::new("orders", vec![total]);
        assert!(matches!(
            validate_generated_columns(&schema),
            Err(EngineError::GeneratedColumnValidation { .. })
        ));
    }
}
