//! Serialized schema document.
//!
//! The document is the stable, tool-editable description of tables and
//! references that the introspector writes and every other command reads.
//! YAML and JSON are both accepted (JSON is valid YAML). Unknown fields are
//! rejected so that an edited document never silently loses information.

use super::{Column, ColumnId, ColumnType, Direction, Reference, ReferenceId, Schema, TableId, TableSchema};
use crate::error::{Result, SliceError};
use crate::transform::TransformKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SchemaDocument {
    #[serde(default)]
    pub tables: Vec<TableDoc>,
    #[serde(default)]
    pub references: Vec<ReferenceDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TableDoc {
    /// Namespace, e.g. `public`
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDoc>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

impl TableDoc {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ColumnDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformKind>,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReferenceDoc {
    /// Constraint name
    pub name: String,
    /// Referencing table, `schema.name`
    pub table: String,
    pub columns: Vec<String>,
    /// Referenced table, `schema.name`
    pub reference_table: String,
    pub reference_columns: Vec<String>,
    #[serde(default)]
    pub deferrable: bool,
    #[serde(default = "default_directions")]
    pub directions: Vec<Direction>,
}

fn default_directions() -> Vec<Direction> {
    vec![Direction::Forward, Direction::Reverse]
}

impl SchemaDocument {
    /// Parse a YAML or JSON document
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml_ng::from_str(content).map_err(|e| SliceError::Schema(e.to_string()))
    }

    /// Load a document from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| match e {
            SliceError::Schema(msg) => SliceError::Schema(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| SliceError::Schema(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SliceError::Schema(e.to_string()))
    }

    /// Resolve names into the in-memory schema model
    pub fn resolve(&self) -> Result<Schema> {
        let mut schema = Schema::new();

        for doc in &self.tables {
            let mut table = TableSchema::new(doc.schema.clone(), doc.name.clone(), TableId(0));
            for (i, col) in doc.columns.iter().enumerate() {
                if table.get_column(&col.name).is_some() {
                    return Err(SliceError::Schema(format!(
                        "column {} defined twice in {}",
                        col.name,
                        doc.qualified_name()
                    )));
                }
                table.columns.push(Column {
                    name: col.name.clone(),
                    data_type: col.data_type.clone(),
                    col_type: ColumnType::from_sql_type(&col.data_type),
                    ordinal: ColumnId(i as u16),
                    is_primary_key: doc.primary_key.contains(&col.name),
                    is_nullable: col.nullable,
                    transform: col.transform.clone(),
                });
            }
            for pk in &doc.primary_key {
                let id = table.get_column_id(pk).ok_or_else(|| {
                    SliceError::Schema(format!(
                        "primary key column {} not found in {}",
                        pk,
                        doc.qualified_name()
                    ))
                })?;
                table.primary_key.push(id);
            }
            for kind in table.columns.iter().filter_map(|c| c.transform.as_ref()) {
                kind.validate()?;
            }
            schema.add_table(table)?;
        }

        for doc in &self.references {
            let table = lookup_table(&schema, &doc.table, &doc.name)?;
            let referenced = lookup_table(&schema, &doc.reference_table, &doc.name)?;
            let columns = resolve_columns(&schema, table, &doc.columns, &doc.name)?;
            let referenced_columns =
                resolve_columns(&schema, referenced, &doc.reference_columns, &doc.name)?;
            schema.add_reference(Reference {
                id: ReferenceId(0),
                name: doc.name.clone(),
                table,
                columns,
                referenced_table: referenced,
                referenced_columns,
                deferrable: doc.deferrable,
                directions: doc.directions.clone(),
            })?;
        }

        Ok(schema)
    }

    /// Build a document from a resolved schema
    pub fn from_schema(schema: &Schema) -> Self {
        let tables = schema
            .iter()
            .map(|t| TableDoc {
                schema: t.schema.clone(),
                name: t.name.clone(),
                columns: t
                    .columns
                    .iter()
                    .map(|c| ColumnDoc {
                        name: c.name.clone(),
                        data_type: c.data_type.clone(),
                        nullable: c.is_nullable,
                        transform: c.transform.clone(),
                    })
                    .collect(),
                primary_key: t
                    .primary_key
                    .iter()
                    .filter_map(|id| t.column(*id).map(|c| c.name.clone()))
                    .collect(),
            })
            .collect();

        let column_names = |table: TableId, ids: &[ColumnId]| -> Vec<String> {
            schema
                .table(table)
                .map(|t| {
                    ids.iter()
                        .filter_map(|id| t.column(*id).map(|c| c.name.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let references = schema
            .references
            .iter()
            .map(|r| ReferenceDoc {
                name: r.name.clone(),
                table: schema.table_name(r.table),
                columns: column_names(r.table, &r.columns),
                reference_table: schema.table_name(r.referenced_table),
                reference_columns: column_names(r.referenced_table, &r.referenced_columns),
                deferrable: r.deferrable,
                directions: r.directions.clone(),
            })
            .collect();

        Self { tables, references }
    }
}

fn lookup_table(schema: &Schema, name: &str, reference: &str) -> Result<TableId> {
    schema.tables.get(name).copied().ok_or_else(|| {
        SliceError::Schema(format!("no table {name}, needed by reference {reference}"))
    })
}

fn resolve_columns(
    schema: &Schema,
    table: TableId,
    names: &[String],
    reference: &str,
) -> Result<Vec<ColumnId>> {
    let t = schema
        .table(table)
        .ok_or_else(|| SliceError::Schema(format!("unknown table for reference {reference}")))?;
    names
        .iter()
        .map(|name| {
            t.get_column_id(name).ok_or_else(|| {
                SliceError::Schema(format!(
                    "no column {}.{}, needed by reference {}",
                    t.qualified_name(),
                    name,
                    reference
                ))
            })
        })
        .collect()
}
