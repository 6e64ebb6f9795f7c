//! Schema model for relationship-aware slicing.
//!
//! This module provides:
//! - Data models for tables, columns and foreign keys (references)
//! - The serialized schema document and its resolution into the model
//! - Relationship graph construction with strongly-connected components
//! - Filtering of schema documents by table patterns

pub mod document;
pub mod filter;
mod graph;

pub use document::{ColumnDoc, ReferenceDoc, SchemaDocument, TableDoc};
pub use graph::*;

use crate::error::{Result, SliceError};
use crate::transform::TransformKind;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a table within a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

/// Unique identifier for a column within a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnId(pub u16);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnId({})", self.0)
    }
}

/// Unique identifier for a reference (foreign key) within a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceId(pub u32);

/// SQL column type classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Integer types: INT, INTEGER, SMALLINT, SERIAL
    Int,
    /// Big integer types: BIGINT, BIGSERIAL
    BigInt,
    /// Text types: CHAR, VARCHAR, TEXT, etc.
    Text,
    Uuid,
    /// Decimal/numeric types
    Decimal,
    /// Date/time types
    DateTime,
    Bool,
    /// Any other type
    Other(String),
}

impl ColumnType {
    /// Parse a PostgreSQL type string (as printed by `format_type`) into a ColumnType
    pub fn from_sql_type(type_str: &str) -> Self {
        let type_lower = type_str.to_lowercase();
        let base_type = type_lower.split('(').next().unwrap_or(&type_lower).trim();

        match base_type {
            "int" | "integer" | "smallint" | "int4" | "int2" | "serial" | "smallserial" => {
                ColumnType::Int
            }
            "bigint" | "int8" | "bigserial" => ColumnType::BigInt,
            "char" | "varchar" | "text" | "character" | "character varying" | "citext"
            | "name" => ColumnType::Text,
            "decimal" | "numeric" | "real" | "double precision" | "float4" | "float8"
            | "money" => ColumnType::Decimal,
            "date" | "timestamp" | "time" | "timestamptz" | "timetz" | "interval"
            | "timestamp without time zone" | "timestamp with time zone" => ColumnType::DateTime,
            "bool" | "boolean" => ColumnType::Bool,
            "uuid" => ColumnType::Uuid,
            _ => ColumnType::Other(type_str.to_string()),
        }
    }

    /// Whether values of this type compare numerically
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::BigInt | ColumnType::Decimal)
    }
}

/// Column definition within a table
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    /// Declared type, as written in the schema document
    pub data_type: String,
    pub col_type: ColumnType,
    /// Position in table (0-indexed)
    pub ordinal: ColumnId,
    pub is_primary_key: bool,
    pub is_nullable: bool,
    /// Replacement applied when rows of this column are materialized
    pub transform: Option<TransformKind>,
}

/// Direction in which the traversal follows a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// From the referencing rows to the rows they reference (child → parent)
    Forward,
    /// From the referenced rows to the rows referencing them (parent → children)
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// Foreign key constraint between two tables.
///
/// Multiple references between the same pair of tables are distinct edges.
#[derive(Debug, Clone)]
pub struct Reference {
    pub id: ReferenceId,
    /// Constraint name
    pub name: String,
    /// Referencing table
    pub table: TableId,
    pub columns: Vec<ColumnId>,
    /// Referenced table
    pub referenced_table: TableId,
    pub referenced_columns: Vec<ColumnId>,
    /// Whether the constraint check may be postponed to commit
    pub deferrable: bool,
    /// Directions the traversal follows
    pub directions: Vec<Direction>,
}

impl Reference {
    pub fn follows(&self, direction: Direction) -> bool {
        self.directions.contains(&direction)
    }

    pub fn is_self_reference(&self) -> bool {
        self.table == self.referenced_table
    }

    /// Source and destination (table, columns) when following `direction`
    pub fn endpoints(&self, direction: Direction) -> ((TableId, &[ColumnId]), (TableId, &[ColumnId])) {
        match direction {
            Direction::Forward => (
                (self.table, &self.columns),
                (self.referenced_table, &self.referenced_columns),
            ),
            Direction::Reverse => (
                (self.referenced_table, &self.referenced_columns),
                (self.table, &self.columns),
            ),
        }
    }
}

/// Complete table definition
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub id: TableId,
    /// Namespace (PostgreSQL schema)
    pub schema: String,
    pub name: String,
    /// Column definitions in order
    pub columns: Vec<Column>,
    /// Primary key column IDs (ordered for composite PKs)
    pub primary_key: Vec<ColumnId>,
    /// References to parent tables
    pub references: Vec<ReferenceId>,
    /// References from child tables
    pub reverse_references: Vec<ReferenceId>,
}

impl TableSchema {
    /// Create a new empty table schema
    pub fn new(schema: String, name: String, id: TableId) -> Self {
        Self {
            id,
            schema,
            name,
            columns: Vec::new(),
            primary_key: Vec::new(),
            references: Vec::new(),
            reverse_references: Vec::new(),
        }
    }

    /// `schema.name`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Get a column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get column ID by name
    pub fn get_column_id(&self, name: &str) -> Option<ColumnId> {
        self.get_column(name).map(|c| c.ordinal)
    }

    /// Get column by ID
    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.get(id.0 as usize)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Check if any column carries a transform
    pub fn has_transforms(&self) -> bool {
        self.columns.iter().any(|c| c.transform.is_some())
    }
}

/// Complete database schema
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Map from qualified table name to table ID
    pub tables: AHashMap<String, TableId>,
    /// Table schemas indexed by TableId
    pub table_schemas: Vec<TableSchema>,
    /// References indexed by ReferenceId
    pub references: Vec<Reference>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get table ID by name.
    ///
    /// Accepts `schema.table` or a bare table name, which resolves to
    /// `public.table` first and then to the only table with that name.
    pub fn get_table_id(&self, name: &str) -> Option<TableId> {
        if let Some(&id) = self.tables.get(name) {
            return Some(id);
        }
        if !name.contains('.') {
            if let Some(&id) = self.tables.get(&format!("public.{name}")) {
                return Some(id);
            }
            let mut matches = self.table_schemas.iter().filter(|t| t.name == name);
            if let (Some(table), None) = (matches.next(), matches.next()) {
                return Some(table.id);
            }
        }
        None
    }

    /// Get table schema by ID
    pub fn table(&self, id: TableId) -> Option<&TableSchema> {
        self.table_schemas.get(id.0 as usize)
    }

    pub fn table_mut(&mut self, id: TableId) -> Option<&mut TableSchema> {
        self.table_schemas.get_mut(id.0 as usize)
    }

    /// Get table schema by name
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.get_table_id(name).and_then(|id| self.table(id))
    }

    /// Qualified name of a table, or its id if unknown
    pub fn table_name(&self, id: TableId) -> String {
        self.table(id)
            .map(|t| t.qualified_name())
            .unwrap_or_else(|| id.to_string())
    }

    /// Add a new table schema, returning its ID
    pub fn add_table(&mut self, mut table: TableSchema) -> Result<TableId> {
        let qualified = table.qualified_name();
        if self.tables.contains_key(&qualified) {
            return Err(SliceError::Schema(format!(
                "multiple definitions for table {qualified}"
            )));
        }
        let id = TableId(self.table_schemas.len() as u32);
        table.id = id;
        table.references.clear();
        table.reverse_references.clear();
        self.tables.insert(qualified, id);
        self.table_schemas.push(table);
        Ok(id)
    }

    /// Add a reference and link it to both tables
    pub fn add_reference(&mut self, mut reference: Reference) -> Result<ReferenceId> {
        let table = self.table(reference.table).ok_or_else(|| {
            SliceError::Schema(format!("no table for reference {}", reference.name))
        })?;
        let namespace = table.schema.clone();
        if self.references.iter().any(|r| {
            r.name == reference.name
                && self.table(r.table).map(|t| t.schema.as_str()) == Some(namespace.as_str())
        }) {
            return Err(SliceError::Schema(format!(
                "multiple definitions for reference {namespace}.{}",
                reference.name
            )));
        }
        if self.table(reference.referenced_table).is_none() {
            return Err(SliceError::Schema(format!(
                "no referenced table for reference {}",
                reference.name
            )));
        }
        if reference.columns.is_empty() || reference.columns.len() != reference.referenced_columns.len() {
            return Err(SliceError::Schema(format!(
                "reference {} has {} columns but references {}",
                reference.name,
                reference.columns.len(),
                reference.referenced_columns.len()
            )));
        }

        let id = ReferenceId(self.references.len() as u32);
        reference.id = id;
        let (from, to) = (reference.table, reference.referenced_table);
        self.references.push(reference);
        if let Some(t) = self.table_mut(from) {
            t.references.push(id);
        }
        if let Some(t) = self.table_mut(to) {
            t.reverse_references.push(id);
        }
        Ok(id)
    }

    pub fn reference(&self, id: ReferenceId) -> Option<&Reference> {
        self.references.get(id.0 as usize)
    }

    /// `schema.constraint` label used in diagnostics and SET CONSTRAINTS
    pub fn reference_label(&self, id: ReferenceId) -> String {
        match self.reference(id) {
            Some(r) => match self.table(r.table) {
                Some(t) => format!("{}.{}", t.schema, r.name),
                None => r.name.clone(),
            },
            None => format!("reference {}", id.0),
        }
    }

    /// Get the number of tables
    pub fn len(&self) -> usize {
        self.table_schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table_schemas.is_empty()
    }

    /// Iterate over all table schemas
    pub fn iter(&self) -> impl Iterator<Item = &TableSchema> {
        self.table_schemas.iter()
    }
}
