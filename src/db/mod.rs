//! Database client collaborator.
//!
//! The dump and restore engines talk to databases only through these traits:
//! - [`SourceSession`]: snapshot export/import, root and relationship
//!   queries, and COPY-out of selected rows
//! - [`TargetSession`]: transactions, constraint deferral and COPY-in
//!
//! Two backends are provided: [`postgres`] for real servers and [`memory`]
//! for embedding and tests.

pub mod memory;
pub mod postgres;

use crate::error::DbError;
use crate::schema::{Direction, Reference, Schema, SchemaDocument, TableSchema};
use std::fmt;
use std::io::{BufRead, Write};

pub use memory::MemoryDatabase;
pub use postgres::{ConnectionConfig, PostgresDatabase};

/// Snapshot-scoped physical locator of a row
pub type RowId = u64;

/// Exported snapshot, importable by other sessions while the exporting
/// session's transaction stays open
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotToken(pub String);

impl fmt::Display for SnapshotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A database that can hand out independent sessions
pub trait Database: Send + Sync {
    type Source: SourceSession;
    type Target: TargetSession;

    /// Open a new read session
    fn source(&self) -> Result<Self::Source, DbError>;

    /// Open a new write session
    fn target(&self) -> Result<Self::Target, DbError>;

    /// Describe the database's tables and foreign keys
    fn introspect(&self) -> Result<SchemaDocument, DbError>;
}

/// Read side used by the dump
pub trait SourceSession: Send {
    /// Open a read-only transaction and export its snapshot
    fn export_snapshot(&mut self) -> Result<SnapshotToken, DbError>;

    /// Open a read-only transaction that sees an exported snapshot
    fn import_snapshot(&mut self, token: &SnapshotToken) -> Result<(), DbError>;

    /// Rows of `table` matching a SQL boolean expression
    fn select_roots(&mut self, table: &TableSchema, predicate: &str) -> Result<Vec<RowId>, DbError>;

    /// Rows at the far end of `reference`, followed in `direction`, that are
    /// related to the given rows of the near end
    fn select_related(
        &mut self,
        schema: &Schema,
        reference: &Reference,
        direction: Direction,
        rows: &[RowId],
    ) -> Result<Vec<RowId>, DbError>;

    /// Write the given rows as COPY text, returning the row count
    fn copy_out(
        &mut self,
        table: &TableSchema,
        rows: &[RowId],
        out: &mut dyn Write,
    ) -> Result<u64, DbError>;

    /// End the session's transaction
    fn end(&mut self) -> Result<(), DbError>;
}

/// Write side used by the restore
pub trait TargetSession: Send {
    fn begin(&mut self) -> Result<(), DbError>;

    /// Defer the named constraints (`schema.constraint`) until commit
    fn defer_constraints(&mut self, constraints: &[String]) -> Result<(), DbError>;

    /// Load COPY text into `table` as one statement, returning the row count
    fn copy_in(&mut self, table: &TableSchema, data: &mut dyn BufRead) -> Result<u64, DbError>;

    fn commit(&mut self) -> Result<(), DbError>;

    fn rollback(&mut self) -> Result<(), DbError>;
}

/// Quote an identifier for PostgreSQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quoted `schema.name` of a table
pub fn quote_table(table: &TableSchema) -> String {
    format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.name))
}

/// Quote a `schema.name` label, splitting at the first dot
pub fn quote_qualified(name: &str) -> String {
    match name.split_once('.') {
        Some((schema, rest)) => format!("{}.{}", quote_ident(schema), quote_ident(rest)),
        None => quote_ident(name),
    }
}
