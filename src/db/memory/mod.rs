//! In-process database backend.
//!
//! Tables are vectors of COPY-text rows. Committed table versions are
//! immutable `Arc`s, so an exported snapshot is just the set of versions
//! current at export time. Target transactions stage their rows and enforce
//! NOT NULL, primary keys and foreign keys the way PostgreSQL does:
//! immediate constraints at the end of each COPY statement, deferred ones
//! at commit.

mod predicate;

pub use predicate::Predicate;

use super::{Database, RowId, SnapshotToken, SourceSession, TargetSession};
use crate::error::DbError;
use crate::row::{encode_line, CopyLines, Row};
use crate::schema::{ColumnId, Direction, Reference, ReferenceId, Schema, SchemaDocument, TableId, TableSchema};
use ahash::{AHashMap, AHashSet};
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

type Version = Arc<Vec<Row>>;
type Frozen = Arc<Vec<Version>>;

/// Shared in-memory database; clones refer to the same data
#[derive(Clone)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

struct Inner {
    schema: Schema,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    tables: Vec<Version>,
    snapshots: AHashMap<String, Frozen>,
    next_snapshot: u64,
    failing: AHashSet<TableId>,
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, State>, DbError> {
        self.state
            .lock()
            .map_err(|_| DbError::new("memory database lock poisoned"))
    }

    fn table_id(&self, name: &str) -> Result<TableId, DbError> {
        self.schema.get_table_id(name).ok_or_else(|| {
            DbError::new(format!("relation \"{name}\" does not exist")).with_code("42P01")
        })
    }
}

impl MemoryDatabase {
    pub fn new(schema: Schema) -> Self {
        let tables = (0..schema.len()).map(|_| Arc::new(Vec::new())).collect();
        Self {
            inner: Arc::new(Inner {
                schema,
                state: Mutex::new(State {
                    tables,
                    ..State::default()
                }),
            }),
        }
    }

    pub fn from_document(doc: &SchemaDocument) -> crate::error::Result<Self> {
        Ok(Self::new(doc.resolve()?))
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Append rows without constraint checks
    pub fn insert(&self, table: &str, rows: Vec<Row>) -> Result<(), DbError> {
        let id = self.inner.table_id(table)?;
        let width = self.inner.schema.table(id).map_or(0, |t| t.columns.len());
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(DbError::new(format!(
                "{table} has {width} columns, row has {}",
                bad.len()
            )));
        }
        let mut state = self.inner.lock()?;
        Arc::make_mut(&mut state.tables[id.0 as usize]).extend(rows);
        Ok(())
    }

    /// Committed rows of a table, in insertion order
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, DbError> {
        let id = self.inner.table_id(table)?;
        let state = self.inner.lock()?;
        Ok(state.tables[id.0 as usize].as_ref().clone())
    }

    /// Make every later read of `table` fail
    pub fn fail_queries_on(&self, table: &str) -> Result<(), DbError> {
        let id = self.inner.table_id(table)?;
        self.inner.lock()?.failing.insert(id);
        Ok(())
    }

    /// Number of exported snapshots still held open
    pub fn open_snapshots(&self) -> usize {
        self.inner.lock().map(|s| s.snapshots.len()).unwrap_or(0)
    }
}

impl Database for MemoryDatabase {
    type Source = MemorySource;
    type Target = MemoryTarget;

    fn source(&self) -> Result<MemorySource, DbError> {
        Ok(MemorySource {
            inner: Arc::clone(&self.inner),
            view: None,
            exported: None,
        })
    }

    fn target(&self) -> Result<MemoryTarget, DbError> {
        Ok(MemoryTarget {
            inner: Arc::clone(&self.inner),
            tx: None,
        })
    }

    fn introspect(&self) -> Result<SchemaDocument, DbError> {
        Ok(SchemaDocument::from_schema(&self.inner.schema))
    }
}

fn row_key<'a>(row: &'a Row, columns: &[ColumnId]) -> Option<Vec<&'a str>> {
    columns
        .iter()
        .map(|c| row.get(c.0 as usize).and_then(|v| v.as_deref()))
        .collect()
}

fn owned_key(row: &Row, columns: &[ColumnId]) -> Option<Vec<String>> {
    row_key(row, columns).map(|k| k.into_iter().map(str::to_string).collect())
}

pub struct MemorySource {
    inner: Arc<Inner>,
    view: Option<Frozen>,
    exported: Option<String>,
}

impl MemorySource {
    fn view(&self) -> Result<&Frozen, DbError> {
        self.view
            .as_ref()
            .ok_or_else(|| DbError::new("no transaction in progress").with_code("25P01"))
    }

    fn check_failing(&self, table: TableId) -> Result<(), DbError> {
        if self.inner.lock()?.failing.contains(&table) {
            return Err(DbError::new(format!(
                "injected failure reading {}",
                self.inner.schema.table_name(table)
            ))
            .with_code("XX000"));
        }
        Ok(())
    }

    fn open(&mut self, frozen: Frozen) -> Result<(), DbError> {
        if self.view.is_some() {
            return Err(DbError::new("transaction already in progress").with_code("25001"));
        }
        self.view = Some(frozen);
        Ok(())
    }
}

fn row_at(rows: &[Row], id: RowId) -> Result<&Row, DbError> {
    id.checked_sub(1)
        .and_then(|i| rows.get(i as usize))
        .ok_or_else(|| DbError::new(format!("no row with id {id}")))
}

impl SourceSession for MemorySource {
    fn export_snapshot(&mut self) -> Result<SnapshotToken, DbError> {
        let (token, frozen) = {
            let mut state = self.inner.lock()?;
            state.next_snapshot += 1;
            let token = format!("{:08X}-{:08X}-1", std::process::id(), state.next_snapshot);
            let frozen: Frozen = Arc::new(state.tables.clone());
            state.snapshots.insert(token.clone(), Arc::clone(&frozen));
            (token, frozen)
        };
        self.open(frozen)?;
        self.exported = Some(token.clone());
        Ok(SnapshotToken(token))
    }

    fn import_snapshot(&mut self, token: &SnapshotToken) -> Result<(), DbError> {
        let frozen = self
            .inner
            .lock()?
            .snapshots
            .get(&token.0)
            .cloned()
            .ok_or_else(|| {
                DbError::new(format!("invalid snapshot identifier: \"{token}\"")).with_code("22023")
            })?;
        self.open(frozen)
    }

    fn select_roots(&mut self, table: &TableSchema, predicate: &str) -> Result<Vec<RowId>, DbError> {
        self.check_failing(table.id)?;
        let predicate = Predicate::parse(predicate, table)?;
        let rows = &self.view()?[table.id.0 as usize];
        Ok(rows
            .iter()
            .enumerate()
            .filter(|(_, row)| predicate.matches(row))
            .map(|(i, _)| i as RowId + 1)
            .collect())
    }

    fn select_related(
        &mut self,
        _schema: &Schema,
        reference: &Reference,
        direction: Direction,
        rows: &[RowId],
    ) -> Result<Vec<RowId>, DbError> {
        let ((from, from_cols), (to, to_cols)) = reference.endpoints(direction);
        self.check_failing(to)?;
        trace!(
            "Memory query {} {} for {} rows",
            reference.name,
            direction,
            rows.len()
        );

        let view = self.view()?;
        let source = &view[from.0 as usize];
        let mut keys = AHashSet::with_capacity(rows.len());
        for &id in rows {
            if let Some(key) = row_key(row_at(source, id)?, from_cols) {
                keys.insert(key);
            }
        }

        Ok(view[to.0 as usize]
            .iter()
            .enumerate()
            .filter(|(_, row)| row_key(row, to_cols).is_some_and(|k| keys.contains(&k)))
            .map(|(i, _)| i as RowId + 1)
            .collect())
    }

    fn copy_out(
        &mut self,
        table: &TableSchema,
        rows: &[RowId],
        out: &mut dyn Write,
    ) -> Result<u64, DbError> {
        self.check_failing(table.id)?;
        let data = &self.view()?[table.id.0 as usize];
        let mut ids = rows.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut buf = Vec::with_capacity(256);
        for &id in &ids {
            buf.clear();
            encode_line(row_at(data, id)?, &mut buf);
            out.write_all(&buf)
                .map_err(|e| DbError::new(format!("writing COPY data: {e}")))?;
        }
        Ok(ids.len() as u64)
    }

    fn end(&mut self) -> Result<(), DbError> {
        self.view = None;
        if let Some(token) = self.exported.take() {
            self.inner.lock()?.snapshots.remove(&token);
        }
        Ok(())
    }
}

impl Drop for MemorySource {
    fn drop(&mut self) {
        let _ = self.end();
    }
}

pub struct MemoryTarget {
    inner: Arc<Inner>,
    tx: Option<Transaction>,
}

struct Transaction {
    staged: Vec<Vec<Row>>,
    deferred: AHashSet<ReferenceId>,
    /// Deferred checks: reference, and staged row index in the referencing table
    pending: Vec<(ReferenceId, usize)>,
    failed: bool,
}

fn violation(table: &TableSchema, constraint: &str, detail: String) -> DbError {
    DbError::new(format!(
        "insert or update on table \"{}\" violates constraint \"{}\": {}",
        table.name, constraint, detail
    ))
    .with_constraint(constraint)
}

/// Keys present in a table: committed rows plus rows staged by the transaction
fn existing_keys(committed: &[Row], staged: &[Row], columns: &[ColumnId]) -> AHashSet<Vec<String>> {
    committed
        .iter()
        .chain(staged)
        .filter_map(|r| owned_key(r, columns))
        .collect()
}

impl MemoryTarget {
    fn tx(&mut self) -> Result<&mut Transaction, DbError> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| DbError::new("no transaction in progress").with_code("25P01"))?;
        if tx.failed {
            return Err(DbError::new(
                "current transaction is aborted, commands ignored until end of transaction block",
            )
            .with_code("25P02"));
        }
        Ok(tx)
    }

    fn load(&mut self, table: &TableSchema, data: &mut dyn BufRead) -> Result<u64, DbError> {
        let inner = Arc::clone(&self.inner);
        let schema = &inner.schema;
        let id = inner.table_id(&table.qualified_name())?;
        let table = schema
            .table(id)
            .ok_or_else(|| DbError::new(format!("no table for {id}")))?;
        let t = id.0 as usize;

        let mut rows = Vec::new();
        let mut lines = CopyLines::new(data);
        while let Some(row) = lines
            .next_row()
            .map_err(|e| DbError::new(format!("reading COPY data: {e}")).with_code("22P04"))?
        {
            if row.len() != table.columns.len() {
                return Err(DbError::new(format!(
                    "COPY into {} expects {} columns, got {}",
                    table.qualified_name(),
                    table.columns.len(),
                    row.len()
                ))
                .with_code("22P04"));
            }
            for (value, column) in row.iter().zip(&table.columns) {
                if value.is_none() && !column.is_nullable {
                    return Err(DbError::new(format!(
                        "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                        column.name, table.name
                    ))
                    .with_code("23502"));
                }
            }
            rows.push(row);
        }
        let count = rows.len() as u64;

        let committed: Vec<Version> = inner.lock()?.tables.clone();
        let tx = self.tx()?;

        if !table.primary_key.is_empty() {
            let mut keys = existing_keys(&committed[t], &tx.staged[t], &table.primary_key);
            for row in &rows {
                if let Some(key) = owned_key(row, &table.primary_key) {
                    if !keys.insert(key.clone()) {
                        return Err(violation(
                            table,
                            &format!("{}_pkey", table.name),
                            format!("duplicate key ({})", key.join(", ")),
                        )
                        .with_code("23505"));
                    }
                }
            }
        }

        let start = tx.staged[t].len();
        tx.staged[t].extend(rows);

        for &ref_id in &table.references {
            let Some(reference) = schema.reference(ref_id) else {
                continue;
            };
            if tx.deferred.contains(&ref_id) {
                tx.pending.extend((start..tx.staged[t].len()).map(|i| (ref_id, i)));
                continue;
            }
            let parent = reference.referenced_table.0 as usize;
            let parents = existing_keys(
                &committed[parent],
                &tx.staged[parent],
                &reference.referenced_columns,
            );
            for row in &tx.staged[t][start..] {
                if let Some(key) = owned_key(row, &reference.columns) {
                    if !parents.contains(&key) {
                        return Err(violation(
                            table,
                            &reference.name,
                            format!(
                                "key ({}) is not present in table \"{}\"",
                                key.join(", "),
                                schema.table_name(reference.referenced_table)
                            ),
                        )
                        .with_code("23503"));
                    }
                }
            }
        }

        Ok(count)
    }
}

impl TargetSession for MemoryTarget {
    fn begin(&mut self) -> Result<(), DbError> {
        if self.tx.is_some() {
            return Err(DbError::new("transaction already in progress").with_code("25001"));
        }
        self.tx = Some(Transaction {
            staged: vec![Vec::new(); self.inner.schema.len()],
            deferred: AHashSet::new(),
            pending: Vec::new(),
            failed: false,
        });
        Ok(())
    }

    fn defer_constraints(&mut self, constraints: &[String]) -> Result<(), DbError> {
        let inner = Arc::clone(&self.inner);
        let tx = self.tx()?;
        for name in constraints {
            let reference = inner
                .schema
                .references
                .iter()
                .find(|r| inner.schema.reference_label(r.id) == *name)
                .ok_or_else(|| {
                    DbError::new(format!("constraint \"{name}\" does not exist")).with_code("42704")
                })?;
            if !reference.deferrable {
                return Err(DbError::new(format!("constraint \"{name}\" is not deferrable"))
                    .with_code("42809"));
            }
            tx.deferred.insert(reference.id);
        }
        Ok(())
    }

    fn copy_in(&mut self, table: &TableSchema, data: &mut dyn BufRead) -> Result<u64, DbError> {
        let autocommit = self.tx.is_none();
        if autocommit {
            self.begin()?;
        }
        match self.load(table, data) {
            Ok(count) => {
                if autocommit {
                    self.commit()?;
                }
                Ok(count)
            }
            Err(e) => {
                if autocommit {
                    self.tx = None;
                } else if let Some(tx) = self.tx.as_mut() {
                    tx.failed = true;
                }
                Err(e)
            }
        }
    }

    fn commit(&mut self) -> Result<(), DbError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::new("no transaction in progress").with_code("25P01"))?;
        if tx.failed {
            return Err(DbError::new("current transaction is aborted, rolled back").with_code("25P02"));
        }

        let schema = &self.inner.schema;
        let mut state = self.inner.lock()?;

        for table in schema.iter() {
            let t = table.id.0 as usize;
            if tx.staged[t].is_empty() || table.primary_key.is_empty() {
                continue;
            }
            let committed = existing_keys(&state.tables[t], &[], &table.primary_key);
            if let Some(key) = tx.staged[t]
                .iter()
                .filter_map(|r| owned_key(r, &table.primary_key))
                .find(|k| committed.contains(k))
            {
                return Err(violation(
                    table,
                    &format!("{}_pkey", table.name),
                    format!("duplicate key ({})", key.join(", ")),
                )
                .with_code("23505"));
            }
        }

        let mut parents: AHashMap<ReferenceId, AHashSet<Vec<String>>> = AHashMap::new();
        for &(ref_id, index) in &tx.pending {
            let Some(reference) = schema.reference(ref_id) else {
                continue;
            };
            let child = reference.table.0 as usize;
            let Some(key) = owned_key(&tx.staged[child][index], &reference.columns) else {
                continue;
            };
            let parent = reference.referenced_table.0 as usize;
            let keys = parents.entry(ref_id).or_insert_with(|| {
                existing_keys(
                    &state.tables[parent],
                    &tx.staged[parent],
                    &reference.referenced_columns,
                )
            });
            if !keys.contains(&key) {
                let table = schema
                    .table(reference.table)
                    .ok_or_else(|| DbError::new("unknown table"))?;
                return Err(violation(
                    table,
                    &reference.name,
                    format!(
                        "key ({}) is not present in table \"{}\"",
                        key.join(", "),
                        schema.table_name(reference.referenced_table)
                    ),
                )
                .with_code("23503"));
            }
        }

        for (t, rows) in tx.staged.into_iter().enumerate() {
            if !rows.is_empty() {
                Arc::make_mut(&mut state.tables[t]).extend(rows);
            }
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DbError> {
        self.tx = None;
        Ok(())
    }
}
