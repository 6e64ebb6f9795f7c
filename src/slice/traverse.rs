//! Traversal tasks and row materialization.
//!
//! A root task selects rows by predicate; a reference task selects the rows
//! related to one part through one reference in one direction. Either way,
//! the rows not claimed before become a new part of their table, which is
//! copied out, transformed and handed to the slice writer by the worker
//! that discovered it, and which schedules a reference task for every
//! reference touching that table.

use super::rowset::{Part, RowSets};
use crate::container::SliceWriter;
use crate::db::SourceSession;
use crate::error::{DbError, Result, SliceError};
use crate::manifest::{Manifest, ManifestPart, ManifestTable, PartFormat};
use crate::progress::RowProgress;
use crate::schema::{Direction, ReferenceId, Schema, TableId, TableSchema};
use crate::transform::{Pepper, TransformPipeline};
use std::io::{BufReader, BufWriter, Seek, Write};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, trace};

pub(crate) enum Task {
    Root {
        table: TableId,
        predicate: String,
    },
    Reference {
        reference: ReferenceId,
        direction: Direction,
        source: Arc<Part>,
    },
}

pub(crate) struct Traversal<'a, 'w> {
    pub schema: &'a Schema,
    pub rows: &'a RowSets,
    pub output: Option<&'a Output<'w>>,
    pub progress: &'a RowProgress,
}

fn table_of(schema: &Schema, id: TableId) -> Result<&TableSchema> {
    schema
        .table(id)
        .ok_or_else(|| SliceError::Schema(format!("no table for {id}")))
}

impl Traversal<'_, '_> {
    pub fn process<S: SourceSession>(&self, session: &mut S, task: Task) -> Result<Vec<Task>> {
        let start = Instant::now();

        let (part, arrived_via) = match task {
            Task::Root { table, predicate } => {
                let t = table_of(self.schema, table)?;
                trace!("Finding rows from table {}", t.qualified_name());
                let found = session.select_roots(t, &predicate).map_err(|source| {
                    SliceError::TraversalQuery {
                        table: t.qualified_name(),
                        via: None,
                        source,
                    }
                })?;
                let part = self.rows.claim(table, &found);
                match &part {
                    Some(part) => debug!(
                        "Found {} rows ({} new) as {}/{} ({:.3}s)",
                        found.len(),
                        part.rows.len(),
                        t.qualified_name(),
                        part.index,
                        start.elapsed().as_secs_f64()
                    ),
                    None => debug!(
                        "Found {} rows (no new) in table {} ({:.3}s)",
                        found.len(),
                        t.qualified_name(),
                        start.elapsed().as_secs_f64()
                    ),
                }
                (part, None)
            }
            Task::Reference {
                reference,
                direction,
                source,
            } => {
                let r = self.schema.reference(reference).ok_or_else(|| {
                    SliceError::Schema(format!("no reference with id {}", reference.0))
                })?;
                let (_, (to, _)) = r.endpoints(direction);
                let label = self.schema.reference_label(reference);
                let source_name = self.schema.table_name(source.table);
                trace!(
                    "Finding rows from table {} using {}/{} via {} ({})",
                    self.schema.table_name(to),
                    source_name,
                    source.index,
                    label,
                    direction
                );
                let found = session
                    .select_related(self.schema, r, direction, &source.rows)
                    .map_err(|e| SliceError::TraversalQuery {
                        table: self.schema.table_name(to),
                        via: Some(label.clone()),
                        source: e,
                    })?;
                let part = self.rows.claim(to, &found);
                match &part {
                    Some(part) => debug!(
                        "Found {} rows ({} new) as {}/{} using {}/{} via {} ({:.3}s)",
                        found.len(),
                        part.rows.len(),
                        self.schema.table_name(to),
                        part.index,
                        source_name,
                        source.index,
                        label,
                        start.elapsed().as_secs_f64()
                    ),
                    None => debug!(
                        "Found {} rows (no new) in table {} using {}/{} via {} ({:.3}s)",
                        found.len(),
                        self.schema.table_name(to),
                        source_name,
                        source.index,
                        label,
                        start.elapsed().as_secs_f64()
                    ),
                }
                (part, Some((reference, direction)))
            }
        };

        let Some(part) = part else {
            return Ok(Vec::new());
        };
        self.progress.add(part.rows.len() as u64);

        let part = Arc::new(part);
        let follow_ups = self.follow_ups(&part, arrived_via)?;
        if let Some(output) = self.output {
            output.materialize(session, self.schema, &part)?;
        }
        Ok(follow_ups)
    }

    /// Reference tasks for every reference touching the part's table.
    ///
    /// Rows reached by following a reference in reverse all point at the
    /// source part, so following the same reference forward from them is
    /// skipped.
    fn follow_ups(&self, part: &Arc<Part>, arrived_via: Option<(ReferenceId, Direction)>) -> Result<Vec<Task>> {
        let table = table_of(self.schema, part.table)?;
        let mut tasks = Vec::with_capacity(table.references.len() + table.reverse_references.len());

        let outgoing = table.references.iter().map(|&id| (id, Direction::Forward));
        let incoming = table.reverse_references.iter().map(|&id| (id, Direction::Reverse));
        for (id, direction) in outgoing.chain(incoming) {
            let Some(reference) = self.schema.reference(id) else {
                continue;
            };
            if !reference.follows(direction) {
                continue;
            }
            if direction == Direction::Forward && arrived_via == Some((id, Direction::Reverse)) {
                continue;
            }
            tasks.push(Task::Reference {
                reference: id,
                direction,
                source: Arc::clone(part),
            });
        }
        Ok(tasks)
    }
}

/// Where materialized parts go
pub(crate) struct Output<'w> {
    writer: Mutex<&'w mut dyn SliceWriter>,
    format: PartFormat,
    pepper: Option<Pepper>,
    parts: Mutex<Vec<(TableId, ManifestPart)>>,
}

impl<'w> Output<'w> {
    pub fn new(writer: &'w mut dyn SliceWriter, pepper: Option<Pepper>) -> Self {
        let format = writer.format();
        Self {
            writer: Mutex::new(writer),
            format,
            pepper,
            parts: Mutex::new(Vec::new()),
        }
    }

    /// Copy out, transform and write one part
    fn materialize<S: SourceSession>(&self, session: &mut S, schema: &Schema, part: &Part) -> Result<()> {
        let start = Instant::now();
        let table = table_of(schema, part.table)?;
        let name = table.qualified_name();
        let query_error = |source: DbError| SliceError::TraversalQuery {
            table: name.clone(),
            via: None,
            source,
        };

        let mut raw = tempfile::tempfile()?;
        let count = {
            let mut out = BufWriter::new(&raw);
            let count = session
                .copy_out(table, &part.rows, &mut out)
                .map_err(&query_error)?;
            out.flush()?;
            count
        };
        if count != part.rows.len() as u64 {
            return Err(query_error(DbError::new(format!(
                "expected {} rows from part {}, copied {}",
                part.rows.len(),
                part.index,
                count
            ))));
        }
        raw.rewind()?;

        let pipeline = self
            .pepper
            .as_ref()
            .map(|pepper| TransformPipeline::new(table, pepper))
            .filter(|pipeline| !pipeline.is_identity());
        let mut spool = match pipeline {
            Some(pipeline) => {
                let mut transformed = tempfile::tempfile()?;
                {
                    let mut out = BufWriter::new(&transformed);
                    pipeline.run(BufReader::new(&raw), &mut out)?;
                    out.flush()?;
                }
                transformed.rewind()?;
                transformed
            }
            None => raw,
        };
        let len = spool.metadata()?.len();

        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| SliceError::Config("slice writer lock poisoned".to_string()))?;
            writer.write_part(&name, part.index, len, &mut BufReader::new(&mut spool))?;
        }
        self.parts
            .lock()
            .map_err(|_| SliceError::Config("manifest lock poisoned".to_string()))?
            .push((
                part.table,
                ManifestPart {
                    index: part.index,
                    row_count: count,
                    byte_count: len,
                    format: self.format,
                },
            ));

        debug!(
            "Dumped {} rows from table {} ({:.3}s)",
            count,
            name,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Manifest of the written parts, tables in schema order
    pub fn manifest(&self, schema: &Schema) -> Result<Manifest> {
        let mut parts = self
            .parts
            .lock()
            .map_err(|_| SliceError::Config("manifest lock poisoned".to_string()))?
            .clone();
        parts.sort_by_key(|(table, part)| (*table, part.index));

        let mut tables: Vec<ManifestTable> = Vec::new();
        for (id, part) in parts {
            let name = schema.table_name(id);
            match tables.last_mut() {
                Some(last) if last.table == name => last.parts.push(part),
                _ => {
                    let table = table_of(schema, id)?;
                    tables.push(ManifestTable {
                        table: name,
                        columns: table.column_names(),
                        parts: vec![part],
                    });
                }
            }
        }
        Ok(Manifest::new(tables))
    }

    pub fn into_writer(self) -> Result<&'w mut dyn SliceWriter> {
        self.writer
            .into_inner()
            .map_err(|_| SliceError::Config("slice writer lock poisoned".to_string()))
    }
}
