//! SQL script container.
//!
//! Parts are spooled to temp files while the dump runs, because the load
//! order is only known once every table has been discovered. `finish`
//! emits one COPY block per table in that order, inside a transaction
//! that defers the cycle-breaking constraints. With [`SchemaSections`] the
//! script also creates the tables before loading them and adds indexes and
//! constraints afterwards.

use super::{SliceWriter, WRITER_BUFFER_SIZE};
use crate::db::{quote_ident, quote_qualified};
use crate::error::{Result, SliceError};
use crate::manifest::{Manifest, PartFormat, SliceMetadata};
use crate::restore::LoadPlan;
use ahash::AHashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use tempfile::TempDir;

/// `pg_dump --section pre-data` and `post-data` output
#[derive(Debug, Clone, Default)]
pub struct SchemaSections {
    pub pre_data: Vec<u8>,
    pub post_data: Vec<u8>,
}

pub struct SqlWriter<W: Write> {
    out: Option<BufWriter<W>>,
    dir: TempDir,
    parts: AHashMap<(String, u32), PathBuf>,
    schema: Option<SchemaSections>,
}

impl<W: Write> SqlWriter<W> {
    pub fn new(out: W) -> Result<Self> {
        Ok(Self {
            out: Some(BufWriter::with_capacity(WRITER_BUFFER_SIZE, out)),
            dir: tempfile::tempdir()?,
            parts: AHashMap::new(),
            schema: None,
        })
    }

    /// Wrap the data in the schema's pre-data and post-data sections
    pub fn with_schema(mut self, sections: SchemaSections) -> Self {
        self.schema = Some(sections);
        self
    }
}

impl<W: Write + Send> SliceWriter for SqlWriter<W> {
    fn format(&self) -> PartFormat {
        PartFormat::SqlBlock
    }

    fn needs_load_plan(&self) -> bool {
        true
    }

    fn write_part(&mut self, table: &str, index: u32, len: u64, data: &mut dyn Read) -> Result<()> {
        let path = self.dir.path().join(format!("part-{}", self.parts.len()));
        let mut file = BufWriter::new(File::create(&path)?);
        let copied = io::copy(&mut data.take(len), &mut file)?;
        if copied != len {
            return Err(SliceError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("part {index} of {table}: expected {len} bytes, got {copied}"),
            )));
        }
        file.flush()?;
        self.parts.insert((table.to_string(), index), path);
        Ok(())
    }

    fn finish(
        &mut self,
        manifest: &Manifest,
        metadata: &SliceMetadata,
        plan: Option<&LoadPlan>,
    ) -> Result<()> {
        let plan = plan.ok_or_else(|| {
            SliceError::Config("SQL output needs a load plan".to_string())
        })?;
        for table in &manifest.tables {
            if !plan.order.contains(&table.table) {
                return Err(SliceError::Manifest(format!(
                    "table {} is missing from the load order",
                    table.table
                )));
            }
        }

        let mut out = self
            .out
            .take()
            .ok_or_else(|| SliceError::Manifest("SQL script already finished".to_string()))?;

        writeln!(out, "-- slice-db slice")?;
        writeln!(out, "-- created: {}", metadata.created_at)?;
        writeln!(out, "-- rows: {}", manifest.row_count())?;
        if let Some(fingerprint) = &metadata.pepper_fingerprint {
            writeln!(out, "-- transformed, pepper fingerprint: {fingerprint}")?;
        }
        writeln!(out)?;
        if let Some(schema) = &self.schema {
            out.write_all(&schema.pre_data)?;
            writeln!(out)?;
        }
        writeln!(out, "BEGIN;")?;
        if !plan.deferred.is_empty() {
            let names: Vec<String> = plan.deferred.iter().map(|c| quote_qualified(c)).collect();
            writeln!(out, "SET CONSTRAINTS {} DEFERRED;", names.join(", "))?;
        }

        for name in &plan.order {
            let Some(table) = manifest.table(name) else {
                continue;
            };
            if table.parts.is_empty() {
                continue;
            }
            let columns: Vec<String> = table.columns.iter().map(|c| quote_ident(c)).collect();
            writeln!(out)?;
            writeln!(
                out,
                "COPY {} ({}) FROM stdin;",
                quote_qualified(&table.table),
                columns.join(", ")
            )?;

            let mut indexes: Vec<u32> = table.parts.iter().map(|p| p.index).collect();
            indexes.sort_unstable();
            for index in indexes {
                let path = self.parts.get(&(table.table.clone(), index)).ok_or_else(|| {
                    SliceError::Manifest(format!("part {index} of {} was never written", table.table))
                })?;
                let mut part = BufReader::new(File::open(path)?);
                io::copy(&mut part, &mut out)?;
            }
            writeln!(out, "\\.")?;
        }

        writeln!(out)?;
        writeln!(out, "COMMIT;")?;
        if let Some(schema) = &self.schema {
            writeln!(out)?;
            out.write_all(&schema.post_data)?;
        }
        out.flush()?;
        Ok(())
    }
}
