//! Restore of a slice into a target database.
//!
//! Tables are loaded in plan order, one COPY statement per table. In the
//! default single-transaction mode everything commits at once. With
//! `single_transaction` off, each load unit commits on its own and the
//! units of a phase run in parallel.

pub mod plan;

pub use plan::{plan, plan_tables, LoadPlan, LoadUnit};

use crate::container::ArchiveReader;
use crate::db::{Database, TargetSession};
use crate::error::{DbError, Result, SliceError};
use crate::schema::Schema;
use crate::transform::{Pepper, TransformPipeline};
use std::collections::VecDeque;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Restore configuration
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Concurrent transactions in multi-transaction mode
    pub parallelism: usize,
    /// Load everything in one transaction
    pub single_transaction: bool,
    /// Transform rows while loading, unless the slice is already transformed
    pub transform: Option<Pepper>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            single_transaction: true,
            transform: None,
        }
    }
}

impl RestoreConfig {
    pub fn builder() -> RestoreConfigBuilder {
        RestoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(SliceError::Config("parallelism must be at least 1".to_string()));
        }
        if self.single_transaction && self.parallelism > 1 {
            return Err(SliceError::Config(
                "a single-transaction restore cannot run in parallel; use --no-single-transaction"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for RestoreConfig
#[derive(Default)]
pub struct RestoreConfigBuilder {
    parallelism: Option<usize>,
    single_transaction: Option<bool>,
    transform: Option<Pepper>,
}

impl RestoreConfigBuilder {
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn single_transaction(mut self, single: bool) -> Self {
        self.single_transaction = Some(single);
        self
    }

    pub fn transform(mut self, pepper: Option<Pepper>) -> Self {
        self.transform = pepper;
        self
    }

    pub fn build(self) -> Result<RestoreConfig> {
        let defaults = RestoreConfig::default();
        let config = RestoreConfig {
            parallelism: self.parallelism.unwrap_or(defaults.parallelism),
            single_transaction: self.single_transaction.unwrap_or(defaults.single_transaction),
            transform: self.transform,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Restore statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreStats {
    pub tables: usize,
    pub rows: u64,
    pub transactions: usize,
}

/// Load a slice into the target database in plan order.
///
/// Nothing is written when the manifest and the schema disagree. A failing
/// transaction is rolled back; in multi-transaction mode, units of earlier
/// phases stay committed.
pub fn restore<D: Database>(
    db: &D,
    schema: &Schema,
    slice: &ArchiveReader,
    plan: &LoadPlan,
    config: &RestoreConfig,
) -> Result<RestoreStats> {
    config.validate()?;
    let start = Instant::now();
    let manifest = slice.manifest();

    for entry in &manifest.tables {
        if !plan.order.contains(&entry.table) {
            return Err(SliceError::Manifest(format!(
                "table {} is missing from the load order",
                entry.table
            )));
        }
        let table = schema.get_table(&entry.table).ok_or_else(|| {
            SliceError::Manifest(format!("table {} is not in the schema", entry.table))
        })?;
        if table.column_names() != entry.columns {
            return Err(SliceError::Manifest(format!(
                "columns of {} ({}) do not match the schema ({})",
                entry.table,
                entry.columns.join(", "),
                table.column_names().join(", ")
            )));
        }
    }

    let pepper = match &config.transform {
        Some(_) if slice.metadata().transformed => {
            warn!("Slice is already transformed, skipping transformation");
            None
        }
        other => other.as_ref(),
    };

    let loader = Loader {
        db,
        schema,
        slice,
        pepper,
    };

    let (rows, transactions) = if config.single_transaction {
        let rows = loader.run_unit(&plan.order, &plan.deferred)?;
        (rows, 1)
    } else {
        let rows = loader.run_phases(plan, config.parallelism)?;
        (rows, plan.units.len())
    };

    info!(
        "Restored {} rows into {} tables ({} transactions, {:.3}s)",
        rows,
        manifest.tables.len(),
        transactions,
        start.elapsed().as_secs_f64()
    );

    Ok(RestoreStats {
        tables: manifest.tables.len(),
        rows,
        transactions,
    })
}

struct Loader<'a, D: Database> {
    db: &'a D,
    schema: &'a Schema,
    slice: &'a ArchiveReader,
    pepper: Option<&'a Pepper>,
}

impl<D: Database> Loader<'_, D> {
    /// Run the phases in order, the units of each phase concurrently
    fn run_phases(&self, plan: &LoadPlan, parallelism: usize) -> Result<u64> {
        let rows = AtomicU64::new(0);

        for (p, phase) in plan.phases.iter().enumerate() {
            debug!("Phase {}: {} units", p + 1, phase.len());
            let queue = Mutex::new(phase.iter().copied().collect::<VecDeque<usize>>());
            let failed = AtomicBool::new(false);
            let errors: Mutex<Vec<SliceError>> = Mutex::new(Vec::new());
            let workers = parallelism.min(phase.len()).max(1);

            std::thread::scope(|s| {
                for _ in 0..workers {
                    s.spawn(|| loop {
                        if failed.load(Ordering::SeqCst) {
                            break;
                        }
                        let next = match queue.lock() {
                            Ok(mut queue) => queue.pop_front(),
                            Err(_) => None,
                        };
                        let Some(index) = next else {
                            break;
                        };
                        let Some(unit) = plan.units.get(index) else {
                            break;
                        };
                        match self.run_unit(&unit.tables, &unit.deferred) {
                            Ok(n) => {
                                rows.fetch_add(n, Ordering::SeqCst);
                            }
                            Err(e) => {
                                failed.store(true, Ordering::SeqCst);
                                errors
                                    .lock()
                                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                                    .push(e);
                            }
                        }
                    });
                }
            });

            let mut errors = errors
                .into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !errors.is_empty() {
                if p > 0 {
                    warn!("Phases 1 to {} were already committed", p);
                }
                return Err(errors.remove(0));
            }
        }

        Ok(rows.into_inner())
    }

    /// Load the tables in one transaction
    fn run_unit(&self, tables: &[String], deferred: &[String]) -> Result<u64> {
        let mut session = self.db.target()?;
        session.begin()?;

        let rows = match self.load_tables(&mut session, tables, deferred) {
            Ok(rows) => rows,
            Err(e) => {
                error!("Restore failed, rolling back: {}", e);
                if let Err(rollback) = session.rollback() {
                    warn!("Rollback failed: {}", rollback);
                }
                return Err(e);
            }
        };

        session
            .commit()
            .map_err(|e| self.commit_error(tables, e))?;
        Ok(rows)
    }

    fn load_tables(
        &self,
        session: &mut D::Target,
        tables: &[String],
        deferred: &[String],
    ) -> Result<u64> {
        session.defer_constraints(deferred)?;
        let mut rows = 0;
        for name in tables {
            rows += self.load_table(session, name)?;
        }
        Ok(rows)
    }

    fn load_table(&self, session: &mut D::Target, name: &str) -> Result<u64> {
        let Some(entry) = self.slice.manifest().table(name) else {
            return Ok(0);
        };
        if entry.parts.is_empty() {
            return Ok(0);
        }
        let table = self
            .schema
            .get_table(name)
            .ok_or_else(|| SliceError::Manifest(format!("table {name} is not in the schema")))?;

        let start = Instant::now();
        let mut data = self.slice.open_table(entry)?;
        let pipeline = self
            .pepper
            .map(|pepper| TransformPipeline::new(table, pepper))
            .filter(|pipeline| !pipeline.is_identity());

        let count = match pipeline {
            Some(pipeline) => {
                let mut spool = tempfile::tempfile()?;
                {
                    let mut writer = BufWriter::new(&spool);
                    pipeline.run(&mut data, &mut writer)?;
                    writer.flush()?;
                }
                spool.rewind()?;
                session.copy_in(table, &mut BufReader::new(spool))
            }
            None => session.copy_in(table, &mut data),
        }
        .map_err(|e| table_error(name, e))?;

        if count != entry.row_count() {
            return Err(SliceError::Manifest(format!(
                "{} holds {} rows but the manifest lists {}",
                name,
                count,
                entry.row_count()
            )));
        }
        debug!(
            "Restored {} rows into {} ({:.3}s)",
            count,
            name,
            start.elapsed().as_secs_f64()
        );
        Ok(count)
    }

    /// Attribute a commit-time failure to the table owning the constraint
    fn commit_error(&self, tables: &[String], e: DbError) -> SliceError {
        let table = e
            .constraint
            .as_deref()
            .and_then(|constraint| {
                self.schema
                    .references
                    .iter()
                    .filter(|r| r.name == constraint)
                    .map(|r| self.schema.table_name(r.table))
                    .find(|table| tables.contains(table))
            })
            .unwrap_or_else(|| tables.join(", "));
        table_error(&table, e)
    }
}

fn table_error(table: &str, e: DbError) -> SliceError {
    if e.is_constraint_violation() {
        SliceError::ConstraintViolation {
            table: table.to_string(),
            constraint: e.constraint,
            detail: e.message,
        }
    } else {
        SliceError::Database(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_single_transaction_rejected() {
        let result = RestoreConfig::builder().parallelism(4).build();
        assert!(matches!(result, Err(SliceError::Config(_))));

        let config = RestoreConfig::builder()
            .parallelism(4)
            .single_transaction(false)
            .build()
            .unwrap();
        assert_eq!(config.parallelism, 4);
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let result = RestoreConfig::builder()
            .parallelism(0)
            .single_transaction(false)
            .build();
        assert!(matches!(result, Err(SliceError::Config(_))));
    }

    #[test]
    fn test_constraint_errors_name_the_table() {
        let err = table_error(
            "public.child",
            DbError::new("violates foreign key")
                .with_code("23503")
                .with_constraint("child_parent_fkey"),
        );
        match err {
            SliceError::ConstraintViolation { table, constraint, .. } => {
                assert_eq!(table, "public.child");
                assert_eq!(constraint.as_deref(), Some("child_parent_fkey"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = table_error("public.child", DbError::new("connection reset"));
        assert!(matches!(err, SliceError::Database(_)));
    }
}
