//! Dump: relationship traversal from root rows, and slice output.
//!
//! The traversal is a least fixed point: starting from the rows matching
//! the roots, every reference touching a table with newly claimed rows is
//! followed (forward to parents, in reverse to children) until no query
//! finds an unclaimed row. The result does not depend on task order.

pub mod pool;
pub mod rowset;
mod traverse;

pub use pool::CancelToken;
pub use rowset::{Part, RowSets};

use crate::container::SliceWriter;
use crate::db::{Database, SourceSession};
use crate::error::{Result, SliceError};
use crate::manifest::{RootRecord, SliceMetadata};
use crate::progress::RowProgress;
use crate::restore;
use crate::schema::Schema;
use crate::snapshot::SnapshotCoordinator;
use crate::transform::Pepper;
use std::time::Instant;
use tracing::{info, warn};
use traverse::{Output, Task, Traversal};

/// Starting table and row filter of a traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    pub table: String,
    /// SQL boolean expression over the table's columns
    pub predicate: String,
}

impl Root {
    pub fn new(table: impl Into<String>, predicate: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicate: predicate.into(),
        }
    }
}

/// Dump configuration
#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub roots: Vec<Root>,
    /// Worker sessions
    pub parallelism: usize,
    /// Apply column transforms
    pub transform: bool,
    /// Transform key; random when transforms apply and none is given
    pub pepper: Option<Pepper>,
    pub progress: bool,
    pub cancel: CancelToken,
}

impl DumpConfig {
    pub fn builder() -> DumpConfigBuilder {
        DumpConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(SliceError::Config("at least one root is required".to_string()));
        }
        if self.parallelism == 0 {
            return Err(SliceError::Config("parallelism must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Builder for DumpConfig
#[derive(Default)]
pub struct DumpConfigBuilder {
    roots: Vec<Root>,
    parallelism: Option<usize>,
    transform: Option<bool>,
    pepper: Option<Pepper>,
    progress: bool,
    cancel: Option<CancelToken>,
}

impl DumpConfigBuilder {
    pub fn root(mut self, table: impl Into<String>, predicate: impl Into<String>) -> Self {
        self.roots.push(Root::new(table, predicate));
        self
    }

    pub fn roots(mut self, roots: Vec<Root>) -> Self {
        self.roots.extend(roots);
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn transform(mut self, transform: bool) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn pepper(mut self, pepper: Option<Pepper>) -> Self {
        self.pepper = pepper;
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<DumpConfig> {
        let config = DumpConfig {
            roots: self.roots,
            parallelism: self.parallelism.unwrap_or(1),
            transform: self.transform.unwrap_or(true),
            pepper: self.pepper,
            progress: self.progress,
            cancel: self.cancel.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Dump statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DumpStats {
    pub rows: u64,
    pub tables: usize,
    pub parts: usize,
    pub transformed: bool,
}

fn resolve_roots(schema: &Schema, roots: &[Root]) -> Result<Vec<Task>> {
    roots
        .iter()
        .map(|root| {
            let table = schema.get_table_id(&root.table).ok_or_else(|| {
                SliceError::Config(format!("Root table {} does not exist", root.table))
            })?;
            Ok(Task::Root {
                table,
                predicate: root.predicate.clone(),
            })
        })
        .collect()
}

/// Run the traversal under one exported snapshot shared by all workers
fn run<D: Database>(
    db: &D,
    schema: &Schema,
    roots: &[Root],
    parallelism: usize,
    cancel: &CancelToken,
    output: Option<&Output<'_>>,
    progress: &RowProgress,
) -> Result<RowSets> {
    let initial = resolve_roots(schema, roots)?;
    if parallelism == 0 {
        return Err(SliceError::Config("parallelism must be at least 1".to_string()));
    }

    let coordinator = SnapshotCoordinator::begin(db)?;
    let mut sessions = (0..parallelism)
        .map(|_| coordinator.join())
        .collect::<Result<Vec<_>>>()?;

    let rows = RowSets::new(schema.len());
    let traversal = Traversal {
        schema,
        rows: &rows,
        output,
        progress,
    };
    let result = pool::run(&mut sessions, initial, cancel, |session, task| {
        traversal.process(session, task)
    });

    for session in &mut sessions {
        if let Err(e) = session.end() {
            warn!("Failed to end worker session: {}", e);
        }
    }
    drop(sessions);
    let released = coordinator.release();

    result?;
    released?;
    Ok(rows)
}

/// Discover the rows of a slice without materializing them
pub fn traverse<D: Database>(
    db: &D,
    schema: &Schema,
    roots: &[Root],
    parallelism: usize,
    cancel: &CancelToken,
) -> Result<RowSets> {
    run(db, schema, roots, parallelism, cancel, None, &RowProgress::hidden())
}

/// Dump the slice reachable from the configured roots into `writer`.
///
/// The manifest is written only after the traversal reached its fixed
/// point; on error or cancellation the writer is left unfinished.
pub fn dump<D: Database>(
    db: &D,
    schema: &Schema,
    config: &DumpConfig,
    writer: &mut dyn SliceWriter,
) -> Result<DumpStats> {
    config.validate()?;
    let start = Instant::now();

    let has_transforms = schema.iter().any(|t| t.has_transforms());
    let pepper = match (config.transform && has_transforms, &config.pepper) {
        (true, Some(pepper)) => Some(pepper.clone()),
        (true, None) => Some(Pepper::random()),
        (false, Some(_)) => {
            warn!("No transforms apply, ignoring pepper");
            None
        }
        (false, None) => None,
    };
    let fingerprint = pepper.as_ref().map(Pepper::fingerprint);

    info!("Dumping rows");
    let progress = RowProgress::new(config.progress, "dumped");
    let output = Output::new(writer, pepper);
    let result = run(
        db,
        schema,
        &config.roots,
        config.parallelism,
        &config.cancel,
        Some(&output),
        &progress,
    );
    progress.finish();
    let rows = result?;

    if config.cancel.is_cancelled() {
        return Err(SliceError::Cancelled);
    }

    let manifest = output.manifest(schema)?;
    let writer = output.into_writer()?;
    let plan = if writer.needs_load_plan() {
        Some(restore::plan(schema, &manifest)?)
    } else {
        None
    };
    let roots = config
        .roots
        .iter()
        .map(|r| RootRecord {
            table: r.table.clone(),
            predicate: r.predicate.clone(),
        })
        .collect();
    let metadata = SliceMetadata::new(roots, fingerprint);
    writer.finish(&manifest, &metadata, plan.as_ref())?;

    let stats = DumpStats {
        rows: rows.total(),
        tables: manifest.tables.len(),
        parts: manifest.tables.iter().map(|t| t.parts.len()).sum(),
        transformed: metadata.transformed,
    };
    info!(
        "Dumped {} rows ({:.3}s)",
        stats.rows,
        start.elapsed().as_secs_f64()
    );
    Ok(stats)
}
