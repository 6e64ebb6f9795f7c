//! CLI handler for the restore command.

use super::{connect, load_schema, open_input, pepper};
use slice_db::container::ArchiveReader;
use slice_db::progress::{ProgressReader, RowProgress};
use slice_db::restore::{self as engine, RestoreConfig};
use anyhow::Context;
use std::io::BufReader;
use std::path::PathBuf;

/// Restore command options
pub struct RestoreOptions {
    pub input: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    pub transform: Option<PathBuf>,
    pub transform_pepper: Option<String>,
    pub parallelism: usize,
    pub single_transaction: bool,
    pub progress: bool,
    pub url: Option<String>,
}

pub fn run(opts: RestoreOptions) -> anyhow::Result<()> {
    let config = RestoreConfig::builder()
        .parallelism(opts.parallelism)
        .single_transaction(opts.single_transaction)
        .transform(pepper(opts.transform_pepper))
        .build()?;

    let input = open_input(opts.input.as_deref())?;
    let progress = RowProgress::new(opts.progress, "reading slice");
    let reader = {
        let progress = progress.clone();
        ProgressReader::new(input, move |bytes| {
            progress.set_message(&format!("reading slice ({} bytes)", bytes))
        })
    };
    let slice = ArchiveReader::open(BufReader::new(reader)).context("cannot read slice");
    progress.finish();
    let slice = slice?;

    let db = connect(opts.url)?;
    let schema = load_schema(opts.schema.as_deref(), Some(&db), opts.transform.as_deref())?;
    let plan = engine::plan(&schema, slice.manifest())?;
    let stats = engine::restore(&db, &schema, &slice, &plan, &config)?;

    eprintln!(
        "Restored {} rows into {} tables ({} transactions)",
        stats.rows, stats.tables, stats.transactions
    );
    Ok(())
}
