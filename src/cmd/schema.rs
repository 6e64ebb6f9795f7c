//! CLI handler for the schema command.

use super::{connect, create_output};
use slice_db::db::Database;
use anyhow::Context;
use std::io::Write;
use std::path::PathBuf;

pub fn run(url: Option<String>, output: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let db = connect(url)?;
    let doc = db.introspect().context("schema introspection failed")?;

    let text = if json { doc.to_json()? + "\n" } else { doc.to_yaml()? };
    let mut out = create_output(output.as_deref())?;
    out.write_all(text.as_bytes())?;
    out.flush()?;

    eprintln!(
        "Introspected {} tables and {} references",
        doc.tables.len(),
        doc.references.len()
    );
    Ok(())
}
