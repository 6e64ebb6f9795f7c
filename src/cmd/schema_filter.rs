//! CLI handler for the schema-filter command.

use super::{create_output, open_input};
use slice_db::schema::filter::{override_directions, DirectionOverride, TableFilter};
use slice_db::schema::SchemaDocument;
use std::io::{Read, Write};
use std::path::PathBuf;

pub fn run(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    include: Vec<String>,
    exclude: Vec<String>,
    directions: Vec<DirectionOverride>,
    json: bool,
) -> anyhow::Result<()> {
    let mut content = String::new();
    open_input(input.as_deref())?.read_to_string(&mut content)?;
    let mut doc = SchemaDocument::parse(&content)?;

    let filter = TableFilter::new(&include, &exclude)?;
    let stats = filter.apply(&mut doc);
    let changed = override_directions(&mut doc, &directions)?;
    // The filtered document must still resolve
    doc.resolve()?;

    let text = if json { doc.to_json()? + "\n" } else { doc.to_yaml()? };
    let mut out = create_output(output.as_deref())?;
    out.write_all(text.as_bytes())?;
    out.flush()?;

    for table in &stats.tables_removed {
        eprintln!("Removed table {}", table);
    }
    for reference in &stats.references_removed {
        eprintln!("Removed reference {}", reference);
    }
    if changed > 0 {
        eprintln!("Changed directions of {} references", changed);
    }
    Ok(())
}
