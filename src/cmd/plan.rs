//! Plan command - show the order in which restore loads a slice.

use super::{connect, load_schema};
use slice_db::container::ArchiveReader;
use slice_db::db::PostgresDatabase;
use slice_db::restore::{self, LoadPlan};
use slice_db::schema::TableId;
use anyhow::Context;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

pub fn run(
    slice: Option<PathBuf>,
    schema: Option<PathBuf>,
    json: bool,
    url: Option<String>,
) -> anyhow::Result<()> {
    let db = match schema {
        Some(_) => None,
        None => Some(connect(url)?),
    };
    let schema = load_schema::<PostgresDatabase>(schema.as_deref(), db.as_ref(), None)?;

    let plan = match slice {
        Some(path) => {
            let file = File::open(&path).with_context(|| format!("cannot open {}", path.display()))?;
            let slice = ArchiveReader::open(BufReader::new(file))?;
            restore::plan(&schema, slice.manifest())?
        }
        None => {
            let tables: Vec<TableId> = schema.iter().map(|t| t.id).collect();
            restore::plan_tables(&schema, &tables)?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn print_plan(plan: &LoadPlan) {
    if plan.is_empty() {
        println!("No tables to load.");
        return;
    }

    println!("Load order ({} tables):", plan.len());
    for (i, table) in plan.order.iter().enumerate() {
        println!("  {}. {}", i + 1, table);
    }

    if !plan.deferred.is_empty() {
        println!("\nDeferred constraints ({}):", plan.deferred.len());
        for constraint in &plan.deferred {
            println!("  - {}", constraint);
        }
    }

    println!("\nTransaction phases ({}):", plan.phases.len());
    for (i, phase) in plan.phases.iter().enumerate() {
        let units: Vec<String> = phase
            .iter()
            .filter_map(|&u| plan.units.get(u))
            .map(|unit| unit.tables.join(" + "))
            .collect();
        println!("  {}. {}", i + 1, units.join(", "));
    }
}
