//! CLI handler for the json-schema command.

use slice_db::json_schema::{all_schemas, get_schema, schema_names};
use anyhow::Context;
use std::fs;
use std::path::PathBuf;

pub fn run(name: Option<String>, output_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let schemas = match &name {
        Some(name) => {
            let schema = get_schema(name).with_context(|| {
                format!("Unknown schema: {}. Use: {}", name, schema_names().join(", "))
            })?;
            vec![(name.as_str(), schema)]
        }
        None => all_schemas().into_iter().collect(),
    };

    match output_dir {
        Some(dir) => {
            fs::create_dir_all(&dir)?;
            for (name, schema) in &schemas {
                let path = dir.join(format!("{}.schema.json", name));
                fs::write(&path, serde_json::to_string_pretty(schema)? + "\n")
                    .with_context(|| format!("cannot write {}", path.display()))?;
                eprintln!("Wrote {}", path.display());
            }
        }
        None if schemas.len() == 1 => {
            println!("{}", serde_json::to_string_pretty(&schemas[0].1)?);
        }
        None => {
            let map: serde_json::Map<String, serde_json::Value> = schemas
                .into_iter()
                .map(|(name, schema)| Ok((name.to_string(), serde_json::to_value(schema)?)))
                .collect::<Result<_, serde_json::Error>>()?;
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
    }
    Ok(())
}
