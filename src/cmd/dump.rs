//! CLI handler for the dump command.

use super::{connect, create_output, load_schema, pepper};
use anyhow::{bail, Context};
use slice_db::container::{ArchiveWriter, OutputType, SchemaSections, SliceWriter, SqlWriter};
use slice_db::slice::{dump, DumpConfig, DumpStats, Root};
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};

/// Dump command options
pub struct DumpOptions {
    /// Flattened `TABLE PREDICATE` pairs
    pub roots: Vec<String>,
    pub schema: Option<PathBuf>,
    pub transform: Option<PathBuf>,
    pub pepper: Option<String>,
    pub no_transform: bool,
    pub output_type: String,
    pub include_schema: bool,
    pub output: Option<PathBuf>,
    pub parallelism: usize,
    pub progress: bool,
    pub url: Option<String>,
}

/// Pair up `--root TABLE PREDICATE` values
fn parse_roots(values: &[String]) -> anyhow::Result<Vec<Root>> {
    if values.is_empty() || values.len() % 2 != 0 {
        bail!("--root takes a table and a predicate");
    }
    Ok(values
        .chunks(2)
        .map(|pair| Root::new(pair[0].as_str(), pair[1].as_str()))
        .collect())
}

/// Run `pg_dump` for one schema section, connecting like the dump does
fn pg_dump_section(url: Option<&str>, section: &str) -> anyhow::Result<Vec<u8>> {
    debug!("Dumping {} schema", section);
    let mut cmd = Command::new("pg_dump");
    cmd.args(["-B", "--no-acl", "--section", section]);
    if let Some(url) = url {
        cmd.arg(format!("--dbname={url}"));
    }
    let output = cmd
        .output()
        .context("Failed to execute pg_dump. Is PostgreSQL client installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("pg_dump --section {} failed: {}", section, stderr.trim());
    }
    Ok(output.stdout)
}

pub fn run(opts: DumpOptions) -> anyhow::Result<()> {
    let output_type: OutputType = opts.output_type.parse().map_err(anyhow::Error::msg)?;
    output_type.check_include_schema(opts.include_schema)?;
    let roots = parse_roots(&opts.roots)?;

    let db = connect(opts.url.clone())?;
    let schema = load_schema(opts.schema.as_deref(), Some(&db), opts.transform.as_deref())?;

    let config = DumpConfig::builder()
        .roots(roots)
        .parallelism(opts.parallelism)
        .transform(!opts.no_transform)
        .pepper(pepper(opts.pepper))
        .progress(opts.progress)
        .build()?;

    let out = create_output(opts.output.as_deref())?;
    let mut writer: Box<dyn SliceWriter> = match output_type {
        OutputType::Archive => Box::new(ArchiveWriter::new(out)?),
        OutputType::Sql if opts.include_schema => {
            info!("Dumping schema sections");
            let sections = SchemaSections {
                pre_data: pg_dump_section(opts.url.as_deref(), "pre-data")?,
                post_data: pg_dump_section(opts.url.as_deref(), "post-data")?,
            };
            Box::new(SqlWriter::new(out)?.with_schema(sections))
        }
        OutputType::Sql => Box::new(SqlWriter::new(out)?),
    };
    let stats = dump(&db, &schema, &config, writer.as_mut())?;

    print_stats(&stats, output_type);
    Ok(())
}

fn print_stats(stats: &DumpStats, output_type: OutputType) {
    eprintln!(
        "Dumped {} rows from {} tables in {} parts ({}{})",
        stats.rows,
        stats.tables,
        stats.parts,
        output_type,
        if stats.transformed { ", transformed" } else { "" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roots_pairs_values() {
        let values = vec![
            "public.parent".to_string(),
            "id = 1".to_string(),
            "child".to_string(),
            "id > 2".to_string(),
        ];
        let roots = parse_roots(&values).unwrap();
        assert_eq!(
            roots,
            vec![Root::new("public.parent", "id = 1"), Root::new("child", "id > 2")]
        );
        assert!(parse_roots(&values[..3]).is_err());
        assert!(parse_roots(&[]).is_err());
    }
}
