mod dump;
mod json_schema;
mod plan;
mod restore;
mod schema;
mod schema_filter;

use slice_db::db::{ConnectionConfig, Database, PostgresDatabase};
use slice_db::schema::{Schema, SchemaDocument};
use slice_db::schema::filter::DirectionOverride;
use slice_db::transform::{Pepper, TransformFile};
use anyhow::Context;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "slice-db")]
#[command(version)]
#[command(
    about = "Extract referentially-consistent, pseudonymized slices of a PostgreSQL database",
    long_about = None
)]
pub struct Cli {
    /// More log output on stderr (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Introspect tables and foreign keys into a schema document
    Schema {
        /// Connection URL (default: PGHOST, PGPORT, PGUSER, PGPASSWORD, PGDATABASE)
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        url: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Dump the rows reachable from the roots as a slice
    Dump {
        /// Root table and SQL predicate selecting its rows (repeatable)
        #[arg(
            long,
            num_args = 2,
            value_names = ["TABLE", "PREDICATE"],
            action = ArgAction::Append,
            required = true
        )]
        root: Vec<String>,

        /// Schema document (default: introspect the source)
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Transform rules file, applied on top of the schema's transforms
        #[arg(short, long)]
        transform: Option<PathBuf>,

        /// Pepper for transforms (default: random)
        #[arg(long, env = "SLICE_DB_PEPPER", hide_env_values = true)]
        pepper: Option<String>,

        /// Dump values unchanged
        #[arg(long)]
        no_transform: bool,

        /// Output container: archive, sql
        #[arg(long, default_value = "archive")]
        output_type: String,

        /// Wrap SQL output in the `pg_dump` pre-data and post-data sections
        #[arg(long)]
        include_schema: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Concurrent worker sessions
        #[arg(short = 'j', long, default_value = "1")]
        parallelism: usize,

        /// Show progress during dumping
        #[arg(short, long)]
        progress: bool,

        /// Connection URL (default: PGHOST, PGPORT, PGUSER, PGPASSWORD, PGDATABASE)
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        url: Option<String>,
    },

    /// Load a slice archive into the target database
    Restore {
        /// Slice archive (default: stdin)
        input: Option<PathBuf>,

        /// Schema document (default: introspect the target)
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Transform rules file for restore-time transformation
        #[arg(short, long, requires = "transform_pepper")]
        transform: Option<PathBuf>,

        /// Transform rows while loading with this pepper, unless the slice
        /// was transformed at dump time
        #[arg(long, env = "SLICE_DB_PEPPER", hide_env_values = true)]
        transform_pepper: Option<String>,

        /// Concurrent transactions (requires --no-single-transaction)
        #[arg(short = 'j', long, default_value = "1")]
        parallelism: usize,

        /// Commit each load unit separately
        #[arg(long)]
        no_single_transaction: bool,

        /// Show progress while reading the slice
        #[arg(short, long)]
        progress: bool,

        /// Connection URL (default: PGHOST, PGPORT, PGUSER, PGPASSWORD, PGDATABASE)
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        url: Option<String>,
    },

    /// Filter tables and adjust reference directions in a schema document
    SchemaFilter {
        /// Schema document (default: stdin)
        input: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep only tables matching these globs (schema.table or table)
        #[arg(long, value_delimiter = ',')]
        include: Vec<String>,

        /// Drop tables matching these globs
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Reference direction override: <reference-glob>=<both|none|forward|reverse>
        #[arg(long = "direction")]
        directions: Vec<DirectionOverride>,

        /// Emit JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Show the load order, deferred constraints and transaction phases
    Plan {
        /// Slice archive whose tables to plan (default: every schema table)
        slice: Option<PathBuf>,

        /// Schema document (default: introspect the database)
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Connection URL (default: PGHOST, PGPORT, PGUSER, PGPASSWORD, PGDATABASE)
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        url: Option<String>,
    },

    /// Print JSON Schemas of the documents slice-db reads and writes
    JsonSchema {
        /// Schema name (default: all)
        name: Option<String>,

        /// Write <name>.schema.json files into this directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Schema { url, output, json } => schema::run(url, output, json),
        Commands::Dump {
            root,
            schema,
            transform,
            pepper,
            no_transform,
            output_type,
            include_schema,
            output,
            parallelism,
            progress,
            url,
        } => dump::run(dump::DumpOptions {
            roots: root,
            schema,
            transform,
            pepper,
            no_transform,
            output_type,
            include_schema,
            output,
            parallelism,
            progress,
            url,
        }),
        Commands::Restore {
            input,
            schema,
            transform,
            transform_pepper,
            parallelism,
            no_single_transaction,
            progress,
            url,
        } => restore::run(restore::RestoreOptions {
            input,
            schema,
            transform,
            transform_pepper,
            parallelism,
            single_transaction: !no_single_transaction,
            progress,
            url,
        }),
        Commands::SchemaFilter {
            input,
            output,
            include,
            exclude,
            directions,
            json,
        } => schema_filter::run(input, output, include, exclude, directions, json),
        Commands::Plan {
            slice,
            schema,
            json,
            url,
        } => plan::run(slice, schema, json, url),
        Commands::JsonSchema { name, output_dir } => json_schema::run(name, output_dir),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "slice-db", &mut io::stdout());
            Ok(())
        }
    }
}

/// Database from a URL or the libpq environment variables
fn connect(url: Option<String>) -> anyhow::Result<PostgresDatabase> {
    Ok(PostgresDatabase::new(&ConnectionConfig::from_env(url))?)
}

/// Schema from a document file, otherwise introspected from `db`
fn load_schema<D: Database>(
    path: Option<&Path>,
    db: Option<&D>,
    transform: Option<&Path>,
) -> anyhow::Result<Schema> {
    let doc = match (path, db) {
        (Some(path), _) => SchemaDocument::load(path)?,
        (None, Some(db)) => db.introspect().context("schema introspection failed")?,
        (None, None) => anyhow::bail!("a schema document is required (--schema)"),
    };
    let mut schema = doc.resolve()?;
    if let Some(path) = transform {
        let assigned = TransformFile::load(path)?.apply(&mut schema)?;
        tracing::info!("Transform rules assigned {} columns", assigned);
    }
    Ok(schema)
}

fn pepper(value: Option<String>) -> Option<Pepper> {
    value.map(|v| Pepper::from(v.as_str()))
}

/// File or stdin
fn open_input(path: Option<&Path>) -> anyhow::Result<Box<dyn Read + Send>> {
    Ok(match path {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    })
}

/// File or stdout
fn create_output(path: Option<&Path>) -> anyhow::Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    })
}
