//! Container writers and readers for slices.
//!
//! A container receives named, ordered byte entries (the manifest, the
//! metadata and one entry per table part) and owns their final encoding:
//! - [`archive`]: gzip stream of framed entries, readable by `restore`
//! - [`sql`]: a SQL script of COPY blocks, loadable with `psql`

pub mod archive;
pub mod sql;

pub use archive::{ArchiveReader, ArchiveWriter};
pub use sql::{SchemaSections, SqlWriter};

use crate::error::{Result, SliceError};
use crate::manifest::{Manifest, PartFormat, SliceMetadata};
use crate::restore::LoadPlan;
use std::io::Read;

/// Output buffer for container streams
pub const WRITER_BUFFER_SIZE: usize = 256 * 1024;

/// Destination of a dump
pub trait SliceWriter: Send {
    /// Encoding recorded for parts in the manifest
    fn format(&self) -> PartFormat;

    /// Whether `finish` needs a load plan
    fn needs_load_plan(&self) -> bool {
        false
    }

    /// Store one part of COPY text of known length
    fn write_part(&mut self, table: &str, index: u32, len: u64, data: &mut dyn Read) -> Result<()>;

    /// Write the manifest and metadata and flush everything
    fn finish(
        &mut self,
        manifest: &Manifest,
        metadata: &SliceMetadata,
        plan: Option<&LoadPlan>,
    ) -> Result<()>;
}

/// Output container kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputType {
    /// Compressed archive, restorable with `restore`
    #[default]
    Archive,
    /// SQL script for psql
    Sql,
}

impl OutputType {
    /// Only SQL scripts can carry the `pg_dump` schema sections
    pub fn check_include_schema(self, include_schema: bool) -> Result<()> {
        if include_schema && self == OutputType::Archive {
            return Err(SliceError::Config(
                "archive output cannot include the schema, use the sql output type".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "archive" => Ok(Self::Archive),
            "sql" => Ok(Self::Sql),
            _ => Err(format!("Unknown output type: {}. Use: archive, sql", s)),
        }
    }
}

impl std::fmt::Display for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputType::Archive => write!(f, "archive"),
            OutputType::Sql => write!(f, "sql"),
        }
    }
}
