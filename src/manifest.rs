//! Slice manifest and metadata.
//!
//! The manifest lists every table part of a slice with its row count. It is
//! written once, after the traversal finished, and read once by restore.

use crate::error::{Result, SliceError};
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const MANIFEST_VERSION: u32 = 1;

pub const MANIFEST_ENTRY: &str = "manifest.json";
pub const METADATA_ENTRY: &str = "metadata.json";

/// How a part's bytes are encoded inside the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PartFormat {
    /// COPY text stored as an archive entry
    ArchiveEntry,
    /// COPY block inside a SQL script
    SqlBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ManifestPart {
    pub index: u32,
    pub row_count: u64,
    pub byte_count: u64,
    pub format: PartFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ManifestTable {
    /// `schema.name`
    pub table: String,
    /// Column order of the part data
    pub columns: Vec<String>,
    pub parts: Vec<ManifestPart>,
}

impl ManifestTable {
    pub fn row_count(&self) -> u64 {
        self.parts.iter().map(|p| p.row_count).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub version: u32,
    pub tables: Vec<ManifestTable>,
}

impl Manifest {
    pub fn new(tables: Vec<ManifestTable>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            tables,
        }
    }

    pub fn row_count(&self) -> u64 {
        self.tables.iter().map(|t| t.row_count()).sum()
    }

    pub fn table(&self, name: &str) -> Option<&ManifestTable> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Check version, unique tables and unique part indexes
    pub fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(SliceError::Manifest(format!(
                "unsupported manifest version {} (expected {})",
                self.version, MANIFEST_VERSION
            )));
        }
        for (i, table) in self.tables.iter().enumerate() {
            if self.tables[..i].iter().any(|t| t.table == table.table) {
                return Err(SliceError::Manifest(format!(
                    "table {} listed twice",
                    table.table
                )));
            }
            for (j, part) in table.parts.iter().enumerate() {
                if table.parts[..j].iter().any(|p| p.index == part.index) {
                    return Err(SliceError::Manifest(format!(
                        "part {} of {} listed twice",
                        part.index, table.table
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| SliceError::Manifest(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let manifest: Self =
            serde_json::from_slice(data).map_err(|e| SliceError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Container entry name of a part
pub fn part_entry_name(table: &str, index: u32) -> String {
    format!("data/{table}/{index}.tsv")
}

/// Root of a dump, as recorded in metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RootRecord {
    pub table: String,
    pub predicate: String,
}

/// Facts about how a slice was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SliceMetadata {
    pub version: u32,
    /// RFC 3339 creation time
    pub created_at: String,
    pub roots: Vec<RootRecord>,
    /// Whether column transforms were applied at dump time
    pub transformed: bool,
    /// SHA-256 fingerprint of the pepper used, never the pepper itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pepper_fingerprint: Option<String>,
}

impl SliceMetadata {
    pub fn new(roots: Vec<RootRecord>, pepper_fingerprint: Option<String>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            created_at: Utc::now().to_rfc3339(),
            roots,
            transformed: pepper_fingerprint.is_some(),
            pepper_fingerprint,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| SliceError::Manifest(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| SliceError::Manifest(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(index: u32, rows: u64) -> ManifestPart {
        ManifestPart {
            index,
            row_count: rows,
            byte_count: rows * 10,
            format: PartFormat::ArchiveEntry,
        }
    }

    #[test]
    fn test_row_counts() {
        let manifest = Manifest::new(vec![
            ManifestTable {
                table: "public.parent".to_string(),
                columns: vec!["id".to_string()],
                parts: vec![part(0, 1)],
            },
            ManifestTable {
                table: "public.child".to_string(),
                columns: vec!["id".to_string(), "parent_id".to_string()],
                parts: vec![part(0, 2), part(1, 3)],
            },
        ]);
        assert_eq!(manifest.row_count(), 6);
        assert_eq!(manifest.table("public.child").unwrap().row_count(), 5);

        let parsed = Manifest::from_json(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_duplicate_part_rejected() {
        let manifest = Manifest::new(vec![ManifestTable {
            table: "public.t".to_string(),
            columns: vec![],
            parts: vec![part(0, 1), part(0, 1)],
        }]);
        assert!(matches!(manifest.validate(), Err(SliceError::Manifest(_))));
    }

    #[test]
    fn test_metadata_transformed_follows_fingerprint() {
        let meta = SliceMetadata::new(vec![], Some("abc123".to_string()));
        assert!(meta.transformed);
        let json = String::from_utf8(meta.to_json().unwrap()).unwrap();
        assert!(json.contains("abc123"));
        assert!(SliceMetadata::new(vec![], None).pepper_fingerprint.is_none());
    }
}
