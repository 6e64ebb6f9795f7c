//! Deterministic, format-preserving pseudonymization of column values.
//!
//! Every replacement is a pure function of the pepper and the original
//! value. Equal inputs always produce equal outputs, so a primary key and the
//! foreign keys pointing at it stay joinable after transformation.
//!
//! Kinds:
//! - `alphanumeric`: per-character replacement keeping class and case
//! - `date_year`: date shifted by up to one year
//! - `geozip`: postal code with its first three digits kept
//! - `given_name` / `surname` / `person_name`: names from fixed lists
//! - `composite`: record literal with per-field transforms
//! - `constant`: fixed replacement value

mod composite;
pub mod config;
mod kinds;
mod names;

pub use composite::{format_record, parse_record};
pub use config::{TransformFile, TransformRule};
pub use kinds::NameStyle;

use crate::error::{Result, SliceError};
use crate::row::{encode_line, CopyLines, Row};
use crate::schema::TableSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{BufRead, Write};

/// Replacement kind assigned to a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformKind {
    /// Replace letters and digits, keeping class and case per position
    Alphanumeric,
    /// Shift a date by up to a year
    DateYear,
    /// Keep the first three digits of a postal code
    Geozip,
    GivenName,
    Surname,
    /// Given names followed by a surname
    PersonName,
    /// Record value with transforms for some of its fields
    Composite { fields: Vec<CompositeField> },
    /// Replace every non-NULL value with a fixed value
    Constant { value: String },
}

/// Transform for one field of a composite value, by 0-based position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CompositeField {
    pub index: usize,
    pub transform: TransformKind,
}

impl TransformKind {
    /// Validate the kind's parameters
    pub fn validate(&self) -> Result<()> {
        match self {
            TransformKind::Composite { fields } => {
                if fields.is_empty() {
                    return Err(SliceError::Config(
                        "composite transform requires at least one field".to_string(),
                    ));
                }
                let mut seen = Vec::with_capacity(fields.len());
                for field in fields {
                    if seen.contains(&field.index) {
                        return Err(SliceError::Config(format!(
                            "composite transform lists field {} twice",
                            field.index
                        )));
                    }
                    seen.push(field.index);
                    field.transform.validate()?;
                }
                Ok(())
            }
            TransformKind::Constant { value } if value.is_empty() => Err(SliceError::Config(
                "constant transform requires a non-empty value".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Name used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            TransformKind::Alphanumeric => "alphanumeric",
            TransformKind::DateYear => "date_year",
            TransformKind::Geozip => "geozip",
            TransformKind::GivenName => "given_name",
            TransformKind::Surname => "surname",
            TransformKind::PersonName => "person_name",
            TransformKind::Composite { .. } => "composite",
            TransformKind::Constant { .. } => "constant",
        }
    }

    /// Replace one non-NULL value
    pub fn apply(&self, value: &str, pepper: &Pepper) -> std::result::Result<String, ShapeError> {
        match self {
            TransformKind::Alphanumeric => Ok(kinds::alphanumeric(value, pepper)),
            TransformKind::DateYear => kinds::date_year(value, pepper),
            TransformKind::Geozip => kinds::geozip(value, pepper),
            TransformKind::GivenName => Ok(kinds::name(value, NameStyle::Given, pepper)),
            TransformKind::Surname => Ok(kinds::name(value, NameStyle::Surname, pepper)),
            TransformKind::PersonName => Ok(kinds::name(value, NameStyle::Person, pepper)),
            TransformKind::Composite { fields } => {
                let mut values = parse_record(value)?;
                let n = values.len();
                for field in fields {
                    let slot = values.get_mut(field.index).ok_or_else(|| {
                        ShapeError::new(format!("record has {n} fields, no field {}", field.index))
                    })?;
                    if let Some(inner) = slot {
                        let replaced = field.transform.apply(inner, pepper).map_err(|e| {
                            ShapeError::new(format!("field {}: {}", field.index, e.0))
                        })?;
                        *inner = replaced;
                    }
                }
                Ok(format_record(&values))
            }
            TransformKind::Constant { value } => Ok(value.clone()),
        }
    }
}

/// A value that does not have the shape its transform expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeError(pub String);

impl ShapeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret key scoping all replacements of one slice
#[derive(Clone, PartialEq, Eq)]
pub struct Pepper(Vec<u8>);

impl Pepper {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// 32 random bytes
    pub fn random() -> Self {
        Self(rand::random::<[u8; 32]>().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex SHA-256 fingerprint, safe to persist alongside a slice
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"slice-db pepper fingerprint\0");
        hasher.update(&self.0);
        hex::encode(hasher.finalize())
    }
}

impl From<&str> for Pepper {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for Pepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pepper({})", &self.fingerprint()[..12])
    }
}

/// Deterministic byte stream derived from the pepper and an input value.
///
/// SHA-256 in counter mode over a key bound to the pepper, a domain label
/// and the value.
pub struct KeyStream {
    key: [u8; 32],
    counter: u64,
    block: [u8; 32],
    pos: usize,
}

impl KeyStream {
    pub fn new(pepper: &Pepper, domain: &str, value: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [pepper.as_bytes(), domain.as_bytes(), value.as_bytes()] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self {
            key: hasher.finalize().into(),
            counter: 0,
            block: [0; 32],
            pos: 32,
        }
    }

    fn next_byte(&mut self) -> u8 {
        if self.pos == self.block.len() {
            let mut hasher = Sha256::new();
            hasher.update(self.key);
            hasher.update(self.counter.to_le_bytes());
            self.block = hasher.finalize().into();
            self.counter += 1;
            self.pos = 0;
        }
        let b = self.block[self.pos];
        self.pos += 1;
        b
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        for b in &mut bytes {
            *b = self.next_byte();
        }
        u64::from_le_bytes(bytes)
    }

    /// Uniform value in `0..n`; `n` must be non-zero
    pub fn below(&mut self, n: u64) -> u64 {
        let zone = u64::MAX - (u64::MAX % n);
        loop {
            let x = self.next_u64();
            if x < zone {
                return x % n;
            }
        }
    }
}

/// Transform one row of `table`
pub fn transform(row: &Row, table: &TableSchema, pepper: &Pepper) -> Result<Row> {
    let mut out = row.clone();
    TransformPipeline::new(table, pepper).apply_row(&mut out, 1)?;
    Ok(out)
}

/// Applies a table's column transforms to rows or to a COPY stream
pub struct TransformPipeline<'a> {
    table: &'a TableSchema,
    pepper: &'a Pepper,
    columns: Vec<(usize, &'a TransformKind)>,
}

impl<'a> TransformPipeline<'a> {
    pub fn new(table: &'a TableSchema, pepper: &'a Pepper) -> Self {
        let columns = table
            .columns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.transform.as_ref().map(|k| (i, k)))
            .collect();
        Self {
            table,
            pepper,
            columns,
        }
    }

    /// No column of the table is transformed
    pub fn is_identity(&self) -> bool {
        self.columns.is_empty()
    }

    /// Transform a row in place. `row_number` is only used in errors.
    pub fn apply_row(&self, row: &mut Row, row_number: u64) -> Result<()> {
        let n = row.len();
        for &(i, kind) in &self.columns {
            let column = &self.table.columns[i].name;
            let slot = row.get_mut(i).ok_or_else(|| SliceError::Transformation {
                table: self.table.qualified_name(),
                column: column.clone(),
                row: row_number,
                message: format!("row has only {n} fields"),
            })?;
            if let Some(value) = slot {
                *value = kind.apply(value, self.pepper).map_err(|e| SliceError::Transformation {
                    table: self.table.qualified_name(),
                    column: column.clone(),
                    row: row_number,
                    message: e.0,
                })?;
            }
        }
        Ok(())
    }

    /// Stream COPY text from `input` to `output`, returning the row count
    pub fn run<R: BufRead, W: Write>(&self, input: R, output: &mut W) -> Result<u64> {
        let mut lines = CopyLines::new(input);
        let mut buf = Vec::with_capacity(1024);
        let mut rows = 0u64;

        while let Some(line) = lines.next_line()? {
            rows += 1;
            buf.clear();
            if self.is_identity() {
                buf.extend_from_slice(line);
                buf.push(b'\n');
            } else {
                let mut row = crate::row::decode_line(line).map_err(|e| {
                    SliceError::Transformation {
                        table: self.table.qualified_name(),
                        column: String::new(),
                        row: rows,
                        message: e.to_string(),
                    }
                })?;
                self.apply_row(&mut row, rows)?;
                encode_line(&row, &mut buf);
            }
            output.write_all(&buf)?;
        }

        Ok(rows)
    }
}
