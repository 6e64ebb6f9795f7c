//! Table filtering for schema documents (`schema-filter`).
//!
//! Patterns are globs matched against the qualified `schema.table` name and
//! against the bare table name. References whose endpoints were removed are
//! dropped with the tables. Direction overrides restrict which way the
//! traversal follows individual references.

use super::{Direction, SchemaDocument};
use crate::error::{Result, SliceError};
use glob::Pattern;

/// Include/exclude patterns for tables
#[derive(Debug, Default)]
pub struct TableFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

/// What a filter run removed
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub tables_removed: Vec<String>,
    pub references_removed: Vec<String>,
}

impl TableFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Whether a table is kept. An empty include list keeps everything not excluded.
    pub fn keeps(&self, schema: &str, name: &str) -> bool {
        let qualified = format!("{schema}.{name}");
        let matches = |p: &Pattern| p.matches(&qualified) || p.matches(name);
        let included = self.include.is_empty() || self.include.iter().any(matches);
        included && !self.exclude.iter().any(matches)
    }

    /// Filter a document in place
    pub fn apply(&self, doc: &mut SchemaDocument) -> FilterStats {
        let mut stats = FilterStats::default();

        doc.tables.retain(|t| {
            let keep = self.keeps(&t.schema, &t.name);
            if !keep {
                stats.tables_removed.push(t.qualified_name());
            }
            keep
        });

        let kept: Vec<String> = doc.tables.iter().map(|t| t.qualified_name()).collect();
        doc.references.retain(|r| {
            let keep = kept.contains(&r.table) && kept.contains(&r.reference_table);
            if !keep {
                stats.references_removed.push(r.name.clone());
            }
            keep
        });

        stats
    }
}

/// `<reference>=<directions>` where directions is `both`, `none`,
/// `forward` or `reverse`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectionOverride {
    /// Glob over reference names
    pub reference: String,
    pub directions: Vec<Direction>,
}

impl std::str::FromStr for DirectionOverride {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (reference, value) = s
            .split_once('=')
            .ok_or_else(|| format!("Invalid direction override: {}. Use: <reference>=<directions>", s))?;
        let directions = match value.to_lowercase().as_str() {
            "both" => vec![Direction::Forward, Direction::Reverse],
            "none" => vec![],
            "forward" => vec![Direction::Forward],
            "reverse" => vec![Direction::Reverse],
            _ => {
                return Err(format!(
                    "Unknown directions: {}. Use: both, none, forward, reverse",
                    value
                ))
            }
        };
        Ok(Self {
            reference: reference.to_string(),
            directions,
        })
    }
}

/// Apply direction overrides, returning how many references changed.
/// An override matching no reference is an error.
pub fn override_directions(doc: &mut SchemaDocument, overrides: &[DirectionOverride]) -> Result<usize> {
    let mut changed = 0;
    for o in overrides {
        let pattern = Pattern::new(&o.reference).map_err(|e| {
            SliceError::Config(format!("invalid reference pattern '{}': {}", o.reference, e))
        })?;
        let mut matched = false;
        for reference in doc.references.iter_mut().filter(|r| pattern.matches(&r.name)) {
            matched = true;
            if reference.directions != o.directions {
                reference.directions = o.directions.clone();
                changed += 1;
            }
        }
        if !matched {
            return Err(SliceError::Config(format!(
                "direction override '{}' matches no reference",
                o.reference
            )));
        }
    }
    Ok(changed)
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| SliceError::Config(format!("invalid table pattern '{p}': {e}")))
        })
        .collect()
}
