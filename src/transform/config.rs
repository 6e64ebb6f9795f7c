//! Transform rules file.
//!
//! ```yaml
//! rules:
//!   - column: "public.users.email"
//!     kind: alphanumeric
//!   - column: "*.zip*"
//!     kind: geozip
//!   - column: "users.full_name"
//!     kind: person_name
//! ```
//!
//! A pattern is a glob matched against `schema.table.column`, `table.column`
//! and the bare column name. Rules are tried in order; the first match wins
//! and replaces any transform declared inline in the schema document.

use super::TransformKind;
use crate::error::{Result, SliceError};
use crate::schema::Schema;
use glob::Pattern;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TransformFile {
    #[serde(default)]
    pub rules: Vec<TransformRule>,
}

/// A column pattern and the transform it assigns
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransformRule {
    pub column: String,
    #[serde(flatten)]
    pub kind: TransformKind,
}

struct CompiledRule<'a> {
    pattern: Pattern,
    rule: &'a TransformRule,
    matched: usize,
}

impl TransformFile {
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml_ng::from_str(content).map_err(|e| SliceError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| match e {
            SliceError::Config(msg) => SliceError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Assign transforms to matching columns, returning how many were set
    pub fn apply(&self, schema: &mut Schema) -> Result<usize> {
        let mut compiled = self
            .rules
            .iter()
            .map(|rule| {
                if rule.column.is_empty() {
                    return Err(SliceError::Config(
                        "transform rule column pattern cannot be empty".to_string(),
                    ));
                }
                rule.kind.validate()?;
                let pattern = Pattern::new(&rule.column).map_err(|e| {
                    SliceError::Config(format!("invalid column pattern '{}': {}", rule.column, e))
                })?;
                Ok(CompiledRule {
                    pattern,
                    rule,
                    matched: 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut assigned = 0;
        for table in &mut schema.table_schemas {
            for column in &mut table.columns {
                let qualified = format!("{}.{}.{}", table.schema, table.name, column.name);
                let short = format!("{}.{}", table.name, column.name);
                let hit = compiled.iter_mut().find(|c| {
                    c.pattern.matches(&qualified)
                        || c.pattern.matches(&short)
                        || c.pattern.matches(&column.name)
                });
                if let Some(c) = hit {
                    debug!("Transform {} for {}", c.rule.kind.name(), qualified);
                    c.matched += 1;
                    column.transform = Some(c.rule.kind.clone());
                    assigned += 1;
                }
            }
        }

        if let Some(unused) = compiled.iter().find(|c| c.matched == 0) {
            return Err(SliceError::Config(format!(
                "transform rule '{}' matches no column",
                unused.rule.column
            )));
        }

        Ok(assigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDocument;

    fn schema() -> Schema {
        SchemaDocument::parse(
            r#"
tables:
  - schema: public
    name: users
    columns:
      - { name: id, type: integer }
      - { name: email, type: text, transform: { kind: constant, value: x } }
      - { name: zip_code, type: text }
  - schema: crm
    name: contacts
    columns:
      - { name: id, type: integer }
      - { name: email, type: text }
"#,
        )
        .unwrap()
        .resolve()
        .unwrap()
    }

    #[test]
    fn test_first_match_wins_and_overrides_inline() {
        let file = TransformFile::parse(
            r#"
rules:
  - column: "public.users.email"
    kind: alphanumeric
  - column: "*.email"
    kind: surname
  - column: "zip*"
    kind: geozip
"#,
        )
        .unwrap();
        let mut schema = schema();
        assert_eq!(file.apply(&mut schema).unwrap(), 3);

        let users = schema.get_table("public.users").unwrap();
        assert_eq!(
            users.get_column("email").unwrap().transform,
            Some(TransformKind::Alphanumeric)
        );
        assert_eq!(
            users.get_column("zip_code").unwrap().transform,
            Some(TransformKind::Geozip)
        );
        let contacts = schema.get_table("crm.contacts").unwrap();
        assert_eq!(
            contacts.get_column("email").unwrap().transform,
            Some(TransformKind::Surname)
        );
    }

    #[test]
    fn test_unmatched_rule_is_error() {
        let file = TransformFile::parse("rules:\n  - { column: \"orders.ssn\", kind: alphanumeric }\n")
            .unwrap();
        let err = file.apply(&mut schema()).unwrap_err();
        assert!(err.to_string().contains("orders.ssn"));
    }

    #[test]
    fn test_invalid_kind_rejected() {
        let file = TransformFile::parse("rules:\n  - { column: email, kind: constant, value: \"\" }\n")
            .unwrap();
        assert!(matches!(file.apply(&mut schema()), Err(SliceError::Config(_))));
    }
}
