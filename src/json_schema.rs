//! JSON Schema generation for documents and JSON output.
//!
//! Schemas are generated with schemars and exported via the `json-schema`
//! subcommand, so editors and CI can validate schema documents, transform
//! files, slice manifests and `plan --json` output.

use schemars::{schema_for, Schema};
use std::collections::BTreeMap;

/// Returns every published schema, keyed by name.
/// Uses BTreeMap for deterministic ordering (important for diffable output).
pub fn all_schemas() -> BTreeMap<&'static str, Schema> {
    let mut schemas = BTreeMap::new();

    // schema document read by dump, restore, plan and schema-filter
    schemas.insert("schema", schema_for!(crate::schema::SchemaDocument));

    // --transform rules file
    schemas.insert("transform", schema_for!(crate::transform::TransformFile));

    // manifest.json and metadata.json inside a slice
    schemas.insert("manifest", schema_for!(crate::manifest::Manifest));
    schemas.insert("metadata", schema_for!(crate::manifest::SliceMetadata));

    // plan --json
    schemas.insert("plan", schema_for!(crate::restore::LoadPlan));

    schemas
}

/// Generate a single schema by name.
pub fn get_schema(name: &str) -> Option<Schema> {
    all_schemas().remove(name)
}

/// List all available schema names.
pub fn schema_names() -> Vec<&'static str> {
    all_schemas().keys().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_are_sorted() {
        assert_eq!(
            schema_names(),
            vec!["manifest", "metadata", "plan", "schema", "transform"]
        );
        assert!(get_schema("schema").is_some());
        assert!(get_schema("split").is_none());
    }
}
