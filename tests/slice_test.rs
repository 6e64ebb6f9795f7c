//! Integration tests for relationship traversal and dumping, run against
//! the in-memory backend.

use slice_db::container::{ArchiveReader, ArchiveWriter, SqlWriter};
use slice_db::db::{MemoryDatabase, RowId};
use slice_db::error::SliceError;
use slice_db::row::Row;
use slice_db::schema::{Schema, SchemaDocument};
use slice_db::slice::{dump, traverse, CancelToken, DumpConfig, Root};
use std::io::{Cursor, Read};

const PARENT_CHILD: &str = r#"
tables:
  - schema: public
    name: parent
    columns:
      - { name: id, type: integer, nullable: false }
    primary_key: [id]
  - schema: public
    name: child
    columns:
      - { name: id, type: integer, nullable: false }
      - { name: parent_id, type: integer }
    primary_key: [id]
  - schema: public
    name: settings
    columns:
      - { name: key, type: text, nullable: false }
      - { name: value, type: text }
    primary_key: [key]
references:
  - name: child_parent_id_fkey
    table: public.child
    columns: [parent_id]
    reference_table: public.parent
    reference_columns: [id]
"#;

fn row(values: &[Option<&str>]) -> Row {
    values.iter().map(|v| v.map(str::to_string)).collect()
}

fn parent_child_db() -> MemoryDatabase {
    let db = MemoryDatabase::from_document(&SchemaDocument::parse(PARENT_CHILD).unwrap()).unwrap();
    db.insert("public.parent", vec![row(&[Some("1")]), row(&[Some("2")])])
        .unwrap();
    db.insert(
        "public.child",
        vec![
            row(&[Some("1"), Some("1")]),
            row(&[Some("2"), Some("1")]),
            row(&[Some("3"), Some("2")]),
        ],
    )
    .unwrap();
    db.insert(
        "public.settings",
        vec![row(&[Some("theme"), Some("dark")]), row(&[Some("lang"), None])],
    )
    .unwrap();
    db
}

fn schema(db: &MemoryDatabase) -> Schema {
    db.schema().clone()
}

/// Primary key values of the rows claimed in a table, sorted
fn claimed_ids(db: &MemoryDatabase, table: &str, ids: &[RowId]) -> Vec<String> {
    let rows = db.rows(table).unwrap();
    let mut values: Vec<String> = ids
        .iter()
        .map(|&id| rows[id as usize - 1][0].clone().unwrap())
        .collect();
    values.sort();
    values
}

mod traversal {
    use super::*;

    #[test]
    fn test_parent_root_pulls_its_children_only() {
        let db = parent_child_db();
        let schema = schema(&db);
        let roots = vec![Root::new("public.parent", "id = 1")];
        let rows = traverse(&db, &schema, &roots, 1, &CancelToken::new()).unwrap();

        let sorted = rows.to_sorted();
        let parent = schema.get_table_id("public.parent").unwrap();
        let child = schema.get_table_id("public.child").unwrap();
        let settings = schema.get_table_id("public.settings").unwrap();

        assert_eq!(claimed_ids(&db, "public.parent", &sorted[parent.0 as usize]), vec!["1"]);
        assert_eq!(
            claimed_ids(&db, "public.child", &sorted[child.0 as usize]),
            vec!["1", "2"]
        );
        assert!(sorted[settings.0 as usize].is_empty());
        assert_eq!(rows.total(), 3);
        assert_eq!(db.open_snapshots(), 0);
    }

    #[test]
    fn test_child_root_pulls_parent_and_siblings() {
        let db = parent_child_db();
        let schema = schema(&db);
        let roots = vec![Root::new("child", "id = 2")];
        let rows = traverse(&db, &schema, &roots, 2, &CancelToken::new()).unwrap();

        let sorted = rows.to_sorted();
        let child = schema.get_table_id("public.child").unwrap();
        assert_eq!(
            claimed_ids(&db, "public.child", &sorted[child.0 as usize]),
            vec!["1", "2"]
        );
        assert_eq!(rows.total(), 3);
    }

    #[test]
    fn test_sink_table_adds_only_matched_rows() {
        let db = parent_child_db();
        let schema = schema(&db);
        let roots = vec![Root::new("settings", "key = 'theme'")];
        let rows = traverse(&db, &schema, &roots, 1, &CancelToken::new()).unwrap();
        assert_eq!(rows.total(), 1);
    }

    #[test]
    fn test_multiple_roots_share_one_traversal() {
        let db = parent_child_db();
        let schema = schema(&db);
        let roots = vec![
            Root::new("parent", "id = 2"),
            Root::new("settings", "value IS NULL"),
        ];
        let rows = traverse(&db, &schema, &roots, 3, &CancelToken::new()).unwrap();
        // parent 2, child 3, settings 'lang'
        assert_eq!(rows.total(), 3);
    }

    #[test]
    fn test_unknown_root_table() {
        let db = parent_child_db();
        let schema = schema(&db);
        let roots = vec![Root::new("public.missing", "true")];
        let err = traverse(&db, &schema, &roots, 1, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, SliceError::Config(_)));
        assert!(err.to_string().contains("public.missing"));
    }

    #[test]
    fn test_result_does_not_depend_on_parallelism() {
        let db = super::graph_db();
        let schema = schema(&db);
        let roots = vec![Root::new("customer", "id = 1")];

        let expected = traverse(&db, &schema, &roots, 1, &CancelToken::new())
            .unwrap()
            .to_sorted();
        for parallelism in [2, 3, 8] {
            for _ in 0..5 {
                let rows = traverse(&db, &schema, &roots, parallelism, &CancelToken::new()).unwrap();
                assert_eq!(rows.to_sorted(), expected, "parallelism {parallelism}");
            }
        }
    }

    #[test]
    fn test_result_is_a_fixed_point() {
        let db = super::graph_db();
        let schema = schema(&db);
        let first = traverse(
            &db,
            &schema,
            &[Root::new("customer", "id = 1")],
            2,
            &CancelToken::new(),
        )
        .unwrap()
        .to_sorted();

        // Re-root at every included row
        let mut roots = Vec::new();
        for table in schema.iter() {
            let ids = claimed_ids(&db, &table.qualified_name(), &first[table.id.0 as usize]);
            if !ids.is_empty() {
                roots.push(Root::new(
                    table.qualified_name(),
                    format!("id IN ({})", ids.join(", ")),
                ));
            }
        }
        let second = traverse(&db, &schema, &roots, 2, &CancelToken::new())
            .unwrap()
            .to_sorted();
        assert_eq!(second, first);
    }

    #[test]
    fn test_self_reference_chain_is_followed_to_the_end() {
        let doc = SchemaDocument::parse(
            r#"
tables:
  - schema: public
    name: node
    columns:
      - { name: id, type: integer, nullable: false }
      - { name: next_id, type: integer }
    primary_key: [id]
references:
  - { name: node_next_id_fkey, table: public.node, columns: [next_id], reference_table: public.node, reference_columns: [id] }
"#,
        )
        .unwrap();
        let db = MemoryDatabase::from_document(&doc).unwrap();
        // 1 -> 2 -> 3 -> 4 -> 5, plus an unrelated node
        db.insert(
            "public.node",
            vec![
                row(&[Some("1"), Some("2")]),
                row(&[Some("2"), Some("3")]),
                row(&[Some("3"), Some("4")]),
                row(&[Some("4"), Some("5")]),
                row(&[Some("5"), None]),
                row(&[Some("6"), None]),
            ],
        )
        .unwrap();
        let schema = schema(&db);

        let rows = traverse(&db, &schema, &[Root::new("node", "id = 5")], 2, &CancelToken::new())
            .unwrap();
        assert_eq!(
            claimed_ids(&db, "public.node", &rows.to_sorted()[0]),
            vec!["1", "2", "3", "4", "5"]
        );
    }

    #[test]
    fn test_reference_limited_to_forward() {
        let mut doc = SchemaDocument::parse(PARENT_CHILD).unwrap();
        doc.references[0].directions = vec![slice_db::schema::Direction::Forward];
        let db = MemoryDatabase::from_document(&doc).unwrap();
        db.insert("public.parent", vec![row(&[Some("1")])]).unwrap();
        db.insert(
            "public.child",
            vec![row(&[Some("1"), Some("1")]), row(&[Some("2"), Some("1")])],
        )
        .unwrap();
        let schema = schema(&db);

        // Parent rows no longer pull children
        let rows = traverse(&db, &schema, &[Root::new("parent", "true")], 1, &CancelToken::new())
            .unwrap();
        assert_eq!(rows.total(), 1);

        // Children still pull their parent
        let rows = traverse(&db, &schema, &[Root::new("child", "id = 1")], 1, &CancelToken::new())
            .unwrap();
        assert_eq!(rows.total(), 2);
    }

    #[test]
    fn test_query_failure_fails_the_traversal() {
        let db = parent_child_db();
        db.fail_queries_on("public.child").unwrap();
        let schema = schema(&db);

        let err = traverse(&db, &schema, &[Root::new("parent", "id = 1")], 2, &CancelToken::new())
            .unwrap_err();
        match err {
            SliceError::TraversalQuery { table, via, .. } => {
                assert_eq!(table, "public.child");
                assert_eq!(via.as_deref(), Some("public.child_parent_id_fkey"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(db.open_snapshots(), 0);
    }
}

/// customer <- orders -> product, orders <- order_line, customer <- address
fn graph_db() -> MemoryDatabase {
    let doc = SchemaDocument::parse(
        r#"
tables:
  - { schema: public, name: customer, columns: [{ name: id, type: integer }], primary_key: [id] }
  - { schema: public, name: address, columns: [{ name: id, type: integer }, { name: customer_id, type: integer }], primary_key: [id] }
  - { schema: public, name: product, columns: [{ name: id, type: integer }], primary_key: [id] }
  - { schema: public, name: orders, columns: [{ name: id, type: integer }, { name: customer_id, type: integer }, { name: product_id, type: integer }], primary_key: [id] }
  - { schema: public, name: order_line, columns: [{ name: id, type: integer }, { name: order_id, type: integer }], primary_key: [id] }
references:
  - { name: address_customer_id_fkey, table: public.address, columns: [customer_id], reference_table: public.customer, reference_columns: [id] }
  - { name: orders_customer_id_fkey, table: public.orders, columns: [customer_id], reference_table: public.customer, reference_columns: [id] }
  - { name: orders_product_id_fkey, table: public.orders, columns: [product_id], reference_table: public.product, reference_columns: [id] }
  - { name: order_line_order_id_fkey, table: public.order_line, columns: [order_id], reference_table: public.orders, reference_columns: [id] }
"#,
    )
    .unwrap();
    let db = MemoryDatabase::from_document(&doc).unwrap();

    let ids = |n: usize| -> Vec<Row> { (1..=n).map(|i| row(&[Some(&i.to_string())])).collect() };
    db.insert("public.customer", ids(4)).unwrap();
    db.insert("public.product", ids(6)).unwrap();
    let pairs = |pairs: &[(u32, u32)]| -> Vec<Row> {
        pairs
            .iter()
            .map(|(a, b)| vec![Some(a.to_string()), Some(b.to_string())])
            .collect()
    };
    db.insert("public.address", pairs(&[(1, 1), (2, 1), (3, 2), (4, 3)]))
        .unwrap();
    db.insert(
        "public.orders",
        (1..=12u32)
            .map(|i| {
                vec![
                    Some(i.to_string()),
                    Some((i % 4 + 1).to_string()),
                    Some((i % 6 + 1).to_string()),
                ]
            })
            .collect(),
    )
    .unwrap();
    db.insert(
        "public.order_line",
        pairs(&(1..=30u32).map(|i| (i, i % 12 + 1)).collect::<Vec<_>>()),
    )
    .unwrap();
    db
}

mod dumping {
    use super::*;

    #[test]
    fn test_archive_contains_manifest_and_parts() {
        let db = parent_child_db();
        let schema = schema(&db);
        let config = DumpConfig::builder()
            .root("parent", "id = 1")
            .parallelism(2)
            .build()
            .unwrap();

        let mut buf = Vec::new();
        let mut writer = ArchiveWriter::new(&mut buf).unwrap();
        let stats = dump(&db, &schema, &config, &mut writer).unwrap();
        drop(writer);
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.tables, 2);
        assert!(!stats.transformed);

        let slice = ArchiveReader::open(Cursor::new(buf)).unwrap();
        let manifest = slice.manifest();
        assert_eq!(manifest.row_count(), 3);
        let child = manifest.table("public.child").unwrap();
        assert_eq!(child.columns, vec!["id", "parent_id"]);
        assert_eq!(child.row_count(), 2);
        assert!(manifest.table("public.settings").is_none());

        let mut data = String::new();
        slice.open_table(child).unwrap().read_to_string(&mut data).unwrap();
        let mut lines: Vec<&str> = data.lines().collect();
        lines.sort();
        assert_eq!(lines, vec!["1\t1", "2\t1"]);

        assert_eq!(slice.metadata().roots.len(), 1);
        assert!(slice.metadata().pepper_fingerprint.is_none());
    }

    #[test]
    fn test_transforms_apply_with_a_pepper() {
        let mut doc = SchemaDocument::parse(PARENT_CHILD).unwrap();
        doc.tables[2].columns[1].transform = Some(slice_db::transform::TransformKind::Alphanumeric);
        let db = MemoryDatabase::from_document(&doc).unwrap();
        db.insert("public.settings", vec![row(&[Some("theme"), Some("dark")])])
            .unwrap();
        let schema = schema(&db);

        let run = |pepper: &str| {
            let config = DumpConfig::builder()
                .root("settings", "true")
                .pepper(Some(pepper.into()))
                .build()
                .unwrap();
            let mut buf = Vec::new();
            let mut writer = ArchiveWriter::new(&mut buf).unwrap();
            let stats = dump(&db, &schema, &config, &mut writer).unwrap();
            assert!(stats.transformed);
            drop(writer);

            let slice = ArchiveReader::open(Cursor::new(buf)).unwrap();
            assert!(slice.metadata().transformed);
            let table = slice.manifest().table("public.settings").unwrap().clone();
            let mut data = String::new();
            slice.open_table(&table).unwrap().read_to_string(&mut data).unwrap();
            data
        };

        let first = run("secret");
        assert_eq!(first, run("secret"));
        assert_ne!(first, run("other"));
        assert!(first.starts_with("theme\t"));
        assert_ne!(first, "theme\tdark\n");
        assert_eq!(first.trim_end().len(), "theme\tdark".len());
    }

    #[test]
    fn test_no_transform_keeps_values() {
        let mut doc = SchemaDocument::parse(PARENT_CHILD).unwrap();
        doc.tables[2].columns[1].transform = Some(slice_db::transform::TransformKind::Alphanumeric);
        let db = MemoryDatabase::from_document(&doc).unwrap();
        db.insert("public.settings", vec![row(&[Some("theme"), Some("dark")])])
            .unwrap();
        let schema = schema(&db);

        let config = DumpConfig::builder()
            .root("settings", "true")
            .transform(false)
            .build()
            .unwrap();
        let mut buf = Vec::new();
        let mut writer = ArchiveWriter::new(&mut buf).unwrap();
        let stats = dump(&db, &schema, &config, &mut writer).unwrap();
        drop(writer);
        assert!(!stats.transformed);

        let slice = ArchiveReader::open(Cursor::new(buf)).unwrap();
        let table = slice.manifest().table("public.settings").unwrap().clone();
        let mut data = String::new();
        slice.open_table(&table).unwrap().read_to_string(&mut data).unwrap();
        assert_eq!(data, "theme\tdark\n");
    }

    #[test]
    fn test_failed_dump_writes_no_manifest() {
        let db = parent_child_db();
        db.fail_queries_on("public.child").unwrap();
        let schema = schema(&db);
        let config = DumpConfig::builder().root("parent", "id = 1").build().unwrap();

        let mut buf = Vec::new();
        let mut writer = ArchiveWriter::new(&mut buf).unwrap();
        let err = dump(&db, &schema, &config, &mut writer).unwrap_err();
        drop(writer);
        assert!(matches!(err, SliceError::TraversalQuery { .. }));
        assert!(ArchiveReader::open(Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_cancelled_dump_writes_no_manifest() {
        let db = parent_child_db();
        let schema = schema(&db);
        let cancel = CancelToken::new();
        cancel.cancel();
        let config = DumpConfig::builder()
            .root("parent", "true")
            .cancel(cancel)
            .build()
            .unwrap();

        let mut buf = Vec::new();
        let mut writer = ArchiveWriter::new(&mut buf).unwrap();
        let err = dump(&db, &schema, &config, &mut writer).unwrap_err();
        drop(writer);
        assert!(matches!(err, SliceError::Cancelled));
        assert!(ArchiveReader::open(Cursor::new(buf)).is_err());
        assert_eq!(db.open_snapshots(), 0);
    }

    #[test]
    fn test_sql_output_loads_parents_first() {
        let db = parent_child_db();
        let schema = schema(&db);
        let config = DumpConfig::builder().root("child", "true").build().unwrap();

        let mut buf = Vec::new();
        let mut writer = SqlWriter::new(&mut buf).unwrap();
        dump(&db, &schema, &config, &mut writer).unwrap();
        drop(writer);

        let script = String::from_utf8(buf).unwrap();
        let parent = script.find("COPY \"public\".\"parent\"").unwrap();
        let child = script.find("COPY \"public\".\"child\"").unwrap();
        assert!(parent < child);
        assert!(script.contains("BEGIN;"));
        assert!(script.trim_end().ends_with("COMMIT;"));
    }
}
