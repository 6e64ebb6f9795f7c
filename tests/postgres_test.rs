//! End-to-end tests against a real PostgreSQL server.
//!
//! Ignored by default; run with `TEST_DATABASE_URL` set:
//! `TEST_DATABASE_URL=postgresql://postgres@localhost/postgres cargo test -- --ignored`

use slice_db::container::{ArchiveReader, ArchiveWriter};
use slice_db::db::{ConnectionConfig, Database, PostgresDatabase};
use slice_db::restore::{self, RestoreConfig};
use slice_db::schema::filter::TableFilter;
use slice_db::slice::{dump, DumpConfig};
use std::env;
use std::io::Cursor;
use tokio_postgres::NoTls;

const SCHEMA: &str = "slice_db_test";

fn get_test_url() -> Option<String> {
    env::var("TEST_DATABASE_URL").ok()
}

/// Run SQL outside the backend, on a runtime of its own
fn execute(url: &str, sql: &str) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await.unwrap();
        let handle = tokio::spawn(connection);
        client.batch_execute(sql).await.unwrap();
        drop(client);
        let _ = handle.await;
    });
}

fn count(url: &str, table: &str) -> i64 {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await.unwrap();
        tokio::spawn(connection);
        let row = client
            .query_one(&format!("SELECT count(*) FROM {SCHEMA}.{table}"), &[])
            .await
            .unwrap();
        row.get(0)
    })
}

fn setup(url: &str) {
    execute(
        url,
        &format!(
            r#"
DROP SCHEMA IF EXISTS {SCHEMA} CASCADE;
CREATE SCHEMA {SCHEMA};
CREATE TABLE {SCHEMA}.parent (id int PRIMARY KEY, name text);
CREATE TABLE {SCHEMA}.child (
    id int PRIMARY KEY,
    parent_id int REFERENCES {SCHEMA}.parent (id)
);
CREATE TABLE {SCHEMA}.node (
    id int PRIMARY KEY,
    next_id int REFERENCES {SCHEMA}.node (id) DEFERRABLE
);
INSERT INTO {SCHEMA}.parent VALUES (1, 'Ada'), (2, 'Bob');
INSERT INTO {SCHEMA}.child VALUES (1, 1), (2, 1), (3, 2);
INSERT INTO {SCHEMA}.node VALUES (5, NULL), (4, 5), (3, 4), (2, 3), (1, 2);
"#
        ),
    );
}

fn database(url: &str) -> PostgresDatabase {
    PostgresDatabase::new(&ConnectionConfig::from_env(Some(url.to_string()))).unwrap()
}

fn test_schema(db: &PostgresDatabase) -> slice_db::schema::Schema {
    let mut doc = db.introspect().unwrap();
    TableFilter::new(&[format!("{SCHEMA}.*")], &[])
        .unwrap()
        .apply(&mut doc);
    doc.resolve().unwrap()
}

#[test]
#[ignore]
fn test_dump_and_restore_round_trip() {
    let url = get_test_url().expect("TEST_DATABASE_URL must be set");
    setup(&url);
    let db = database(&url);
    let schema = test_schema(&db);
    assert_eq!(schema.len(), 3);

    let config = DumpConfig::builder()
        .root(format!("{SCHEMA}.parent"), "id = 1")
        .root(format!("{SCHEMA}.node"), "id = 5")
        .parallelism(3)
        .build()
        .unwrap();
    let mut buf = Vec::new();
    let mut writer = ArchiveWriter::new(&mut buf).unwrap();
    let stats = dump(&db, &schema, &config, &mut writer).unwrap();
    drop(writer);
    // parent 1, children 1 and 2, the whole five-node chain
    assert_eq!(stats.rows, 8);

    execute(
        &url,
        &format!("TRUNCATE {SCHEMA}.child, {SCHEMA}.parent, {SCHEMA}.node;"),
    );
    let slice = ArchiveReader::open(Cursor::new(buf)).unwrap();
    let plan = restore::plan(&schema, slice.manifest()).unwrap();
    restore::restore(&db, &schema, &slice, &plan, &RestoreConfig::default()).unwrap();

    assert_eq!(count(&url, "parent"), 1);
    assert_eq!(count(&url, "child"), 2);
    assert_eq!(count(&url, "node"), 5);

    execute(&url, &format!("DROP SCHEMA {SCHEMA} CASCADE;"));
}

#[test]
#[ignore]
fn test_introspection_reads_deferrable_flags() {
    let url = get_test_url().expect("TEST_DATABASE_URL must be set");
    setup(&url);
    let db = database(&url);
    let schema = test_schema(&db);

    let node = schema.get_table(&format!("{SCHEMA}.node")).unwrap();
    let reference = schema.reference(node.references[0]).unwrap();
    assert!(reference.deferrable);
    assert!(reference.is_self_reference());

    let child = schema.get_table(&format!("{SCHEMA}.child")).unwrap();
    assert!(!schema.reference(child.references[0]).unwrap().deferrable);

    execute(&url, &format!("DROP SCHEMA {SCHEMA} CASCADE;"));
}
