//! Integration tests for deterministic column transforms.

use slice_db::error::SliceError;
use slice_db::row::Row;
use slice_db::schema::{Schema, SchemaDocument, TableSchema};
use slice_db::transform::{transform, Pepper, TransformFile, TransformKind, TransformPipeline};

const PEOPLE: &str = r#"
tables:
  - schema: public
    name: person
    columns:
      - { name: id, type: integer, nullable: false }
      - { name: full_name, type: text, transform: { kind: person_name } }
      - { name: email, type: text, transform: { kind: alphanumeric } }
      - { name: birth_date, type: date, transform: { kind: date_year } }
      - { name: zip, type: text, transform: { kind: geozip } }
      - { name: address, type: address_t, transform: { kind: composite, fields: [{ index: 1, transform: { kind: geozip } }] } }
      - { name: note, type: text }
    primary_key: [id]
"#;

fn schema() -> Schema {
    SchemaDocument::parse(PEOPLE).unwrap().resolve().unwrap()
}

fn person(schema: &Schema) -> &TableSchema {
    schema.get_table("public.person").unwrap()
}

fn row() -> Row {
    [
        Some("7"),
        Some("Ada King Lovelace"),
        Some("ada.lovelace42@example.com"),
        Some("1815-12-10"),
        Some("94107-1234"),
        Some("(\"12 Main St\",02139)"),
        Some("keep me"),
    ]
    .iter()
    .map(|v| v.map(str::to_string))
    .collect()
}

#[test]
fn test_transform_is_deterministic() {
    let schema = schema();
    let pepper = Pepper::from("fixture-pepper");
    let first = transform(&row(), person(&schema), &pepper).unwrap();
    let second = transform(&row(), person(&schema), &pepper).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_changing_the_pepper_changes_output_but_not_format() {
    let schema = schema();
    let a = transform(&row(), person(&schema), &Pepper::from("a")).unwrap();
    let b = transform(&row(), person(&schema), &Pepper::from("b")).unwrap();
    assert_ne!(a, b);

    for out in [&a, &b] {
        // Untransformed columns pass through
        assert_eq!(out[0].as_deref(), Some("7"));
        assert_eq!(out[6].as_deref(), Some("keep me"));

        // Three name tokens stay three tokens
        assert_eq!(out[1].as_deref().unwrap().split_whitespace().count(), 3);

        // Character classes per position survive
        let email = out[2].as_deref().unwrap();
        assert_eq!(email.len(), "ada.lovelace42@example.com".len());
        assert_eq!(email.find('@'), Some(14));
        assert!(email[12..14].chars().all(|c| c.is_ascii_digit()));

        // Still a date
        let date = out[3].as_deref().unwrap();
        assert!(chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok());

        // Geozip keeps the first three digits
        let zip = out[4].as_deref().unwrap();
        assert!(zip.starts_with("941"));
        assert_eq!(zip.len(), "94107-1234".len());
        assert_eq!(&zip[5..6], "-");

        let address = out[5].as_deref().unwrap();
        assert!(address.starts_with("(\"12 Main St\",021"));
    }
}

#[test]
fn test_equal_values_transform_equally_across_columns() {
    let doc = SchemaDocument::parse(
        r#"
tables:
  - schema: public
    name: account
    columns:
      - { name: code, type: text, transform: { kind: alphanumeric } }
      - { name: parent_code, type: text, transform: { kind: alphanumeric } }
"#,
    )
    .unwrap();
    let schema = doc.resolve().unwrap();
    let table = schema.get_table("public.account").unwrap();
    let pepper = Pepper::from("p");
    let row: Row = vec![Some("AB12".to_string()), Some("AB12".to_string())];
    let out = transform(&row, table, &pepper).unwrap();
    assert_eq!(out[0], out[1]);
}

#[test]
fn test_nulls_pass_through() {
    let schema = schema();
    let mut row = row();
    for value in row.iter_mut().skip(1) {
        *value = None;
    }
    let out = transform(&row, person(&schema), &Pepper::from("p")).unwrap();
    assert_eq!(out, row);
}

#[test]
fn test_malformed_value_names_table_column_and_row() {
    let schema = schema();
    let pepper = Pepper::from("p");
    let pipeline = TransformPipeline::new(person(&schema), &pepper);

    let input = b"1\tA B\ta@b\t2020-01-01\t12345\t(x,99999)\t\\N\n\
                  2\tA B\ta@b\tnot a date\t12345\t(x,99999)\t\\N\n";
    let mut out = Vec::new();
    let err = pipeline.run(&input[..], &mut out).unwrap_err();
    match err {
        SliceError::Transformation {
            table, column, row, ..
        } => {
            assert_eq!(table, "public.person");
            assert_eq!(column, "birth_date");
            assert_eq!(row, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_malformed_composite_fails() {
    let schema = schema();
    let mut row = row();
    row[5] = Some("not a record".to_string());
    let err = transform(&row, person(&schema), &Pepper::from("p")).unwrap_err();
    assert!(err.to_string().contains("address"));
}

#[test]
fn test_pipeline_streams_copy_text() {
    let schema = schema();
    let pepper = Pepper::from("p");
    let pipeline = TransformPipeline::new(person(&schema), &pepper);

    let input = b"1\tAda Lovelace\tada@x.org\t1815-12-10\t94107\t(\"1 Main\",02139)\tline\\tbreak\n";
    let mut out = Vec::new();
    assert_eq!(pipeline.run(&input[..], &mut out).unwrap(), 1);

    let text = String::from_utf8(out).unwrap();
    let fields: Vec<&str> = text.trim_end_matches('\n').split('\t').collect();
    assert_eq!(fields.len(), 7);
    assert_eq!(fields[0], "1");
    assert_eq!(fields[6], "line\\tbreak");
    assert!(fields[4].starts_with("941"));
}

#[test]
fn test_rules_file_overrides_inline_transforms() {
    let mut schema = schema();
    let rules = TransformFile::parse(
        r#"
rules:
  - column: "person.note"
    kind: constant
    value: redacted
  - column: "public.person.email"
    kind: constant
    value: nobody@example.com
"#,
    )
    .unwrap();
    assert_eq!(rules.apply(&mut schema).unwrap(), 2);

    let table = person(&schema);
    assert_eq!(
        table.get_column("email").unwrap().transform,
        Some(TransformKind::Constant {
            value: "nobody@example.com".to_string()
        })
    );
    let out = transform(&row(), table, &Pepper::from("p")).unwrap();
    assert_eq!(out[6].as_deref(), Some("redacted"));
    assert_eq!(out[2].as_deref(), Some("nobody@example.com"));
}

#[test]
fn test_rule_matching_nothing_is_an_error() {
    let mut schema = schema();
    let rules = TransformFile::parse("rules:\n  - { column: \"*.ssn\", kind: alphanumeric }\n").unwrap();
    assert!(matches!(rules.apply(&mut schema), Err(SliceError::Config(_))));
}
