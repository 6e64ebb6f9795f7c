//! PostgreSQL record literal parsing and serialization.
//!
//! Record text looks like `(1,"two words",,"a ""quoted"" value")`: fields are
//! comma separated, an empty unquoted field is NULL, quoted fields double
//! embedded quotes and may backslash-escape any character.

use super::ShapeError;

/// Parse a record literal into its fields
pub fn parse_record(value: &str) -> Result<Vec<Option<String>>, ShapeError> {
    let inner = value
        .trim()
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| ShapeError::new("record must be enclosed in parentheses"))?;

    let mut fields = Vec::new();
    let mut chars = inner.chars().peekable();

    loop {
        let mut field = String::new();
        let mut quoted_any = false;
        let mut in_quotes = false;

        loop {
            match chars.next() {
                None => {
                    if in_quotes {
                        return Err(ShapeError::new("unterminated quoted field in record"));
                    }
                    break;
                }
                Some('"') if in_quotes => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                Some('"') => {
                    in_quotes = true;
                    quoted_any = true;
                }
                Some('\\') => match chars.next() {
                    Some(c) => field.push(c),
                    None => return Err(ShapeError::new("dangling backslash in record")),
                },
                Some(',') if !in_quotes => {
                    fields.push(finish_field(field, quoted_any));
                    field = String::new();
                    quoted_any = false;
                    continue;
                }
                Some(c @ ('(' | ')')) if !in_quotes => {
                    return Err(ShapeError::new(format!(
                        "unexpected '{c}' in unquoted record field"
                    )));
                }
                Some(c) => field.push(c),
            }
        }

        fields.push(finish_field(field, quoted_any));
        break;
    }

    Ok(fields)
}

fn finish_field(field: String, quoted: bool) -> Option<String> {
    if field.is_empty() && !quoted {
        None
    } else {
        Some(field)
    }
}

/// Serialize fields back into a record literal
pub fn format_record(fields: &[Option<String>]) -> String {
    let mut out = String::from("(");
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let Some(value) = field else { continue };
        if needs_quotes(value) {
            out.push('"');
            for c in value.chars() {
                match c {
                    '"' => out.push_str("\"\""),
                    '\\' => out.push_str("\\\\"),
                    _ => out.push(c),
                }
            }
            out.push('"');
        } else {
            out.push_str(value);
        }
    }
    out.push(')');
    out
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| matches!(c, '"' | '\\' | ',' | '(' | ')') || c.is_whitespace())
}
