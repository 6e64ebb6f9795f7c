//! PostgreSQL COPY text-format row codec.
//!
//! Parts store rows exactly as `COPY ... TO STDOUT` emits them: one line per
//! row, tab-separated fields, `\N` for NULL and backslash escapes for tabs,
//! newlines and backslashes inside values.

use memchr::memchr;
use std::io::{self, BufRead};

/// One row; `None` is SQL NULL
pub type Row = Vec<Option<String>>;

const NULL_MARKER: &[u8] = b"\\N";

/// Decode a single COPY line (without its trailing newline)
pub fn decode_line(line: &[u8]) -> io::Result<Row> {
    let mut fields = Vec::new();
    let mut rest = line;
    loop {
        let (field, next) = match memchr(b'\t', rest) {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => (rest, None),
        };
        fields.push(decode_field(field)?);
        match next {
            Some(next) => rest = next,
            None => break,
        }
    }
    Ok(fields)
}

fn decode_field(value: &[u8]) -> io::Result<Option<String>> {
    if value == NULL_MARKER {
        return Ok(None);
    }

    let mut result = Vec::with_capacity(value.len());
    let mut i = 0;
    while i < value.len() {
        if value[i] == b'\\' && i + 1 < value.len() {
            let decoded = match value[i + 1] {
                b'n' => b'\n',
                b'r' => b'\r',
                b't' => b'\t',
                b'b' => 0x08,
                b'f' => 0x0c,
                b'v' => 0x0b,
                other => other,
            };
            result.push(decoded);
            i += 2;
        } else {
            result.push(value[i]);
            i += 1;
        }
    }

    String::from_utf8(result)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Encode a row as a COPY line, including the trailing newline
pub fn encode_line(row: &[Option<String>], out: &mut Vec<u8>) {
    for (i, field) in row.iter().enumerate() {
        if i > 0 {
            out.push(b'\t');
        }
        match field {
            None => out.extend_from_slice(NULL_MARKER),
            Some(value) => {
                for &b in value.as_bytes() {
                    match b {
                        b'\\' => out.extend_from_slice(b"\\\\"),
                        b'\n' => out.extend_from_slice(b"\\n"),
                        b'\r' => out.extend_from_slice(b"\\r"),
                        b'\t' => out.extend_from_slice(b"\\t"),
                        0x08 => out.extend_from_slice(b"\\b"),
                        0x0c => out.extend_from_slice(b"\\f"),
                        0x0b => out.extend_from_slice(b"\\v"),
                        _ => out.push(b),
                    }
                }
            }
        }
    }
    out.push(b'\n');
}

/// Streaming reader over COPY lines.
///
/// Stops at end of input or at the `\.` end-of-data marker.
pub struct CopyLines<R: BufRead> {
    reader: R,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> CopyLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(1024),
            done: false,
        }
    }

    /// Next raw line without its newline
    pub fn next_line(&mut self) -> io::Result<Option<&[u8]>> {
        if self.done {
            return Ok(None);
        }
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            self.done = true;
            return Ok(None);
        }
        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        if self.buf == b"\\." {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(&self.buf))
    }

    /// Next decoded row
    pub fn next_row(&mut self) -> io::Result<Option<Row>> {
        match self.next_line()? {
            Some(line) => decode_line(line).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_nulls_and_escapes() {
        let row = decode_line(b"1\t\\N\thello\\tworld\\n").unwrap();
        assert_eq!(
            row,
            vec![
                Some("1".to_string()),
                None,
                Some("hello\tworld\n".to_string())
            ]
        );
    }

    #[test]
    fn test_empty_string_is_not_null() {
        let row = decode_line(b"\t\\N").unwrap();
        assert_eq!(row, vec![Some(String::new()), None]);
    }

    #[test]
    fn test_encode_escapes_specials() {
        let mut out = Vec::new();
        encode_line(
            &[Some("a\\b".to_string()), None, Some("x\ty".to_string())],
            &mut out,
        );
        assert_eq!(out, b"a\\\\b\t\\N\tx\\ty\n");
        assert_eq!(
            decode_line(&out[..out.len() - 1]).unwrap(),
            vec![Some("a\\b".to_string()), None, Some("x\ty".to_string())]
        );
    }

    #[test]
    fn test_copy_lines_stops_at_terminator() {
        let data: &[u8] = b"1\ta\n2\tb\n\\.\n3\tc\n";
        let mut lines = CopyLines::new(data);
        assert_eq!(lines.next_row().unwrap().unwrap()[1].as_deref(), Some("a"));
        assert_eq!(lines.next_row().unwrap().unwrap()[1].as_deref(), Some("b"));
        assert!(lines.next_row().unwrap().is_none());
        assert!(lines.next_row().unwrap().is_none());
    }
}
