use mysql_async::{Row, Value};
use std::io::{self, Write};

/// Escape a byte string for a single-quoted MySQL literal.
///
/// Applied byte-wise: `'`, `\` and `"` gain a backslash prefix, LF becomes
/// `\n`, CR becomes `\r`. Every other byte passes through untouched, so the
/// encoder never has to care whether the column holds valid UTF-8.
pub fn escape_into(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        match b {
            b'\'' | b'\\' | b'"' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(b),
        }
    }
}

/// Append one driver value as a SQL literal.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::NULL => out.extend_from_slice(b"NULL"),
        Value::Bytes(bytes) => {
            out.push(b'\'');
            escape_into(bytes, out);
            out.push(b'\'');
        }
        Value::Int(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::UInt(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::Float(f) => out.extend_from_slice(ryu::Buffer::new().format(*f).as_bytes()),
        Value::Double(d) => out.extend_from_slice(ryu::Buffer::new().format(*d).as_bytes()),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut text = format!(
                "'{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            );
            if *micros > 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            text.push('\'');
            out.extend_from_slice(text.as_bytes());
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let total_hours = u64::from(*days) * 24 + u64::from(*hours);
            let mut text = format!("'{sign}{total_hours:02}:{minutes:02}:{seconds:02}");
            if *micros > 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            text.push('\'');
            out.extend_from_slice(text.as_bytes());
        }
    }
}

/// Append the comma-joined literal list of one row, without parentheses.
pub fn encode_values(values: &[Value], out: &mut Vec<u8>) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        encode_value(value, out);
    }
}

/// Streams a multi-row `INSERT` for one chunk.
///
/// The statement header is only written once the first row shows up, so a
/// chunk that yields no rows leaves the output untouched instead of closing
/// a statement that was never opened.
pub struct InsertWriter<'a, W: Write> {
    out: &'a mut W,
    /// Escaped table name, e.g. `` `users` ``.
    table: &'a str,
    rows: u64,
    scratch: Vec<u8>,
}

impl<'a, W: Write> InsertWriter<'a, W> {
    pub fn new(out: &'a mut W, table: &'a str) -> Self {
        Self {
            out,
            table,
            rows: 0,
            scratch: Vec::new(),
        }
    }

    pub fn write_row(&mut self, row: Row) -> io::Result<()> {
        self.write_values(&row.unwrap())
    }

    pub fn write_values(&mut self, values: &[Value]) -> io::Result<()> {
        self.scratch.clear();
        encode_values(values, &mut self.scratch);

        if self.rows == 0 {
            write!(self.out, "INSERT INTO {} VALUES \n(", self.table)?;
        } else {
            self.out.write_all(b"),\n(")?;
        }
        self.out.write_all(&self.scratch)?;
        self.rows += 1;
        Ok(())
    }

    /// Terminate the statement. Returns the number of rows written.
    pub fn finish(mut self) -> io::Result<u64> {
        if self.rows > 0 {
            self.out.write_all(b");\n")?;
        }
        Ok(self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: Value) -> Vec<u8> {
        let mut out = Vec::new();
        encode_value(&value, &mut out);
        out
    }

    #[test]
    fn test_escapes_quote_backslash_newlines() {
        // ' \ LF 0xff — the 0xff byte must survive verbatim.
        let mut out = Vec::new();
        escape_into(&[0x27, 0x5c, 0x0a, 0xff], &mut out);
        assert_eq!(out, vec![b'\\', b'\'', b'\\', b'\\', b'\\', b'n', 0xff]);

        let mut out = Vec::new();
        escape_into(b"say \"hi\"\r", &mut out);
        assert_eq!(out, b"say \\\"hi\\\"\\r");
    }

    #[test]
    fn test_binary_safe_quoted_literal() {
        assert_eq!(
            encoded(Value::Bytes(vec![0x27, 0x5c, 0x0a, 0xff])),
            vec![b'\'', b'\\', b'\'', b'\\', b'\\', b'\\', b'n', 0xff, b'\'']
        );
    }

    #[test]
    fn test_numeric_and_null_literals() {
        assert_eq!(encoded(Value::Int(-42)), b"-42");
        assert_eq!(encoded(Value::UInt(18_446_744_073_709_551_615)), b"18446744073709551615");
        assert_eq!(encoded(Value::NULL), b"NULL");
        assert_eq!(encoded(Value::Double(1.5)), b"1.5");
        // Round-trip property of the float form.
        let text = String::from_utf8(encoded(Value::Double(0.1))).unwrap();
        assert_eq!(text.parse::<f64>().unwrap(), 0.1);
    }

    #[test]
    fn test_timestamp_literals() {
        assert_eq!(
            encoded(Value::Date(2024, 2, 29, 13, 5, 9, 0)),
            b"'2024-02-29 13:05:09'"
        );
        assert_eq!(
            encoded(Value::Date(2024, 2, 29, 13, 5, 9, 420)),
            b"'2024-02-29 13:05:09.000420'"
        );
        assert_eq!(encoded(Value::Time(true, 1, 2, 3, 4, 0)), b"'-26:03:04'");
    }

    #[test]
    fn test_insert_framing_joins_rows() {
        let mut out = Vec::new();
        let mut writer = InsertWriter::new(&mut out, "`t`");
        for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
            writer
                .write_values(&[Value::Int(id), Value::Bytes(name.into())])
                .unwrap();
        }
        assert_eq!(writer.finish().unwrap(), 3);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "INSERT INTO `t` VALUES \n(1,'a'),\n(2,'b'),\n(3,'c');\n"
        );
    }

    #[test]
    fn test_empty_chunk_emits_nothing() {
        let mut out = Vec::new();
        let writer = InsertWriter::<Vec<u8>>::new(&mut out, "`t`");
        assert_eq!(writer.finish().unwrap(), 0);
        assert!(out.is_empty());
    }
}
