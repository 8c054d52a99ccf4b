// Binary, self-describing, little-endian row codec (§4.1). Pure in-memory
// transform — no I/O here; `storage::spill` is the only caller that touches
// disk, feeding this module's `encode_rows`/`decode_rows` directly.
//
// Layout:
//   rows   := u32(row_count) row*
//   row    := u32(field_count) field*
//   field  := u16(key_len) key_bytes u8(type_tag) payload
//   value  := u8(type_tag) payload        (used inside List/Vector elements)
//
// `payload` is fixed-width for primitives and length-prefixed for
// variable-width types; List/Map payloads recurse into the same grammar.

use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::row::Row;
use crate::value::Value;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT32: u8 = 2;
const TAG_INT64: u8 = 3;
const TAG_FLOAT32: u8 = 4;
const TAG_FLOAT64: u8 = 5;
const TAG_STRING: u8 = 6;
const TAG_BYTES: u8 = 7;
const TAG_TIMESTAMP: u8 = 8;
const TAG_VECTOR: u8 = 9;
const TAG_LIST: u8 = 10;
const TAG_MAP: u8 = 11;

fn corrupt(reason: impl Into<String>) -> EngineError {
    EngineError::CodecCorrupt {
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------

pub fn encode_rows(rows: &[Row]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    for row in rows {
        encode_fields(&mut buf, &row.0);
    }
    buf
}

fn encode_fields(buf: &mut Vec<u8>, fields: &BTreeMap<String, Value>) {
    buf.extend_from_slice(&(fields.len() as u32).to_le_bytes());
    for (key, value) in fields {
        let key_bytes = key.as_bytes();
        buf.extend_from_slice(&(key_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(key_bytes);
        encode_value(buf, value);
    }
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(if *b { 1 } else { 0 });
        }
        Value::Int32(v) => {
            buf.push(TAG_INT32);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Int64(v) => {
            buf.push(TAG_INT64);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float32(v) => {
            buf.push(TAG_FLOAT32);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Float64(v) => {
            buf.push(TAG_FLOAT64);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::String(s) => {
            buf.push(TAG_STRING);
            let bytes = s.as_bytes();
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(bytes);
        }
        Value::Bytes(b) => {
            buf.push(TAG_BYTES);
            buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
            buf.extend_from_slice(b);
        }
        Value::Timestamp(ts) => {
            buf.push(TAG_TIMESTAMP);
            buf.extend_from_slice(&ts.to_le_bytes());
        }
        Value::Vector(v) => {
            buf.push(TAG_VECTOR);
            buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
            for f in v {
                buf.extend_from_slice(&f.to_le_bytes());
            }
        }
        Value::List(items) => {
            buf.push(TAG_LIST);
            buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_value(buf, item);
            }
        }
        Value::Map(fields) => {
            buf.push(TAG_MAP);
            encode_fields(buf, fields);
        }
    }
}

// ---------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(corrupt(format!(
                "truncated input: need {} bytes, have {}",
                n,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// A length prefix is rejected if it claims more bytes than could
    /// possibly remain in the whole buffer (not just what's left at the
    /// cursor) — catches a corrupted prefix near the start of a short file.
    fn check_len_sane(&self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(corrupt(format!(
                "length prefix {} exceeds buffer size {}",
                len,
                self.data.len()
            )));
        }
        Ok(())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.check_len_sane(len)?;
        Ok(self.take(len)?.to_vec())
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|e| corrupt(format!("invalid utf8 in string: {e}")))
    }
}

pub fn decode_rows(data: &[u8]) -> Result<Vec<Row>> {
    let mut cursor = Cursor::new(data);
    let row_count = cursor.read_u32()? as usize;
    cursor.check_len_sane(row_count)?; // cheap sanity floor: at least 1 byte/row would need row_count bytes
    let mut rows = Vec::with_capacity(row_count.min(1 << 20));
    for _ in 0..row_count {
        rows.push(Row(decode_fields(&mut cursor)?));
    }
    Ok(rows)
}

fn decode_fields(cursor: &mut Cursor) -> Result<BTreeMap<String, Value>> {
    let field_count = cursor.read_u32()? as usize;
    cursor.check_len_sane(field_count)?;
    let mut fields = BTreeMap::new();
    for _ in 0..field_count {
        let key_len = cursor.read_u16()? as usize;
        let key = cursor.read_string(key_len)?;
        let value = decode_value(cursor)?;
        fields.insert(key, value);
    }
    Ok(fields)
}

fn decode_value(cursor: &mut Cursor) -> Result<Value> {
    let tag = cursor.read_u8()?;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => Ok(Value::Bool(cursor.read_u8()? != 0)),
        TAG_INT32 => Ok(Value::Int32(cursor.read_i32()?)),
        TAG_INT64 => Ok(Value::Int64(cursor.read_i64()?)),
        TAG_FLOAT32 => Ok(Value::Float32(cursor.read_f32()?)),
        TAG_FLOAT64 => Ok(Value::Float64(cursor.read_f64()?)),
        TAG_STRING => {
            let len = cursor.read_u32()? as usize;
            Ok(Value::String(cursor.read_string(len)?))
        }
        TAG_BYTES => {
            let len = cursor.read_u32()? as usize;
            Ok(Value::Bytes(cursor.read_bytes(len)?))
        }
        TAG_TIMESTAMP => Ok(Value::Timestamp(cursor.read_i64()?)),
        TAG_VECTOR => {
            let len = cursor.read_u32()? as usize;
            cursor.check_len_sane(len)?;
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                v.push(cursor.read_f32()?);
            }
            Ok(Value::Vector(v))
        }
        TAG_LIST => {
            let len = cursor.read_u32()? as usize;
            cursor.check_len_sane(len)?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(cursor)?);
            }
            Ok(Value::List(items))
        }
        TAG_MAP => Ok(Value::Map(decode_fields(cursor)?)),
        other => Err(corrupt(format!("unknown type tag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rows() -> Vec<Row> {
        let mut r1 = Row::new();
        r1.insert("id", Value::Int64(1));
        r1.insert("name", Value::String("alice".into()));
        r1.insert("tags", Value::List(vec![Value::String("a".into()), Value::Null]));
        let mut nested = BTreeMap::new();
        nested.insert("x".to_string(), Value::Float64(1.5));
        nested.insert("y".to_string(), Value::Bool(true));
        r1.insert("meta", Value::Map(nested));
        r1.insert("emb", Value::Vector(vec![0.1, 0.2, 0.3]));
        r1.insert("raw", Value::Bytes(vec![1, 2, 3, 255]));
        r1.insert("created", Value::Timestamp(1_700_000_000_000));

        let mut r2 = Row::new();
        r2.insert("id", Value::Int32(2));
        r2.insert("ghost", Value::Null);

        vec![r1, r2]
    }

    #[test]
    fn round_trip_every_variant() {
        let rows = sample_rows();
        let encoded = encode_rows(&rows);
        let decoded = decode_rows(&encoded).unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn round_trip_empty() {
        let encoded = encode_rows(&[]);
        let decoded = decode_rows(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn truncated_input_is_corrupt() {
        let rows = sample_rows();
        let encoded = encode_rows(&rows);
        let truncated = &encoded[..encoded.len() - 3];
        assert!(matches!(
            decode_rows(truncated),
            Err(EngineError::CodecCorrupt { .. })
        ));
    }

    #[test]
    fn unknown_tag_is_corrupt() {
        let mut encoded = encode_rows(&sample_rows());
        // First row's first field's type tag sits after: u32 rowcount, u32
        // fieldcount, u16 keylen, key bytes. Corrupt the "id" field's tag.
        let tag_pos = 4 + 4 + 2 + "id".len();
        encoded[tag_pos] = 250;
        assert!(matches!(
            decode_rows(&encoded),
            Err(EngineError::CodecCorrupt { .. })
        ));
    }

    #[test]
    fn over_long_length_prefix_is_corrupt() {
        let mut encoded = encode_rows(&sample_rows());
        // Smash the row_count prefix to an absurd value.
        encoded[0..4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_rows(&encoded),
            Err(EngineError::CodecCorrupt { .. })
        ));
    }
}
