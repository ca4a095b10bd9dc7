//! Row record codec.
//!
//! A record's bytes are a header (a varint header length, then one varint
//! type code per column) followed by a body (each column's bytes in
//! declared order). This module decodes that layout into normalized
//! [`Value`]s and encodes normalized values back into the same layout.

pub mod ints;
pub mod iter;

use std::fmt;

use zerocopy::big_endian::{F64, I16, I32, I64};

use crate::buf::{Buf, BufMut};
use crate::pager::header::TextEncoding;
use crate::varint;

use self::ints::{I24, I48};
use self::iter::{SerialTypeIterator, ValueIterator};

/// The on-disk type code for one column, as read straight out of the
/// record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialType {
    Null,
    I8,
    I16,
    I24,
    I32,
    I48,
    I64,
    F64,
    Zero,
    One,
    Blob(u64),
    Text(u64),
}

/// A normalized column value. Integers of every stored width decode into
/// `Int64`; the original width is not retained because re-encoding always
/// picks the minimal width for the value, so serialization is a pure
/// function of the value rather than byte-identical to whatever code
/// produced the original bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int64(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    /// A 16-byte big-endian GUID, used by merged `__hi`/`__lo` columns.
    Guid([u8; 16]),
}

#[derive(Clone, Copy)]
pub struct Record<'a> {
    data: &'a [u8],
}

impl From<u64> for SerialType {
    fn from(value: u64) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::I8,
            2 => Self::I16,
            3 => Self::I24,
            4 => Self::I32,
            5 => Self::I48,
            6 => Self::I64,
            7 => Self::F64,
            8 => Self::Zero,
            9 => Self::One,
            10 | 11 => Self::Null, // reserved; never produced by this engine
            n if n % 2 == 0 => Self::Blob((n - 12) / 2),
            n => Self::Text((n - 13) / 2),
        }
    }
}

impl SerialType {
    fn code(self) -> u64 {
        match self {
            SerialType::Null => 0,
            SerialType::I8 => 1,
            SerialType::I16 => 2,
            SerialType::I24 => 3,
            SerialType::I32 => 4,
            SerialType::I48 => 5,
            SerialType::I64 => 6,
            SerialType::F64 => 7,
            SerialType::Zero => 8,
            SerialType::One => 9,
            SerialType::Blob(n) => n * 2 + 12,
            SerialType::Text(n) => n * 2 + 13,
        }
    }

    fn body_len(self) -> usize {
        match self {
            SerialType::Null | SerialType::Zero | SerialType::One => 0,
            SerialType::I8 => 1,
            SerialType::I16 => 2,
            SerialType::I24 => 3,
            SerialType::I32 => 4,
            SerialType::I48 => 6,
            SerialType::I64 => 8,
            SerialType::F64 => 8,
            SerialType::Blob(n) => n as usize,
            SerialType::Text(n) => n as usize,
        }
    }
}

impl Value {
    fn consume(ty: SerialType, data: &mut &[u8], encoding: TextEncoding) -> Self {
        match ty {
            SerialType::Null => Value::Null,
            SerialType::I8 => Value::Int64(data.consume::<i8>() as i64),
            SerialType::I16 => Value::Int64(data.consume::<I16>().get() as i64),
            SerialType::I24 => Value::Int64(data.consume::<I24>().get() as i64),
            SerialType::I32 => Value::Int64(data.consume::<I32>().get() as i64),
            SerialType::I48 => Value::Int64(data.consume::<I48>().get()),
            SerialType::I64 => Value::Int64(data.consume::<I64>().get()),
            SerialType::F64 => Value::Double(data.consume::<F64>().get()),
            SerialType::Zero => Value::Int64(0),
            SerialType::One => Value::Int64(1),
            SerialType::Blob(n) => Value::Blob(data.consume_bytes(n as usize).to_vec()),
            SerialType::Text(n) => {
                let bytes = data.consume_bytes(n as usize).to_vec();
                Value::Text(decode_text(&bytes, encoding))
            }
        }
    }

    /// The type code this value would be encoded with.
    fn serial_type(&self) -> SerialType {
        match self {
            Value::Null => SerialType::Null,
            Value::Int64(0) => SerialType::Zero,
            Value::Int64(1) => SerialType::One,
            Value::Int64(v) => minimal_int_type(*v),
            Value::Double(_) => SerialType::F64,
            Value::Text(s) => SerialType::Text(s.len() as u64),
            Value::Blob(b) => SerialType::Blob(b.len() as u64),
            Value::Guid(bytes) => SerialType::Blob(bytes.len() as u64),
        }
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        match self {
            Value::Null => {}
            Value::Int64(0) | Value::Int64(1) => {}
            Value::Int64(v) => write_minimal_int(*v, out),
            Value::Double(v) => out.write(F64::from(*v)),
            Value::Text(s) => out.extend(s.as_bytes().iter().copied()),
            Value::Blob(b) => out.extend(b.iter().copied()),
            Value::Guid(bytes) => out.extend(bytes.iter().copied()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            Value::Guid(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<[u8; 16]> {
        match self {
            Value::Guid(b) => Some(*b),
            Value::Blob(b) if b.len() == 16 => {
                let mut out = [0u8; 16];
                out.copy_from_slice(b);
                Some(out)
            }
            _ => None,
        }
    }
}

/// Decodes a text column's raw bytes per the database's declared encoding.
/// UTF-16 variants that end on an odd byte or contain an unpaired
/// surrogate are not treated as corruption here; `from_utf16_lossy`
/// substitutes the replacement character instead.
fn decode_text(bytes: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Utf16Le => {
            let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
            String::from_utf16_lossy(&units)
        }
        TextEncoding::Utf16Be => {
            let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
            String::from_utf16_lossy(&units)
        }
    }
}

fn minimal_int_type(v: i64) -> SerialType {
    if i8::try_from(v).is_ok() {
        SerialType::I8
    } else if i16::try_from(v).is_ok() {
        SerialType::I16
    } else if (-(1 << 23)..(1 << 23)).contains(&v) {
        SerialType::I24
    } else if i32::try_from(v).is_ok() {
        SerialType::I32
    } else if (-(1i64 << 47)..(1i64 << 47)).contains(&v) {
        SerialType::I48
    } else {
        SerialType::I64
    }
}

fn write_minimal_int(v: i64, out: &mut Vec<u8>) {
    match minimal_int_type(v) {
        SerialType::I8 => out.write(v as i8),
        SerialType::I16 => out.write(I16::from(v as i16)),
        SerialType::I24 => out.write(I24::from(v as i32)),
        SerialType::I32 => out.write(I32::from(v as i32)),
        SerialType::I48 => out.write(I48::from(v)),
        SerialType::I64 => out.write(I64::from(v)),
        _ => unreachable!(),
    }
}

impl<'a> From<&'a [u8]> for Record<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Record<'a> {
    pub fn types(self) -> SerialTypeIterator<'a> {
        SerialTypeIterator::new(self.data)
    }

    /// Decodes column values assuming UTF-8 text, the common case for a
    /// database whose header declares UTF-8 (`TextEncoding::Utf8`). Use
    /// [`Self::values_with_encoding`] against a database that may declare a
    /// different encoding.
    pub fn values(self) -> ValueIterator<'a> {
        ValueIterator::new(self.data, TextEncoding::Utf8)
    }

    /// Decodes column values using the database's declared text encoding,
    /// read off [`crate::pager::header::Header::text_encoding`].
    pub fn values_with_encoding(self, encoding: TextEncoding) -> ValueIterator<'a> {
        ValueIterator::new(self.data, encoding)
    }

    pub fn column(self, index: usize) -> Option<Value> {
        self.values().nth(index)
    }

    pub fn field_count(self) -> usize {
        self.types().count()
    }
}

impl<'a> fmt::Debug for Record<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("columns", &self.values().collect::<Vec<_>>())
            .finish()
    }
}

/// Encodes a row of values into SQLite record bytes.
pub fn encode(values: &[Value]) -> Vec<u8> {
    let types: Vec<SerialType> = values.iter().map(Value::serial_type).collect();
    let body_len: usize = types.iter().map(|t| t.body_len()).sum();

    // The header-length varint's own width affects the header length, so
    // iterate until the assumed width is self-consistent.
    let type_codes_len: usize = types.iter().map(|t| varint::len(t.code() as i64)).sum();
    let mut header_len_varint_size = 1;
    let header_len = loop {
        let candidate = header_len_varint_size + type_codes_len;
        if varint::len(candidate as i64) == header_len_varint_size {
            break candidate;
        }
        header_len_varint_size = varint::len(candidate as i64);
    };

    let mut out = Vec::with_capacity(header_len + body_len);
    out.write_varint(header_len as i64);
    for ty in &types {
        out.write_varint(ty.code() as i64);
    }
    for value in values {
        value.write_body(&mut out);
    }
    out
}

/// Decodes the bytes stored in the `__hi`/`__lo` physical integer pair for
/// a merged GUID column.
pub fn hi_lo_to_guid(hi: i64, lo: i64) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&hi.to_be_bytes());
    bytes[8..].copy_from_slice(&lo.to_be_bytes());
    bytes
}

pub fn guid_to_hi_lo(guid: [u8; 16]) -> (i64, i64) {
    let hi = i64::from_be_bytes(guid[..8].try_into().unwrap());
    let lo = i64::from_be_bytes(guid[8..].try_into().unwrap());
    (hi, lo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_mixed_row() {
        let values = vec![
            Value::Int64(0),
            Value::Int64(1),
            Value::Int64(42),
            Value::Int64(-70000),
            Value::Double(9.99),
            Value::Text("hello".to_owned()),
            Value::Blob(vec![1, 2, 3]),
            Value::Null,
        ];

        let bytes = encode(&values);
        let decoded: Vec<Value> = Record::from(bytes.as_slice()).values().collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_round_trip_large_text() {
        let text = "x".repeat(20_000);
        let values = vec![Value::Text(text.clone())];
        let bytes = encode(&values);
        let decoded: Vec<Value> = Record::from(bytes.as_slice()).values().collect();
        assert_eq!(decoded, vec![Value::Text(text)]);
    }

    #[test]
    fn test_guid_round_trip_via_hi_lo() {
        let guid = [0xDE; 16];
        let (hi, lo) = guid_to_hi_lo(guid);
        assert_eq!(hi_lo_to_guid(hi, lo), guid);
    }

    #[test]
    fn test_minimal_int_widths() {
        assert!(matches!(minimal_int_type(0), SerialType::Zero));
        assert!(matches!(minimal_int_type(1), SerialType::One));
        assert!(matches!(minimal_int_type(100), SerialType::I8));
        assert!(matches!(minimal_int_type(30_000), SerialType::I16));
        assert!(matches!(minimal_int_type(i64::MAX), SerialType::I64));
    }

    #[test]
    fn test_example_schema_record() {
        const EXAMPLE_RECORD: &[u8] = &[
            6, 23, 23, 23, 1, 117, 116, 97, 98, 108, 101, 101, 109, 112, 116, 121, 101, 109, 112,
            116, 121, 2, 67, 82, 69, 65, 84, 69, 32, 84, 65, 66, 76, 69, 32, 101, 109, 112, 116,
            121, 32, 40, 105, 100, 32, 105, 110, 116, 101, 103, 101, 114, 32, 110, 111, 116, 32,
            110, 117, 108, 108, 32, 112, 114, 105, 109, 97, 114, 121, 32, 107, 101, 121, 41,
        ];

        let columns: Vec<Value> = Record::from(EXAMPLE_RECORD).values().collect();
        assert_eq!(
            columns,
            vec![
                Value::Text("table".to_owned()),
                Value::Text("empty".to_owned()),
                Value::Text("empty".to_owned()),
                Value::Int64(2),
                Value::Text("CREATE TABLE empty (id integer not null primary key)".to_owned()),
            ]
        );
    }
}
