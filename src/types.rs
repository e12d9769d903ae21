//! The fixed set of primitive column encodings.
//!
//! Every [`ColumnType`] knows its own byte width (for fixed-size numeric
//! types) and how to `get`/`set` a value at an offset into a byte view.
//! Numeric types are little-endian. `String` and `Date` share the same
//! on-disk shape: a `u16` length prefix followed by that many bytes,
//! living inside the column's fixed `size` slot (trailing bytes ignored).
//! `Bytes` is the column's raw `size` bytes, undelimited.

use crate::bytestring::ByteString;
use crate::error::{KradataError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int8,
    Int16,
    Int32,
    UInt8,
    UInt16,
    UInt32,
    Float32,
    String,
    Date,
    Bytes,
}

impl ColumnType {
    pub fn from_name(name: &str) -> Result<ColumnType> {
        Ok(match name {
            "int8" => ColumnType::Int8,
            "int16" => ColumnType::Int16,
            "int32" => ColumnType::Int32,
            "uint8" => ColumnType::UInt8,
            "uint16" => ColumnType::UInt16,
            "uint32" => ColumnType::UInt32,
            "float32" => ColumnType::Float32,
            "string" => ColumnType::String,
            "date" => ColumnType::Date,
            "bytes" => ColumnType::Bytes,
            other => {
                return Err(KradataError::BadFormat(format!(
                    "unknown column type name {other:?}"
                )))
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Int8 => "int8",
            ColumnType::Int16 => "int16",
            ColumnType::Int32 => "int32",
            ColumnType::UInt8 => "uint8",
            ColumnType::UInt16 => "uint16",
            ColumnType::UInt32 => "uint32",
            ColumnType::Float32 => "float32",
            ColumnType::String => "string",
            ColumnType::Date => "date",
            ColumnType::Bytes => "bytes",
        }
    }

    /// Byte width for fixed-size numeric types. `String`/`Date`/`Bytes` are
    /// variable (bounded by the column's declared `size`) and return `None`.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ColumnType::Int8 | ColumnType::UInt8 => Some(1),
            ColumnType::Int16 | ColumnType::UInt16 => Some(2),
            ColumnType::Int32 | ColumnType::UInt32 | ColumnType::Float32 => Some(4),
            ColumnType::String | ColumnType::Date | ColumnType::Bytes => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.fixed_width().is_some()
    }

    pub fn is_string_like(self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Date)
    }

    /// Reads a value of this type at `offset` within `view`, where `size` is
    /// the column's declared byte size (used by the variable-width types).
    pub fn get<'v>(self, view: &'v [u8], offset: usize, size: usize) -> Result<Value<'v>> {
        let slice = view.get(offset..offset + size).ok_or_else(|| {
            KradataError::InvalidHandle(format!(
                "read of {size} bytes at offset {offset} exceeds view of {} bytes",
                view.len()
            ))
        })?;
        Ok(match self {
            ColumnType::Int8 => Value::I8(slice[0] as i8),
            ColumnType::UInt8 => Value::U8(slice[0]),
            ColumnType::Int16 => Value::I16(i16::from_le_bytes(slice[0..2].try_into().unwrap())),
            ColumnType::UInt16 => Value::U16(u16::from_le_bytes(slice[0..2].try_into().unwrap())),
            ColumnType::Int32 => Value::I32(i32::from_le_bytes(slice[0..4].try_into().unwrap())),
            ColumnType::UInt32 => Value::U32(u32::from_le_bytes(slice[0..4].try_into().unwrap())),
            ColumnType::Float32 => {
                Value::F32(f32::from_le_bytes(slice[0..4].try_into().unwrap()))
            }
            ColumnType::Bytes => Value::Bytes(slice),
            ColumnType::String | ColumnType::Date => {
                let len = u16::from_le_bytes(slice[0..2].try_into().unwrap()) as usize;
                let content = slice.get(2..2 + len).ok_or_else(|| {
                    KradataError::BadFormat(format!(
                        "string/date length prefix {len} exceeds column size {size}"
                    ))
                })?;
                Value::Str(ByteString::new(content))
            }
        })
    }

    /// Writes `value` at `offset` within `view`, within a `size`-byte slot.
    pub fn set(self, view: &mut [u8], offset: usize, size: usize, value: &Value) -> Result<()> {
        let slot = view.get_mut(offset..offset + size).ok_or_else(|| {
            KradataError::InvalidHandle(format!(
                "write of {size} bytes at offset {offset} exceeds view"
            ))
        })?;
        match (self, value) {
            (ColumnType::Int8, Value::I8(v)) => slot[0] = *v as u8,
            (ColumnType::UInt8, Value::U8(v)) => slot[0] = *v,
            (ColumnType::Int16, Value::I16(v)) => slot[0..2].copy_from_slice(&v.to_le_bytes()),
            (ColumnType::UInt16, Value::U16(v)) => slot[0..2].copy_from_slice(&v.to_le_bytes()),
            (ColumnType::Int32, Value::I32(v)) => slot[0..4].copy_from_slice(&v.to_le_bytes()),
            (ColumnType::UInt32, Value::U32(v)) => slot[0..4].copy_from_slice(&v.to_le_bytes()),
            (ColumnType::Float32, Value::F32(v)) => slot[0..4].copy_from_slice(&v.to_le_bytes()),
            (ColumnType::Bytes, Value::Bytes(bytes)) => {
                let n = bytes.len().min(slot.len());
                slot[..n].copy_from_slice(&bytes[..n]);
            }
            (ColumnType::String | ColumnType::Date, Value::Str(s)) => {
                let bytes = s.as_bytes();
                let n = bytes.len().min(size.saturating_sub(2));
                slot[0..2].copy_from_slice(&(n as u16).to_le_bytes());
                slot[2..2 + n].copy_from_slice(&bytes[..n]);
            }
            _ => {
                return Err(KradataError::RuleError(format!(
                    "value does not match column type {}",
                    self.name()
                )))
            }
        }
        Ok(())
    }
}

/// A value read from (or to be written into) a column. Carries a borrow of
/// the underlying view for the string-like variants (no copy).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'v> {
    I8(i8),
    I16(i16),
    I32(i32),
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    Str(ByteString<'v>),
    Bytes(&'v [u8]),
}

impl<'v> Value<'v> {
    /// Widens any integer variant to `i64` for numeric comparison.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::U8(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(v as f64),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bytestring(self) -> Option<ByteString<'v>> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_every_numeric_type() {
        let cases: &[(ColumnType, Value)] = &[
            (ColumnType::Int8, Value::I8(-12)),
            (ColumnType::UInt8, Value::U8(200)),
            (ColumnType::Int16, Value::I16(-1234)),
            (ColumnType::UInt16, Value::U16(54321)),
            (ColumnType::Int32, Value::I32(-123_456)),
            (ColumnType::UInt32, Value::U32(4_000_000_000)),
            (ColumnType::Float32, Value::F32(3.5)),
        ];
        for (ty, value) in cases {
            let size = ty.fixed_width().unwrap();
            let mut buf = vec![0u8; size];
            ty.set(&mut buf, 0, size, value).unwrap();
            let got = ty.get(&buf, 0, size).unwrap();
            assert_eq!(got, *value);
        }
    }

    #[test]
    fn round_trip_string_and_date() {
        for ty in [ColumnType::String, ColumnType::Date] {
            let mut buf = vec![0u8; 16];
            let value = Value::Str(ByteString::new(b"hello"));
            ty.set(&mut buf, 0, 16, &value).unwrap();
            let got = ty.get(&buf, 0, 16).unwrap();
            assert_eq!(got.as_bytestring().unwrap().as_bytes(), b"hello");
        }
    }

    #[test]
    fn bytes_type_round_trips_raw_slice() {
        let mut buf = vec![0u8; 4];
        ColumnType::Bytes
            .set(&mut buf, 0, 4, &Value::Bytes(&[1, 2, 3, 4]))
            .unwrap();
        assert_eq!(ColumnType::Bytes.get(&buf, 0, 4).unwrap(), Value::Bytes(&[1, 2, 3, 4]));
    }

    #[test]
    fn unknown_type_name_is_bad_format() {
        assert!(matches!(
            ColumnType::from_name("blob"),
            Err(KradataError::BadFormat(_))
        ));
    }
}
