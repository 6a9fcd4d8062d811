use log::warn;

use crate::binxml::deserializer::{parse_fragment, ChunkCtx};
use crate::binxml::model::BinXmlTemplate;
use crate::err::{DeserializationError, DeserializationResult};
use crate::guid::Guid;
use crate::ntsid::Sid;
use crate::utils::{
    datetime_from_filetime, systime_from_bytes, utf16le_split_on_nul, ByteCursor,
};
use chrono::{DateTime, Utc};

/// The high bit of a value type byte flags an array of the base type.
pub const ARRAY_FLAG: u8 = 0x80;

/// A decoded BinXML value, as found in substitution arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum BinXmlValue {
    Null,
    String(String),
    /// Raw single-byte string, code page not interpreted.
    AnsiString(Vec<u8>),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    Bool(bool),
    Binary(Vec<u8>),
    Guid(Guid),
    FileTime(DateTime<Utc>),
    SysTime(DateTime<Utc>),
    Sid(Sid),
    HexInt32(u32),
    HexInt64(u64),
    /// An embedded BinXML fragment, normalized to a template instance.
    BinXml(Box<BinXmlTemplate>),
    StringArray(Vec<String>),
    UInt16Array(Vec<u16>),
    UInt64Array(Vec<u64>),
    /// A type the decoder does not interpret; the payload was skipped.
    Unknown { value_type: u8, offset: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinXmlValueType {
    NullType,
    StringType,
    AnsiStringType,
    Int8Type,
    UInt8Type,
    Int16Type,
    UInt16Type,
    Int32Type,
    UInt32Type,
    Int64Type,
    UInt64Type,
    Real32Type,
    Real64Type,
    BoolType,
    BinaryType,
    GuidType,
    SizeTType,
    FileTimeType,
    SysTimeType,
    SidType,
    HexInt32Type,
    HexInt64Type,
    EvtHandle,
    BinXmlType,
    EvtXmlType,
    StringArrayType,
    UInt16ArrayType,
    UInt64ArrayType,
}

impl BinXmlValueType {
    pub fn from_u8(byte: u8) -> Option<BinXmlValueType> {
        match byte {
            0x00 => Some(BinXmlValueType::NullType),
            0x01 => Some(BinXmlValueType::StringType),
            0x02 => Some(BinXmlValueType::AnsiStringType),
            0x03 => Some(BinXmlValueType::Int8Type),
            0x04 => Some(BinXmlValueType::UInt8Type),
            0x05 => Some(BinXmlValueType::Int16Type),
            0x06 => Some(BinXmlValueType::UInt16Type),
            0x07 => Some(BinXmlValueType::Int32Type),
            0x08 => Some(BinXmlValueType::UInt32Type),
            0x09 => Some(BinXmlValueType::Int64Type),
            0x0a => Some(BinXmlValueType::UInt64Type),
            0x0b => Some(BinXmlValueType::Real32Type),
            0x0c => Some(BinXmlValueType::Real64Type),
            0x0d => Some(BinXmlValueType::BoolType),
            0x0e => Some(BinXmlValueType::BinaryType),
            0x0f => Some(BinXmlValueType::GuidType),
            0x10 => Some(BinXmlValueType::SizeTType),
            0x11 => Some(BinXmlValueType::FileTimeType),
            0x12 => Some(BinXmlValueType::SysTimeType),
            0x13 => Some(BinXmlValueType::SidType),
            0x14 => Some(BinXmlValueType::HexInt32Type),
            0x15 => Some(BinXmlValueType::HexInt64Type),
            0x20 => Some(BinXmlValueType::EvtHandle),
            0x21 => Some(BinXmlValueType::BinXmlType),
            0x23 => Some(BinXmlValueType::EvtXmlType),
            0x81 => Some(BinXmlValueType::StringArrayType),
            0x86 => Some(BinXmlValueType::UInt16ArrayType),
            0x8a => Some(BinXmlValueType::UInt64ArrayType),
            _ => None,
        }
    }
}

impl BinXmlValue {
    /// Decodes a substitution value of `raw_type` and declared `size` from the
    /// cursor.
    ///
    /// `Null` does not consume its payload; the caller skips it. Types the
    /// decoder does not interpret (and array types beyond string/u16/u64) skip
    /// `size` bytes and surface as a diagnostic.
    pub(crate) fn deserialize_sized(
        raw_type: u8,
        size: u16,
        cursor: &mut ByteCursor<'_>,
        ctx: &ChunkCtx<'_>,
    ) -> DeserializationResult<BinXmlValue> {
        use BinXmlValueType::*;

        let skip_unknown = |cursor: &mut ByteCursor<'_>| -> DeserializationResult<BinXmlValue> {
            let offset = cursor.position();
            cursor.advance(usize::from(size), "unknown value payload")?;
            Ok(BinXmlValue::Unknown {
                value_type: raw_type,
                offset,
            })
        };

        let value = match BinXmlValueType::from_u8(raw_type) {
            Some(NullType) => BinXmlValue::Null,
            Some(StringType) => {
                BinXmlValue::String(cursor.utf16_by_size(usize::from(size), "string value")?)
            }
            Some(AnsiStringType) => BinXmlValue::AnsiString(
                cursor.take_bytes(usize::from(size), "ansi string value")?.to_vec(),
            ),
            Some(Int8Type) => BinXmlValue::Int8(cursor.i8()?),
            Some(UInt8Type) => BinXmlValue::UInt8(cursor.u8()?),
            Some(Int16Type) => BinXmlValue::Int16(cursor.i16()?),
            Some(UInt16Type) => BinXmlValue::UInt16(cursor.u16()?),
            Some(Int32Type) => BinXmlValue::Int32(cursor.i32()?),
            Some(UInt32Type) => BinXmlValue::UInt32(cursor.u32()?),
            Some(Int64Type) => BinXmlValue::Int64(cursor.i64()?),
            Some(UInt64Type) => BinXmlValue::UInt64(cursor.u64()?),
            Some(Real32Type) => BinXmlValue::Real32(cursor.f32()?),
            Some(Real64Type) => BinXmlValue::Real64(cursor.f64()?),
            Some(BoolType) => {
                let raw = cursor.i32_named("bool value")?;
                if raw != 0 && raw != 1 {
                    warn!("{raw} is an unusual value for bool, coercing to `true`");
                }
                BinXmlValue::Bool(raw != 0)
            }
            Some(BinaryType) => BinXmlValue::Binary(
                cursor.take_bytes(usize::from(size), "binary value")?.to_vec(),
            ),
            Some(GuidType) => BinXmlValue::Guid(Guid::from_cursor(cursor)?),
            Some(FileTimeType) => {
                BinXmlValue::FileTime(datetime_from_filetime(cursor.u64_named("filetime value")?))
            }
            Some(SysTimeType) => {
                let bytes = cursor.array::<16>("systime value")?;
                BinXmlValue::SysTime(systime_from_bytes(&bytes)?)
            }
            Some(SidType) => BinXmlValue::Sid(Sid::from_cursor(cursor)?),
            Some(HexInt32Type) => BinXmlValue::HexInt32(cursor.u32_named("hex32 value")?),
            Some(HexInt64Type) => BinXmlValue::HexInt64(cursor.u64_named("hex64 value")?),
            Some(BinXmlType) => {
                // The embedded fragment carries its own framing, `size` only
                // bounds it.
                let template = parse_fragment(cursor, ctx, true)?;
                BinXmlValue::BinXml(Box::new(template))
            }
            Some(StringArrayType) => {
                let bytes = cursor.take_bytes(usize::from(size), "string array value")?;
                BinXmlValue::StringArray(utf16le_split_on_nul(bytes))
            }
            Some(UInt16ArrayType) => {
                let bytes = cursor.take_bytes(usize::from(size) & !1, "u16 array value")?;
                BinXmlValue::UInt16Array(
                    bytes
                        .chunks_exact(2)
                        .map(|c| u16::from_le_bytes([c[0], c[1]]))
                        .collect(),
                )
            }
            Some(UInt64ArrayType) => {
                let count = usize::from(size) / 8;
                let bytes = cursor.take_bytes(count * 8, "u64 array value")?;
                BinXmlValue::UInt64Array(
                    bytes
                        .chunks_exact(8)
                        .map(|c| u64::from_le_bytes(c.try_into().expect("8-byte chunk")))
                        .collect(),
                )
            }
            Some(SizeTType) | Some(EvtHandle) | Some(EvtXmlType) | None => skip_unknown(cursor)?,
        };

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::deserializer::ChunkCtx;

    fn decode(raw_type: u8, size: u16, bytes: &[u8]) -> BinXmlValue {
        let mut cursor = ByteCursor::new(bytes);
        BinXmlValue::deserialize_sized(raw_type, size, &mut cursor, &ChunkCtx::empty()).unwrap()
    }

    #[test]
    fn test_decodes_integers() {
        assert_eq!(decode(0x04, 1, &[0x2a]), BinXmlValue::UInt8(42));
        assert_eq!(decode(0x06, 2, &[0xa1, 0x0f]), BinXmlValue::UInt16(4001));
        assert_eq!(
            decode(0x07, 4, &[0xff, 0xff, 0xff, 0xff]),
            BinXmlValue::Int32(-1)
        );
        assert_eq!(
            decode(0x0a, 8, &42u64.to_le_bytes()),
            BinXmlValue::UInt64(42)
        );
    }

    #[test]
    fn test_decodes_reals() {
        assert_eq!(
            decode(0x0b, 4, &1.5f32.to_le_bytes()),
            BinXmlValue::Real32(1.5)
        );
        assert_eq!(
            decode(0x0c, 8, &(-2.25f64).to_le_bytes()),
            BinXmlValue::Real64(-2.25)
        );
    }

    #[test]
    fn test_bool_is_32_bit_nonzero() {
        assert_eq!(decode(0x0d, 4, &[0, 0, 0, 0]), BinXmlValue::Bool(false));
        assert_eq!(decode(0x0d, 4, &[1, 0, 0, 0]), BinXmlValue::Bool(true));
        assert_eq!(decode(0x0d, 4, &[0, 2, 0, 0]), BinXmlValue::Bool(true));
    }

    #[test]
    fn test_string_trims_trailing_nuls() {
        let bytes = [0x41, 0x00, 0x42, 0x00, 0x00, 0x00];
        assert_eq!(
            decode(0x01, 6, &bytes),
            BinXmlValue::String("AB".to_string())
        );
    }

    #[test]
    fn test_string_array_splits_on_nul() {
        let mut bytes: Vec<u8> = "one".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend("two".encode_utf16().flat_map(|u| u.to_le_bytes()));
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(
            decode(0x81, bytes.len() as u16, &bytes),
            BinXmlValue::StringArray(vec!["one".to_string(), "two".to_string()])
        );
    }

    #[test]
    fn test_unknown_type_skips_payload() {
        let bytes = [0xde, 0xad, 0xbe, 0xef];
        let mut cursor = ByteCursor::new(&bytes);
        let value =
            BinXmlValue::deserialize_sized(0x8f, 4, &mut cursor, &ChunkCtx::empty()).unwrap();
        assert_eq!(
            value,
            BinXmlValue::Unknown {
                value_type: 0x8f,
                offset: 0
            }
        );
        assert_eq!(cursor.pos(), 4);
    }

    #[test]
    fn test_null_does_not_consume() {
        let bytes = [0x01, 0x02];
        let mut cursor = ByteCursor::new(&bytes);
        let value =
            BinXmlValue::deserialize_sized(0x00, 2, &mut cursor, &ChunkCtx::empty()).unwrap();
        assert_eq!(value, BinXmlValue::Null);
        assert_eq!(cursor.pos(), 0);
    }
}
