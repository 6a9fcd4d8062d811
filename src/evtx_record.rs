use chrono::{DateTime, Utc};

use crate::err::{DeserializationError, DeserializationResult};
use crate::utils::{datetime_from_filetime, ByteCursor};
use crate::{CHUNK_SIZE, EVENT_HEADER_SIZE};

pub type RecordId = u64;

/// The 24-byte header framing each event record inside a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtxRecordHeader {
    /// Total record size, including this header and the trailing size copy.
    pub data_size: u32,
    pub event_record_id: RecordId,
    pub timestamp: DateTime<Utc>,
}

impl EvtxRecordHeader {
    /// Parses and validates a record header at `offset` inside `buf`.
    ///
    /// A record is embedded in a chunk, so its size can never reach the chunk
    /// size, and it can never be smaller than its own header.
    pub fn from_bytes_at(buf: &[u8], offset: usize) -> DeserializationResult<EvtxRecordHeader> {
        let mut cursor = ByteCursor::with_pos(buf, offset)?;

        let magic = cursor.array::<4>("record header magic")?;
        if &magic != b"\x2a\x2a\x00\x00" {
            return Err(DeserializationError::InvalidEvtxRecordHeaderMagic { magic });
        }

        let data_size = cursor.u32_named("record data size")?;
        if (data_size as usize) < EVENT_HEADER_SIZE || (data_size as usize) >= CHUNK_SIZE {
            return Err(DeserializationError::InvalidRecordSize { size: data_size });
        }

        let event_record_id = cursor.u64_named("event record id")?;
        let filetime = cursor.u64_named("record timestamp")?;

        Ok(EvtxRecordHeader {
            data_size,
            event_record_id,
            timestamp: datetime_from_filetime(filetime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::format_utc;

    pub(crate) fn record_header_bytes(size: u32, id: u64, filetime: u64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(EVENT_HEADER_SIZE);
        bytes.extend_from_slice(b"\x2a\x2a\x00\x00");
        bytes.extend_from_slice(&size.to_le_bytes());
        bytes.extend_from_slice(&id.to_le_bytes());
        bytes.extend_from_slice(&filetime.to_le_bytes());
        bytes
    }

    #[test]
    fn test_parses_record_header() {
        let bytes = record_header_bytes(0x1c8, 42, 0x01D1_B3B0_A8E8_F000);
        let header = EvtxRecordHeader::from_bytes_at(&bytes, 0).unwrap();
        assert_eq!(header.data_size, 0x1c8);
        assert_eq!(header.event_record_id, 42);
        assert_eq!(
            format_utc(&header.timestamp),
            "2016-05-21T22:32:29.990912000Z"
        );
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = record_header_bytes(100, 1, 0);
        bytes[0] = 0x00;
        assert!(matches!(
            EvtxRecordHeader::from_bytes_at(&bytes, 0),
            Err(DeserializationError::InvalidEvtxRecordHeaderMagic { .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range_sizes() {
        let too_small = record_header_bytes(23, 1, 0);
        assert!(matches!(
            EvtxRecordHeader::from_bytes_at(&too_small, 0),
            Err(DeserializationError::InvalidRecordSize { size: 23 })
        ));

        let too_big = record_header_bytes(0x10000, 1, 0);
        assert!(matches!(
            EvtxRecordHeader::from_bytes_at(&too_big, 0),
            Err(DeserializationError::InvalidRecordSize { size: 0x10000 })
        ));
    }
}
