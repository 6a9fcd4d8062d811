use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::err::{DeserializationError, DeserializationResult};

/// The fixed 4096-byte block at the start of an EVTX file. Only the first 128
/// bytes carry data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtxFileHeader {
    pub first_chunk_number: u64,
    pub last_chunk_number: u64,
    pub next_record_id: u64,
    pub header_size: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub chunk_data_offset: u16,
    pub chunk_count: u16,
    pub flags: HeaderFlags,
    // Checksum is of the first 120 bytes of the header
    pub checksum: u32,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        const EMPTY = 0x0;
        const DIRTY = 0x1;
        const FULL = 0x2;
        const NO_CRC32 = 0x4;
    }
}

impl EvtxFileHeader {
    pub fn from_stream<T: Read + Seek>(stream: &mut T) -> DeserializationResult<EvtxFileHeader> {
        let mut magic = [0_u8; 8];
        stream.read_exact(&mut magic)?;
        if &magic != b"ElfFile\x00" {
            return Err(DeserializationError::InvalidEvtxFileHeaderMagic { magic });
        }

        let first_chunk_number = stream.read_u64::<LittleEndian>()?;
        let last_chunk_number = stream.read_u64::<LittleEndian>()?;
        let next_record_id = stream.read_u64::<LittleEndian>()?;
        let header_size = stream.read_u32::<LittleEndian>()?;
        let minor_version = stream.read_u16::<LittleEndian>()?;
        let major_version = stream.read_u16::<LittleEndian>()?;
        let chunk_data_offset = stream.read_u16::<LittleEndian>()?;
        let chunk_count = stream.read_u16::<LittleEndian>()?;

        // reserved
        stream.seek(SeekFrom::Current(76))?;

        let raw_flags = stream.read_u32::<LittleEndian>()?;
        let flags = HeaderFlags::from_bits_truncate(raw_flags);
        let checksum = stream.read_u32::<LittleEndian>()?;

        Ok(EvtxFileHeader {
            first_chunk_number,
            last_chunk_number,
            next_record_id,
            header_size,
            minor_version,
            major_version,
            chunk_data_offset,
            chunk_count,
            flags,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    pub(crate) fn header_bytes() -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4096);
        bytes.extend_from_slice(b"ElfFile\x00");
        bytes.extend_from_slice(&0u64.to_le_bytes()); // first chunk
        bytes.extend_from_slice(&25u64.to_le_bytes()); // last chunk
        bytes.extend_from_slice(&2226u64.to_le_bytes()); // next record id
        bytes.extend_from_slice(&128u32.to_le_bytes()); // header size
        bytes.extend_from_slice(&1u16.to_le_bytes()); // minor
        bytes.extend_from_slice(&3u16.to_le_bytes()); // major
        bytes.extend_from_slice(&4096u16.to_le_bytes()); // chunk data offset
        bytes.extend_from_slice(&26u16.to_le_bytes()); // chunk count
        bytes.extend_from_slice(&[0u8; 76]);
        bytes.extend_from_slice(&1u32.to_le_bytes()); // flags: dirty
        bytes.extend_from_slice(&0u32.to_le_bytes()); // checksum
        bytes.resize(4096, 0);
        bytes
    }

    #[test]
    fn test_parses_file_header() {
        let bytes = header_bytes();
        let mut reader = Cursor::new(bytes.as_slice());
        let header = EvtxFileHeader::from_stream(&mut reader).unwrap();

        assert_eq!(
            header,
            EvtxFileHeader {
                first_chunk_number: 0,
                last_chunk_number: 25,
                next_record_id: 2226,
                header_size: 128,
                minor_version: 1,
                major_version: 3,
                chunk_data_offset: 4096,
                chunk_count: 26,
                flags: HeaderFlags::DIRTY,
                checksum: 0,
            }
        );
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = header_bytes();
        bytes[0] = b'X';
        let mut reader = Cursor::new(bytes.as_slice());
        assert!(matches!(
            EvtxFileHeader::from_stream(&mut reader),
            Err(DeserializationError::InvalidEvtxFileHeaderMagic { .. })
        ));
    }
}
