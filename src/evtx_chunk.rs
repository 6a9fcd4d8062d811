use log::{debug, trace, warn};

use crate::binxml::assemble;
use crate::binxml::deserializer::{parse_fragment, ChunkCtx};
use crate::err::{DeserializationError, DeserializationResult, EvtxError, Result};
use crate::evtx_record::EvtxRecordHeader;
use crate::settings::ParserSettings;
use crate::string_cache::StringCache;
use crate::template_cache::TemplateCache;
use crate::utils::ByteCursor;
use crate::{
    checksum_ieee, ChunkOffset, EventMap, CHUNK_HEADER_SIZE, CHUNK_SIZE, EVENT_HEADER_SIZE,
    STRING_BUCKETS, TEMPLATE_BUCKETS,
};

/// The offset right after the string and template tables, where event records
/// begin.
const CHUNK_DATA_START: usize = CHUNK_HEADER_SIZE + STRING_BUCKETS * 4 + TEMPLATE_BUCKETS * 4;

/// The 128-byte header of a 64 KiB chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtxChunkHeader {
    pub num_first_rec_log: i64,
    pub num_last_rec_log: i64,
    pub first_event_record_id: i64,
    pub last_event_record_id: i64,
    pub size_header: i32,
    pub offset_last_record: i32,
    pub free_space: i32,
    pub checksum: u32,
}

impl EvtxChunkHeader {
    pub fn from_bytes(buf: &[u8]) -> DeserializationResult<EvtxChunkHeader> {
        let mut cursor = ByteCursor::new(buf);

        let magic = cursor.array::<8>("chunk header magic")?;
        if &magic != b"ElfChnk\x00" {
            return Err(DeserializationError::InvalidEvtxChunkMagic { magic });
        }

        let num_first_rec_log = cursor.i64_named("chunk num_first_rec_log")?;
        let num_last_rec_log = cursor.i64_named("chunk num_last_rec_log")?;
        let first_event_record_id = cursor.i64_named("chunk first_event_record_id")?;
        let last_event_record_id = cursor.i64_named("chunk last_event_record_id")?;
        let size_header = cursor.i32_named("chunk size_header")?;
        let offset_last_record = cursor.i32_named("chunk offset_last_record")?;
        let free_space = cursor.i32_named("chunk free_space")?;
        let checksum = cursor.u32_named("chunk checksum")?;

        Ok(EvtxChunkHeader {
            num_first_rec_log,
            num_last_rec_log,
            first_event_record_id,
            last_event_record_id,
            size_header,
            offset_last_record,
            free_space,
            checksum,
        })
    }

    pub fn validate(&self) -> DeserializationResult<()> {
        if self.size_header != CHUNK_HEADER_SIZE as i32 {
            return Err(DeserializationError::InvalidChunkHeaderSize {
                size: self.size_header,
            });
        }
        if !(0..CHUNK_SIZE as i32).contains(&self.offset_last_record) {
            return Err(DeserializationError::InvalidLastRecordOffset {
                offset: self.offset_last_record,
            });
        }
        Ok(())
    }
}

/// A fully loaded chunk: its owned 64 KiB backing bytes, the parsed string
/// and template tables, and the offsets of the events it frames.
///
/// A chunk is self-contained: once loaded, event decoding never touches the
/// underlying file, so chunks can be decoded on worker threads independently.
pub struct EvtxChunk {
    /// Absolute file offset the chunk was read from, for diagnostics.
    pub offset: u64,
    pub header: EvtxChunkHeader,
    pub data: Vec<u8>,
    pub string_cache: StringCache,
    pub template_cache: TemplateCache,
    pub event_offsets: Vec<ChunkOffset>,
}

impl EvtxChunk {
    /// Parses a chunk from its 64 KiB backing bytes.
    ///
    /// In carving mode, table failures demote to warnings and invalid event
    /// headers trigger a one-byte slide instead of aborting the chunk.
    pub fn parse(
        offset: u64,
        data: Vec<u8>,
        settings: &ParserSettings,
    ) -> DeserializationResult<EvtxChunk> {
        let header = EvtxChunkHeader::from_bytes(&data)?;
        header.validate()?;

        if settings.should_validate_checksums() {
            validate_data_checksum(&data, &header)?;
        }

        let mut cursor = ByteCursor::with_pos(&data, header.size_header as usize)?;

        let mut string_offsets = [0_u32; STRING_BUCKETS];
        for slot in string_offsets.iter_mut() {
            *slot = cursor.u32_named("string table bucket")?;
        }

        let mut template_offsets = [0_u32; TEMPLATE_BUCKETS];
        for slot in template_offsets.iter_mut() {
            *slot = cursor.u32_named("template table bucket")?;
        }

        debug!("Initializing string cache");
        let string_cache = match StringCache::populate(&data, &string_offsets) {
            Ok(cache) => cache,
            Err(err) if settings.should_carve() => {
                warn!("Failed to build string cache: {err}");
                StringCache::default()
            }
            Err(err) => return Err(err),
        };

        debug!("Initializing template cache");
        let template_cache =
            TemplateCache::populate(&data, &template_offsets, settings.should_carve())?;

        let event_offsets = parse_event_offsets(&data, &header, settings.should_carve())?;

        Ok(EvtxChunk {
            offset,
            header,
            data,
            string_cache,
            template_cache,
            event_offsets,
        })
    }

    /// Decodes the event framed at a chunk-relative offset into an event map.
    pub fn parse_event_at(
        &self,
        offset: ChunkOffset,
        settings: &ParserSettings,
    ) -> Result<EventMap> {
        let record_header = EvtxRecordHeader::from_bytes_at(&self.data, offset as usize)
            .map_err(EvtxError::from)?;

        trace!(
            "Record {} at chunk offset {}",
            record_header.event_record_id,
            offset
        );

        let record_id = record_header.event_record_id;
        let wrap = move |source: DeserializationError| EvtxError::FailedToParseRecord {
            record_id,
            source: Box::new(source),
        };

        let mut cursor = ByteCursor::with_pos(&self.data, offset as usize + EVENT_HEADER_SIZE)
            .map_err(wrap)?;
        let ctx = ChunkCtx::new(&self.string_cache, &self.template_cache);

        let template = parse_fragment(&mut cursor, &ctx, false).map_err(wrap)?;
        assemble::event_map(&template, settings.should_carve()).map_err(wrap)
    }

    /// Iterates the chunk's events in stored offset order.
    pub fn events<'a>(
        &'a self,
        settings: &'a ParserSettings,
    ) -> impl Iterator<Item = Result<EventMap>> + 'a {
        self.event_offsets
            .iter()
            .map(move |&offset| self.parse_event_at(offset, settings))
    }
}

fn validate_data_checksum(data: &[u8], header: &EvtxChunkHeader) -> DeserializationResult<()> {
    let free_space = header.free_space as usize;
    if free_space < CHUNK_DATA_START || free_space > data.len() {
        // Nothing trustworthy to hash over.
        return Ok(());
    }

    let computed = checksum_ieee(&data[CHUNK_DATA_START..free_space]);
    if computed != header.checksum {
        return Err(DeserializationError::InvalidChunkChecksum {
            expected: header.checksum,
            found: computed,
        });
    }
    Ok(())
}

/// Walks the event frames, starting right after the template table and
/// stopping once the next offset would pass the last-record offset.
fn parse_event_offsets(
    data: &[u8],
    header: &EvtxChunkHeader,
    carve_mode: bool,
) -> DeserializationResult<Vec<ChunkOffset>> {
    let mut offsets = Vec::new();
    let mut offset = CHUNK_DATA_START as u32;
    let last_record_offset = header.offset_last_record as u32;

    while offset <= last_record_offset {
        match EvtxRecordHeader::from_bytes_at(data, offset as usize) {
            Ok(record_header) => {
                offsets.push(offset);
                offset = offset.saturating_add(record_header.data_size);
            }
            Err(err) => {
                if !carve_mode {
                    return Err(err);
                }
                // Brute-force the next valid event frame.
                offset += 1;
            }
        }
    }

    Ok(offsets)
}
