use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use log::{debug, warn};

use crate::err::Result;
use crate::evtx_chunk::EvtxChunk;
use crate::evtx_file::ReadSeek;
use crate::settings::ParserSettings;
use crate::{EventMap, CHUNK_SIZE};

const CHUNK_MAGIC: &[u8] = b"ElfChnk\x00";

/// Scan block size; blocks overlap by `CHUNK_MAGIC.len() - 1` bytes so a magic
/// spanning two reads is still found.
const SCAN_BLOCK_SIZE: usize = CHUNK_SIZE;

/// Recovers events from raw byte streams that are not (or no longer) valid
/// EVTX files: memory dumps, unallocated disk space, truncated logs.
///
/// The carver scans for the chunk magic from a starting offset and decodes
/// every hit best-effort; carving mode is implied regardless of the settings
/// passed in.
pub struct EvtxCarver<T: ReadSeek> {
    source: T,
    settings: Arc<ParserSettings>,
}

impl<T: ReadSeek> EvtxCarver<T> {
    pub fn from_read_seek(source: T) -> Self {
        EvtxCarver {
            source,
            settings: Arc::new(ParserSettings::default().carve_mode(true)),
        }
    }

    pub fn with_settings(mut self, settings: ParserSettings) -> Self {
        self.settings = Arc::new(settings.carve_mode(true));
        self
    }

    /// Offsets of every chunk magic found at or after `start_offset`.
    pub fn scan_chunk_offsets(&mut self, start_offset: u64) -> Result<Vec<u64>> {
        let mut offsets = Vec::new();
        let overlap = CHUNK_MAGIC.len() - 1;
        let mut block = vec![0_u8; SCAN_BLOCK_SIZE + overlap];
        let mut block_start = start_offset;

        self.source.seek(SeekFrom::Start(start_offset))?;

        loop {
            let read = read_full(&mut self.source, &mut block)?;
            if read < CHUNK_MAGIC.len() {
                break;
            }

            for hit in find_magic(&block[..read]) {
                offsets.push(block_start + hit as u64);
            }

            if read < block.len() {
                break;
            }

            // Rewind so a magic split across the block boundary is seen whole.
            block_start += SCAN_BLOCK_SIZE as u64;
            self.source
                .seek(SeekFrom::Start(block_start))?;
        }

        // A magic inside the overlap region is found by both blocks.
        offsets.dedup();

        Ok(offsets)
    }

    /// Decodes every chunk discovered at or after `start_offset`, yielding
    /// events in hit order. Damaged chunks contribute what they can.
    pub fn events(&mut self, start_offset: u64) -> Result<CarvedEvents> {
        let offsets = self.scan_chunk_offsets(start_offset)?;
        debug!("Carver found {} chunk candidates", offsets.len());

        let mut events = Vec::new();
        for offset in offsets {
            let mut data = vec![0_u8; CHUNK_SIZE];
            self.source.seek(SeekFrom::Start(offset))?;
            let read = read_full(&mut self.source, &mut data)?;
            if read < crate::CHUNK_HEADER_SIZE {
                continue;
            }
            // A truncated tail decodes as a zero-padded chunk.
            data[read..].fill(0);

            let chunk = match EvtxChunk::parse(offset, data, &self.settings) {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!("Carver skipping chunk candidate at offset {offset}: {err}");
                    continue;
                }
            };

            for event in chunk.events(&self.settings) {
                match event {
                    Ok(map) => events.push(map),
                    Err(err) => debug!("Carver skipping record at offset {offset}: {err}"),
                }
            }
        }

        Ok(CarvedEvents {
            events: events.into_iter(),
        })
    }
}

/// Reads until the buffer is full or the stream ends, returning the number of
/// bytes read.
fn read_full<T: ReadSeek>(source: &mut T, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = source.read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn find_magic(haystack: &[u8]) -> impl Iterator<Item = usize> + '_ {
    haystack
        .windows(CHUNK_MAGIC.len())
        .enumerate()
        .filter(|(_, window)| *window == CHUNK_MAGIC)
        .map(|(index, _)| index)
}

pub struct CarvedEvents {
    events: std::vec::IntoIter<EventMap>,
}

impl Iterator for CarvedEvents {
    type Item = EventMap;

    fn next(&mut self) -> Option<EventMap> {
        self.events.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_finds_magic_at_arbitrary_offsets() {
        let mut data = vec![0xcc_u8; 100];
        data.extend_from_slice(CHUNK_MAGIC);
        data.extend(vec![0xcc_u8; 50]);
        data.extend_from_slice(CHUNK_MAGIC);

        let mut carver = EvtxCarver::from_read_seek(Cursor::new(data));
        let offsets = carver.scan_chunk_offsets(0).unwrap();
        assert_eq!(offsets, vec![100, 158]);
    }

    #[test]
    fn test_scan_respects_start_offset() {
        let mut data = Vec::new();
        data.extend_from_slice(CHUNK_MAGIC);
        data.extend(vec![0_u8; 32]);
        data.extend_from_slice(CHUNK_MAGIC);

        let mut carver = EvtxCarver::from_read_seek(Cursor::new(data));
        let offsets = carver.scan_chunk_offsets(1).unwrap();
        assert_eq!(offsets, vec![40]);
    }

    #[test]
    fn test_empty_stream_has_no_chunks() {
        let mut carver = EvtxCarver::from_read_seek(Cursor::new(Vec::new()));
        assert!(carver.scan_chunk_offsets(0).unwrap().is_empty());
    }
}
