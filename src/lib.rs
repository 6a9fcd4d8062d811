#![deny(unused_must_use)]
#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]
#[macro_use]
extern crate bitflags;

pub use carve::{CarvedEvents, EvtxCarver};
pub use err::{DeserializationError, EvtxError, Result};
pub use event_map::{
    EventMap, MapValue, CHANNEL_PATH, EVENT_ID_PATH, EVENT_ID_VALUE_PATH, EVENT_RECORD_ID_PATH,
    SYSTEM_TIME_PATH, USER_ID_PATH,
};
pub use evtx_chunk::{EvtxChunk, EvtxChunkHeader};
pub use evtx_file::{EventStream, Events, EvtxFile, RawChunk, ReadSeek};
pub use evtx_file_header::{EvtxFileHeader, HeaderFlags};
pub use evtx_record::{EvtxRecordHeader, RecordId};
pub use guid::Guid;
pub use ntsid::Sid;
pub use settings::ParserSettings;

pub mod binxml;
mod carve;
pub mod err;
mod event_map;
mod evtx_chunk;
mod evtx_file;
mod evtx_file_header;
mod evtx_record;
mod guid;
mod ntsid;
mod settings;
mod string_cache;
mod template_cache;
mod utils;

/// An offset relative to the start of a chunk.
pub type ChunkOffset = u32;
/// An absolute file offset.
pub type FileOffset = u64;

pub const CHUNK_SIZE: usize = 0x10000;
pub const CHUNK_HEADER_SIZE: usize = 128;
pub const EVENT_HEADER_SIZE: usize = 24;
pub const STRING_BUCKETS: usize = 64;
pub const TEMPLATE_BUCKETS: usize = 32;
/// Sentinel for a name reference that has not been resolved yet.
pub const DEFAULT_NAME_OFFSET: i32 = -1;

use crc32fast::Hasher;

#[inline]
pub fn checksum_ieee(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

// For tests, we only initialize logging once.
#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
