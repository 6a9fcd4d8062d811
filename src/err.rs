use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;

/// Errors raised while decoding binary structures (headers, BinXML, values).
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("Invalid EVTX file header magic, expected `ElfFile0`, found `{magic:02X?}`")]
    InvalidEvtxFileHeaderMagic { magic: [u8; 8] },

    #[error("Invalid EVTX chunk header magic, expected `ElfChnk0`, found `{magic:02X?}`")]
    InvalidEvtxChunkMagic { magic: [u8; 8] },

    #[error("Invalid EVTX record header magic, expected `2a2a0000`, found `{magic:02X?}`")]
    InvalidEvtxRecordHeaderMagic { magic: [u8; 4] },

    #[error("Invalid chunk header size {size}, expected 128")]
    InvalidChunkHeaderSize { size: i32 },

    #[error("Last record offset {offset} exceeds the chunk size")]
    InvalidLastRecordOffset { offset: i32 },

    #[error("Invalid event record size {size}, expected a value in [24, 65536)")]
    InvalidRecordSize { size: u32 },

    #[error("chunk data CRC32 invalid, expected {expected:08x}, found {found:08x}")]
    InvalidChunkChecksum { expected: u32, found: u32 },

    #[error("Offset {offset}: tried to read an invalid byte `0x{value:02x}` as a binxml token")]
    InvalidToken { value: u8, offset: u64 },

    #[error("Offset {offset}: tried to read an invalid byte `0x{value:02x}` as a binxml value type")]
    InvalidValueVariant { value: u8, offset: u64 },

    #[error("Offset {offset}: unexpected value type `0x{found:02x}`, expected `0x{expected:02x}`")]
    UnexpectedValueType { expected: u8, found: u8, offset: u64 },

    #[error("Substitution index {index} is out of range (value array holds {count} values)")]
    SubstitutionIndexOutOfRange { index: u16, count: usize },

    #[error("Substitution array claims {count} values, refusing to allocate")]
    TooManySubstitutions { count: i64 },

    #[error("Offset {offset}: truncated read of {what}, needed {need} bytes, had {have}")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("Unknown entity reference `{name}`")]
    UnknownEntityRef { name: String },

    #[error("Content element `{what}` has no event map representation")]
    UnexpectedContentElement { what: &'static str },

    #[error("Invalid date time")]
    InvalidDateTime,

    #[error("An I/O error has occurred")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Crate-level errors, wrapping deserialization failures and event map misses.
#[derive(Debug, Error)]
pub enum EvtxError {
    #[error(transparent)]
    Deserialization(#[from] DeserializationError),

    #[error("An I/O error has occurred")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Failed to open file {}", path.display())]
    FailedToOpenFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[error("Failed to decode record {record_id}")]
    FailedToParseRecord {
        record_id: u64,
        source: Box<DeserializationError>,
    },

    #[error("No element at path `{path}`")]
    PathNotFound { path: String },

    #[error("Element at path `{path}` cannot be read as {expected}")]
    ValueConversion {
        path: String,
        expected: &'static str,
    },

    #[error("Key `{key}` already present in event map")]
    DuplicateKey { key: String },
}
