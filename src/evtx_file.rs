use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;

use log::{debug, info, warn};

use crate::err::{DeserializationResult, EvtxError, Result};
use crate::evtx_chunk::{EvtxChunk, EvtxChunkHeader};
use crate::evtx_file_header::EvtxFileHeader;
use crate::settings::ParserSettings;
use crate::{EventMap, CHUNK_HEADER_SIZE, CHUNK_SIZE};

/// Depth of each per-chunk event queue; decode workers suspend at `send` when
/// the consumer lags.
const EVENT_QUEUE_DEPTH: usize = 64;

pub trait ReadSeek: Read + Seek {
    fn tell(&mut self) -> io::Result<u64> {
        self.stream_position()
    }
}

impl<T: Read + Seek> ReadSeek for T {}

/// A chunk header with the file offset it was read from; enough to order
/// chunks without loading their bodies.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub offset: u64,
    pub header: EvtxChunkHeader,
}

/// The shared byte source. The seek position is the only piece of state the
/// reading side shares, so a single mutex around the source serializes all
/// file access; everything downstream works on owned chunk buffers.
struct FileSource<T> {
    source: Mutex<T>,
    header: RwLock<EvtxFileHeader>,
}

impl<T: ReadSeek> FileSource<T> {
    fn lock_source(&self) -> io::Result<MutexGuard<'_, T>> {
        self.source
            .lock()
            .map_err(|_| io::Error::other("evtx source mutex poisoned"))
    }

    fn header(&self) -> EvtxFileHeader {
        match self.header.read() {
            Ok(header) => header.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-reads the file header; monitoring uses this to observe growth.
    fn reparse_header(&self) -> DeserializationResult<()> {
        let mut source = self.lock_source()?;
        source.seek(SeekFrom::Start(0))?;
        let parsed = EvtxFileHeader::from_stream(&mut *source)?;
        drop(source);

        match self.header.write() {
            Ok(mut header) => *header = parsed,
            Err(poisoned) => *poisoned.into_inner() = parsed,
        }
        Ok(())
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut source = self.lock_source()?;
        source.seek(SeekFrom::Start(offset))?;
        source.read_exact(buf)
    }

    fn fetch_raw_chunk(&self, offset: u64) -> DeserializationResult<RawChunk> {
        let mut buf = [0_u8; CHUNK_HEADER_SIZE];
        self.read_exact_at(offset, &mut buf)?;
        let header = EvtxChunkHeader::from_bytes(&buf)?;
        Ok(RawChunk { offset, header })
    }

    fn fetch_chunk_data(&self, offset: u64) -> DeserializationResult<Vec<u8>> {
        let mut buf = vec![0_u8; CHUNK_SIZE];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

fn chunk_offset(header: &EvtxFileHeader, index: u16) -> u64 {
    u64::from(header.chunk_data_offset) + u64::from(index) * CHUNK_SIZE as u64
}

/// An EVTX file: a seekable byte source plus its parsed header.
///
/// The source is held exclusively. Chunk loads copy the chunk into an owned
/// buffer under the source lock, so decoding is free of I/O and safe to run
/// on background workers.
pub struct EvtxFile<T: ReadSeek> {
    inner: Arc<FileSource<T>>,
    settings: Arc<ParserSettings>,
}

impl EvtxFile<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| EvtxError::FailedToOpenFile {
            source,
            path: path.to_path_buf(),
        })?;
        Self::from_read_seek(file)
    }
}

impl<T: ReadSeek> EvtxFile<T> {
    pub fn from_read_seek(mut source: T) -> Result<Self> {
        let header = EvtxFileHeader::from_stream(&mut source)
            .map_err(EvtxError::from)?;

        // Best effort only: the file may still be growing under a live writer.
        if let Ok(len) = source.seek(SeekFrom::End(0)) {
            let expected =
                u64::from(header.chunk_data_offset) + u64::from(header.chunk_count) * CHUNK_SIZE as u64;
            if expected > len {
                debug!(
                    "File is {len} bytes but the header declares {} chunks ({expected} bytes); it may still be growing",
                    header.chunk_count
                );
            }
        }

        Ok(EvtxFile {
            inner: Arc::new(FileSource {
                source: Mutex::new(source),
                header: RwLock::new(header),
            }),
            settings: Arc::new(ParserSettings::default()),
        })
    }

    pub fn with_settings(mut self, settings: ParserSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    pub fn header(&self) -> EvtxFileHeader {
        self.inner.header()
    }

    pub fn reparse_header(&self) -> Result<()> {
        self.inner.reparse_header().map_err(EvtxError::from)
    }

    /// Raw chunk headers in file order. Unreadable slots (e.g. a partially
    /// appended chunk at the end of a growing file) are skipped.
    pub fn unordered_chunks(&self) -> Vec<RawChunk> {
        let header = self.inner.header();
        let mut chunks = Vec::with_capacity(usize::from(header.chunk_count));
        for index in 0..header.chunk_count {
            let offset = chunk_offset(&header, index);
            match self.inner.fetch_raw_chunk(offset) {
                Ok(raw) => chunks.push(raw),
                Err(err) => {
                    warn!("Skipping unreadable chunk {index} at offset {offset}: {err}");
                }
            }
        }
        chunks
    }

    /// Raw chunk headers sorted ascending by their first record number. The
    /// file lays chunks out newest-first; sorting restores record order.
    pub fn chunks(&self) -> Vec<RawChunk> {
        let mut chunks = self.unordered_chunks();
        chunks.sort_by_key(|chunk| chunk.header.num_first_rec_log);
        chunks
    }

    /// Loads and fully parses the chunk at a file offset.
    pub fn fetch_chunk(&self, offset: u64) -> Result<EvtxChunk> {
        let data = self.inner.fetch_chunk_data(offset)?;
        EvtxChunk::parse(offset, data, &self.settings).map_err(EvtxError::from)
    }

    /// Serial event iteration in ascending record order. Undecodable records
    /// and chunks are logged and skipped.
    pub fn events(&self) -> Events<'_, T> {
        Events {
            file: self,
            chunks: self.chunks().into_iter(),
            current: Vec::new().into_iter(),
        }
    }

    /// Pipelined event iteration in ascending record order: chunks are
    /// decoded on background workers, at most `max_jobs` in flight.
    pub fn fast_events(&self) -> EventStream
    where
        T: Send + 'static,
    {
        self.spawn_pipeline(self.chunks())
    }

    /// Same pipeline as [`EvtxFile::fast_events`] fed with chunks in file
    /// order; no ordering guarantee across chunks.
    pub fn unordered_events(&self) -> EventStream
    where
        T: Send + 'static,
    {
        self.spawn_pipeline(self.unordered_chunks())
    }

    fn spawn_pipeline(&self, raw_chunks: Vec<RawChunk>) -> EventStream
    where
        T: Send + 'static,
    {
        let (chunk_tx, chunk_rx) = mpsc::sync_channel(self.settings.get_max_jobs());
        let inner = Arc::clone(&self.inner);
        let settings = Arc::clone(&self.settings);

        thread::spawn(move || {
            for raw in raw_chunks {
                let data = match inner.fetch_chunk_data(raw.offset) {
                    Ok(data) => data,
                    Err(err) => {
                        warn!("Skipping chunk at offset {}: {err}", raw.offset);
                        continue;
                    }
                };
                let events = spawn_chunk_worker(raw.offset, data, Arc::clone(&settings));
                if chunk_tx.send(events).is_err() {
                    // Consumer is gone.
                    return;
                }
            }
        });

        EventStream {
            chunk_rx,
            current: None,
        }
    }

    /// Watches a growing file, emitting events of chunks not seen before.
    ///
    /// Each sampling pass reparses the file header, deduplicates chunks by
    /// their record-ID endpoints and emits the new ones in ascending record
    /// order. Unless the settings ask for existing events, the first pass only
    /// marks what is already there. The monitor stops on the stop channel
    /// (sending a value, or dropping the sender) and when the chunk count
    /// saturates its 16-bit field.
    pub fn monitor_events(&self, stop: Receiver<()>) -> EventStream
    where
        T: Send + 'static,
    {
        let (chunk_tx, chunk_rx) = mpsc::sync_channel(self.settings.get_max_jobs());
        let inner = Arc::clone(&self.inner);
        let settings = Arc::clone(&self.settings);

        thread::spawn(move || monitor_loop(inner, settings, stop, chunk_tx));

        EventStream {
            chunk_rx,
            current: None,
        }
    }
}

fn should_stop(stop: &Receiver<()>) -> bool {
    // A dropped sender stops the monitor as well.
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

fn monitor_loop<T: ReadSeek + Send + 'static>(
    inner: Arc<FileSource<T>>,
    settings: Arc<ParserSettings>,
    stop: Receiver<()>,
    chunk_tx: SyncSender<Receiver<EventMap>>,
) {
    let mut seen: HashSet<i64> = HashSet::new();
    let mut silent_pass = !settings.should_monitor_existing();

    loop {
        if should_stop(&stop) {
            return;
        }

        if let Err(err) = inner.reparse_header() {
            warn!("Monitor failed to reparse the file header: {err}");
            thread::sleep(settings.get_monitor_sleep());
            continue;
        }
        let header = inner.header();

        let mut current_ids: HashSet<i64> = HashSet::new();
        let mut fresh: Vec<RawChunk> = Vec::new();

        for index in 0..header.chunk_count {
            let offset = chunk_offset(&header, index);
            let raw = match inner.fetch_raw_chunk(offset) {
                Ok(raw) => raw,
                Err(err) => {
                    debug!("Monitor skipping chunk {index} at offset {offset}: {err}");
                    continue;
                }
            };

            let first = raw.header.first_event_record_id;
            let last = raw.header.last_event_record_id;
            current_ids.insert(first);
            current_ids.insert(last);

            if seen.contains(&first) && seen.contains(&last) {
                continue;
            }
            seen.insert(first);
            seen.insert(last);

            if !silent_pass {
                fresh.push(raw);
            }
        }

        // Drop markers of chunks that disappeared, e.g. when the log wrapped.
        seen.retain(|id| current_ids.contains(id));
        silent_pass = false;

        fresh.sort_by_key(|raw| raw.header.num_first_rec_log);

        for raw in fresh {
            if should_stop(&stop) {
                return;
            }
            match inner.fetch_chunk_data(raw.offset) {
                Ok(data) => {
                    let events = spawn_chunk_worker(raw.offset, data, Arc::clone(&settings));
                    if chunk_tx.send(events).is_err() {
                        return;
                    }
                }
                Err(err) => warn!("Monitor failed to load chunk at offset {}: {err}", raw.offset),
            }
        }

        if header.chunk_count == u16::MAX {
            info!("Monitoring stopped: maximum chunk count reached");
            return;
        }

        thread::sleep(settings.get_monitor_sleep());
    }
}

/// Decodes one chunk on a worker thread, streaming its events through a
/// bounded queue.
fn spawn_chunk_worker(
    offset: u64,
    data: Vec<u8>,
    settings: Arc<ParserSettings>,
) -> Receiver<EventMap> {
    let (event_tx, event_rx) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);

    thread::spawn(move || {
        let chunk = match EvtxChunk::parse(offset, data, &settings) {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!("Skipping chunk at offset {offset}: {err}");
                return;
            }
        };

        for event in chunk.events(&settings) {
            match event {
                Ok(map) => {
                    if event_tx.send(map).is_err() {
                        return;
                    }
                }
                Err(err) => warn!("Skipping record in chunk at offset {offset}: {err}"),
            }
        }
    });

    event_rx
}

/// Serial iterator over all events, chunk by chunk.
pub struct Events<'a, T: ReadSeek> {
    file: &'a EvtxFile<T>,
    chunks: std::vec::IntoIter<RawChunk>,
    current: std::vec::IntoIter<EventMap>,
}

impl<T: ReadSeek> Iterator for Events<'_, T> {
    type Item = EventMap;

    fn next(&mut self) -> Option<EventMap> {
        loop {
            if let Some(event) = self.current.next() {
                return Some(event);
            }

            let raw = self.chunks.next()?;
            match self.file.fetch_chunk(raw.offset) {
                Ok(chunk) => {
                    let settings = self.file.settings();
                    let events: Vec<EventMap> = chunk
                        .events(settings)
                        .filter_map(|event| match event {
                            Ok(map) => Some(map),
                            Err(err) => {
                                warn!(
                                    "Skipping record in chunk at offset {}: {err}",
                                    raw.offset
                                );
                                None
                            }
                        })
                        .collect();
                    self.current = events.into_iter();
                }
                Err(err) => {
                    warn!("Skipping chunk at offset {}: {err}", raw.offset);
                }
            }
        }
    }
}

/// Iterator over the pipelined event queues, draining per-chunk receivers in
/// the order their chunks were scheduled.
pub struct EventStream {
    chunk_rx: Receiver<Receiver<EventMap>>,
    current: Option<Receiver<EventMap>>,
}

impl Iterator for EventStream {
    type Item = EventMap;

    fn next(&mut self) -> Option<EventMap> {
        loop {
            if let Some(events) = &self.current {
                match events.recv() {
                    Ok(event) => return Some(event),
                    Err(_) => self.current = None,
                }
            } else {
                match self.chunk_rx.recv() {
                    Ok(events) => self.current = Some(events),
                    Err(_) => return None,
                }
            }
        }
    }
}
