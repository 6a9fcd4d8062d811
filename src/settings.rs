use std::thread;
use std::time::Duration;

/// Decoder configuration, threaded explicitly through the reader instead of
/// living in process-wide globals. A default instance matches the historical
/// defaults: strict decoding, 250 ms monitor sampling, `cpus / 2` pipeline
/// depth.
#[derive(Debug, Clone)]
pub struct ParserSettings {
    carve_mode: bool,
    monitor_sleep: Duration,
    max_jobs: usize,
    monitor_existing: bool,
    validate_checksums: bool,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            carve_mode: false,
            monitor_sleep: Duration::from_millis(250),
            max_jobs: default_max_jobs(),
            monitor_existing: false,
            validate_checksums: false,
        }
    }
}

fn default_max_jobs() -> usize {
    let cpus = thread::available_parallelism().map(usize::from).unwrap_or(1);
    (cpus / 2).max(1)
}

impl ParserSettings {
    pub fn new() -> Self {
        ParserSettings::default()
    }

    /// Best-effort decoding: recover from malformed tokens, invalid headers
    /// and out-of-range substitutions instead of aborting.
    pub fn carve_mode(mut self, carve_mode: bool) -> Self {
        self.carve_mode = carve_mode;
        self
    }

    /// Sleep time between two sampling passes when monitoring a file.
    pub fn monitor_sleep(mut self, monitor_sleep: Duration) -> Self {
        self.monitor_sleep = monitor_sleep;
        self
    }

    /// Bounded depth of the chunk-decoding pipelines. Clamped to at least 1.
    pub fn max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs.max(1);
        self
    }

    /// When set, the first monitor pass emits the events already present in
    /// the file instead of silently marking them as seen.
    pub fn monitor_existing(mut self, monitor_existing: bool) -> Self {
        self.monitor_existing = monitor_existing;
        self
    }

    /// Validate the chunk data CRC32 when loading chunks.
    pub fn validate_checksums(mut self, validate_checksums: bool) -> Self {
        self.validate_checksums = validate_checksums;
        self
    }

    pub fn should_carve(&self) -> bool {
        self.carve_mode
    }

    pub fn get_monitor_sleep(&self) -> Duration {
        self.monitor_sleep
    }

    pub fn get_max_jobs(&self) -> usize {
        self.max_jobs
    }

    pub fn should_monitor_existing(&self) -> bool {
        self.monitor_existing
    }

    pub fn should_validate_checksums(&self) -> bool {
        self.validate_checksums
    }
}
