//! Configuration types for runtime and copy settings

use throttle::lockfile::BYTES_PER_MB;

/// Runtime configuration for tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// Chunking of large copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Bytes read and written per step; files up to this size are copied whole
    pub chunk_size: u64,
    /// Bytes written between flushes to stable storage (and progress notifications)
    pub flush_threshold: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: BYTES_PER_MB,
            flush_threshold: 25 * BYTES_PER_MB,
        }
    }
}

impl ChunkConfig {
    /// Both values at least 1 MB, flush threshold at least one chunk.
    pub fn normalized(self) -> Self {
        let chunk_size = self.chunk_size.max(BYTES_PER_MB);
        let flush_threshold = self.flush_threshold.max(chunk_size);
        Self {
            chunk_size,
            flush_threshold,
        }
    }
}

/// Lock-queue coordination
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Smaller files are copied without coordination
    pub min_lock_size: u64,
    /// Lock files older than this are considered left over by crashed processes
    pub max_lock_age: std::time::Duration,
    pub wait: throttle::queue::Settings,
    pub shares: throttle::share::ShareSettings,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_lock_size: 20 * BYTES_PER_MB,
            max_lock_age: std::time::Duration::from_secs(180 * 60),
            wait: throttle::queue::Settings::default(),
            shares: throttle::share::ShareSettings::default(),
        }
    }
}

/// Per-file copy behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyConfig {
    /// Files of at least this size go through the resumable chunked copy
    pub resumable_min_size: u64,
    /// Read sources that other processes still hold open for writing
    pub ignore_file_locks: bool,
    /// Stop a tree copy on the first error
    pub fail_early: bool,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            resumable_min_size: 250 * BYTES_PER_MB,
            ignore_file_locks: false,
            fail_early: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub copy: CopyConfig,
    pub chunk: ChunkConfig,
    pub queue: QueueConfig,
}
