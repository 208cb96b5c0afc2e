//! Resumable chunked copy.
//!
//! Large files are copied chunk by chunk into `<target>.#FilePart#`, which is renamed to the
//! target once complete. Next to it `<target>.#FilePartInfo#` records which source the partial
//! data came from:
//!
//! ```text
//! /mnt/proto-3/raw/dataset.raw
//! 52428800
//! 2024-03-05 02:41:07.120 PM
//! ```
//!
//! (source path, source length in bytes, source last-write time in UTC). If a copy is interrupted
//! the pair stays on disk, and the next attempt continues from the end of the partial file as
//! long as path, length and modification time still match. Otherwise it starts over.

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use throttle::{Clock, Notification, Notify};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::instrument;

use crate::config::ChunkConfig;

pub const FILE_PART_SUFFIX: &str = ".#FilePart#";
pub const FILE_PART_INFO_SUFFIX: &str = ".#FilePartInfo#";

/// Modification times closer than this are the same (FAT stores 2 second resolution).
const MTIME_TOLERANCE: std::time::Duration = std::time::Duration::from_millis(2050);

/// `yyyy-MM-dd hh:mm:ss.fff tt`
const INFO_TIME_FORMAT: &str = "%Y-%m-%d %I:%M:%S%.3f %p";

/// Pause after a failed copy so that the filesystem (SMB clients in particular) lets go of the
/// handles of the failed attempt before anyone retries.
const FAILURE_PAUSE: std::time::Duration = std::time::Duration::from_millis(500);
const FAILURE_PAUSE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

fn with_suffix(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub fn file_part_path(target: &Path) -> PathBuf {
    with_suffix(target, FILE_PART_SUFFIX)
}

pub fn file_part_info_path(target: &Path) -> PathBuf {
    with_suffix(target, FILE_PART_INFO_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyState {
    #[default]
    Idle,
    NormalCopy,
    BufferedCopy,
    BufferedCopyResume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOutcome {
    pub resumed: bool,
    pub mode: CopyState,
    /// Bytes written by this call (excludes data already present when resuming).
    pub bytes_copied: u64,
}

/// Identity of the source a partial copy belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePartInfo {
    pub source: PathBuf,
    pub len: u64,
    pub modified: chrono::DateTime<chrono::Utc>,
}

impl FilePartInfo {
    pub fn from_metadata(source: &Path, metadata: &std::fs::Metadata) -> anyhow::Result<Self> {
        let modified = metadata
            .modified()
            .with_context(|| format!("failed reading modification time of {:?}", &source))?;
        Ok(Self {
            source: std::path::absolute(source).unwrap_or_else(|_| source.to_owned()),
            len: metadata.len(),
            modified: modified.into(),
        })
    }

    pub fn to_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n",
            self.source.display(),
            self.len,
            self.modified.format(INFO_TIME_FORMAT)
        )
    }

    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines().map(str::trim);
        let source = PathBuf::from(lines.next().filter(|line| !line.is_empty())?);
        let len = lines.next()?.parse().ok()?;
        let modified =
            chrono::NaiveDateTime::parse_from_str(lines.next()?, INFO_TIME_FORMAT).ok()?;
        Some(Self {
            source,
            len,
            modified: modified.and_utc(),
        })
    }

    /// Same path and length, modification times within the tolerance.
    pub fn matches(&self, current: &Self) -> bool {
        let drift = (self.modified - current.modified).abs();
        self.source == current.source
            && self.len == current.len
            && drift.to_std().is_ok_and(|drift| drift <= MTIME_TOLERANCE)
    }
}

/// Copy `src` to `dst` in one go, keeping the modification time.
#[instrument]
pub async fn copy_whole_file(src: &Path, dst: &Path) -> anyhow::Result<u64> {
    let bytes = tokio::fs::copy(src, dst)
        .await
        .with_context(|| format!("failed copying {:?} to {:?}", &src, &dst))?;
    let metadata = tokio::fs::metadata(src)
        .await
        .with_context(|| format!("failed reading metadata from {:?}", &src))?;
    set_mtime(dst, &metadata).await?;
    Ok(bytes)
}

async fn set_mtime(path: &Path, source_metadata: &std::fs::Metadata) -> anyhow::Result<()> {
    let mtime = filetime::FileTime::from_last_modification_time(source_metadata);
    let path = path.to_owned();
    tokio::task::spawn_blocking(move || {
        filetime::set_file_mtime(&path, mtime)
            .with_context(|| format!("failed setting modification time of {:?}", &path))
    })
    .await?
}

async fn remove_if_exists(path: &Path) -> anyhow::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(error) if error.kind() != std::io::ErrorKind::NotFound => {
            Err(error).with_context(|| format!("failed removing {:?}", &path))
        }
        _ => Ok(()),
    }
}

async fn open_source(path: &Path, ignore_file_locks: bool) -> anyhow::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.read(true);
    #[cfg(windows)]
    {
        const FILE_SHARE_READ: u32 = 0x1;
        const FILE_SHARE_WRITE: u32 = 0x2;
        const FILE_SHARE_DELETE: u32 = 0x4;
        options.share_mode(if ignore_file_locks {
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE
        } else {
            FILE_SHARE_READ
        });
    }
    #[cfg(not(windows))]
    {
        // POSIX locks are advisory, the source opens the same way either way
        if ignore_file_locks {
            tracing::trace!("ignoring file locks on {:?}", path);
        }
    }
    options
        .open(path)
        .await
        .with_context(|| format!("cannot open {:?} for reading", &path))
}

fn percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 * 100.0 / total as f64).min(100.0) as f32
}

/// Fill `buffer` unless the end of the file comes first.
async fn read_chunk(reader: &mut tokio::fs::File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]).await? {
            0 => break,
            read => filled += read,
        }
    }
    Ok(filled)
}

/// Copies one file at a time, resuming interrupted copies.
///
/// A copier is not shared between concurrent copies; `copy_with_resume` takes `&mut self`.
pub struct ResumableCopier {
    chunk: ChunkConfig,
    clock: std::sync::Arc<dyn Clock>,
    notifier: std::sync::Arc<dyn Notify>,
    state: CopyState,
    last_failure_pause: Option<chrono::DateTime<chrono::Utc>>,
}

impl std::fmt::Debug for ResumableCopier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableCopier")
            .field("chunk", &self.chunk)
            .field("clock", &self.clock)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ResumableCopier {
    pub fn new(
        chunk: ChunkConfig,
        clock: std::sync::Arc<dyn Clock>,
        notifier: std::sync::Arc<dyn Notify>,
    ) -> Self {
        Self {
            chunk: chunk.normalized(),
            clock,
            notifier,
            state: CopyState::Idle,
            last_failure_pause: None,
        }
    }

    pub fn state(&self) -> CopyState {
        self.state
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        self.chunk
    }

    /// Copy `source` to `target`. Files larger than one chunk go through a `.#FilePart#` file and
    /// continue a previous interrupted attempt when possible.
    ///
    /// On failure the partial files are left in place for the next attempt.
    #[instrument(skip(self))]
    pub async fn copy_with_resume(
        &mut self,
        source: &Path,
        target: &Path,
        ignore_file_locks: bool,
    ) -> anyhow::Result<CopyOutcome> {
        let src_metadata = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("failed reading metadata from {:?}", &source))?;
        if !src_metadata.is_file() {
            return Err(anyhow!("{:?} is not a regular file", source));
        }
        let result = if src_metadata.len() <= self.chunk.chunk_size {
            self.state = CopyState::NormalCopy;
            self.notifier.notify(Notification::CopyStarting {
                source: source.to_owned(),
                target: target.to_owned(),
            });
            copy_whole_file(source, target)
                .await
                .map(|bytes_copied| CopyOutcome {
                    resumed: false,
                    mode: CopyState::NormalCopy,
                    bytes_copied,
                })
        } else {
            self.buffered_copy(source, target, &src_metadata, ignore_file_locks)
                .await
        };
        self.state = CopyState::Idle;
        if result.is_err() {
            self.pause_after_failure().await;
        }
        result
    }

    /// Offset to continue from, `None` when the partial files are missing or belong to a
    /// different version of the source (in which case they are removed).
    async fn resume_offset(
        &self,
        part: &Path,
        info: &Path,
        current: &FilePartInfo,
    ) -> anyhow::Result<Option<u64>> {
        let part_metadata = tokio::fs::metadata(part).await.ok();
        let recorded = tokio::fs::read_to_string(info)
            .await
            .ok()
            .and_then(|text| FilePartInfo::parse(&text));
        match (part_metadata, recorded) {
            (Some(part_metadata), Some(recorded))
                if part_metadata.is_file()
                    && recorded.matches(current)
                    && part_metadata.len() <= current.len =>
            {
                return Ok(Some(part_metadata.len()));
            }
            (None, None) => return Ok(None),
            (_, Some(recorded)) => {
                tracing::debug!(
                    "partial copy of {:?} recorded for {:?}, source is now {:?}, starting over",
                    part,
                    recorded,
                    current
                );
            }
            (_, None) => tracing::debug!("no usable {:?}, starting over", info),
        }
        remove_if_exists(part).await?;
        remove_if_exists(info).await?;
        Ok(None)
    }

    async fn buffered_copy(
        &mut self,
        source: &Path,
        target: &Path,
        src_metadata: &std::fs::Metadata,
        ignore_file_locks: bool,
    ) -> anyhow::Result<CopyOutcome> {
        let part = file_part_path(target);
        let info = file_part_info_path(target);
        // the target only ever appears complete
        remove_if_exists(target).await?;
        let current = FilePartInfo::from_metadata(source, src_metadata)?;
        let offset = self.resume_offset(&part, &info, &current).await?;
        let resumed = offset.is_some();
        let offset = offset.unwrap_or(0);
        let mut writer = if resumed {
            self.state = CopyState::BufferedCopyResume;
            tracing::info!("resuming copy of {:?} at byte {}", source, offset);
            self.notifier.notify(Notification::ResumeStarting {
                source: source.to_owned(),
                target: target.to_owned(),
                offset,
            });
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&part)
                .await
                .with_context(|| format!("cannot open {:?} for appending", &part))?
        } else {
            self.state = CopyState::BufferedCopy;
            self.notifier.notify(Notification::CopyStarting {
                source: source.to_owned(),
                target: target.to_owned(),
            });
            tokio::fs::write(&info, current.to_text())
                .await
                .with_context(|| format!("failed writing {:?}", &info))?;
            tokio::fs::File::create(&part)
                .await
                .with_context(|| format!("cannot create {:?}", &part))?
        };
        let total = current.len;
        let mut copied = offset;
        let transfer = async {
            let mut reader = open_source(source, ignore_file_locks).await?;
            reader
                .seek(std::io::SeekFrom::Start(offset))
                .await
                .with_context(|| format!("failed seeking {:?} to {}", &source, offset))?;
            let mut buffer = vec![0u8; usize::try_from(self.chunk.chunk_size)?];
            let mut since_flush = 0u64;
            loop {
                let read = read_chunk(&mut reader, &mut buffer)
                    .await
                    .with_context(|| format!("failed reading {:?}", &source))?;
                if read == 0 {
                    break;
                }
                writer
                    .write_all(&buffer[..read])
                    .await
                    .with_context(|| format!("failed writing {:?}", &part))?;
                copied += read as u64;
                since_flush += read as u64;
                if since_flush >= self.chunk.flush_threshold {
                    since_flush = 0;
                    writer.flush().await?;
                    writer
                        .sync_data()
                        .await
                        .with_context(|| format!("failed flushing {:?}", &part))?;
                    self.notifier.notify(Notification::CopyProgress {
                        file: source.to_owned(),
                        percent: percent(copied, total),
                    });
                }
            }
            if copied != total {
                return Err(anyhow!(
                    "{:?} changed during copy, expected {} bytes, read {}",
                    source,
                    total,
                    copied
                ));
            }
            writer.flush().await?;
            writer
                .sync_all()
                .await
                .with_context(|| format!("failed flushing {:?}", &part))?;
            anyhow::Ok(())
        }
        .await;
        if let Err(error) = transfer {
            // keep as much as possible for the next attempt
            if let Err(flush_error) = writer.flush().await {
                tracing::debug!("flushing {:?} after failure: {}", &part, flush_error);
            }
            tracing::warn!(
                "copy of {:?} stopped at byte {}, {:?} kept for resuming",
                source,
                copied,
                &part
            );
            return Err(error);
        }
        drop(writer);
        set_mtime(&part, src_metadata).await?;
        tokio::fs::rename(&part, target)
            .await
            .with_context(|| format!("failed renaming {:?} to {:?}", &part, &target))?;
        if let Err(error) = tokio::fs::remove_file(&info).await {
            tracing::warn!("failed removing {:?}: {}", &info, error);
        }
        self.notifier.notify(Notification::CopyProgress {
            file: source.to_owned(),
            percent: 100.0,
        });
        Ok(CopyOutcome {
            resumed,
            mode: if resumed {
                CopyState::BufferedCopyResume
            } else {
                CopyState::BufferedCopy
            },
            bytes_copied: copied - offset,
        })
    }

    async fn pause_after_failure(&mut self) {
        let now = self.clock.now();
        let due = self.last_failure_pause.is_none_or(|last| {
            (now - last)
                .to_std()
                .is_ok_and(|since| since >= FAILURE_PAUSE_INTERVAL)
        });
        if due {
            self.last_failure_pause = Some(now);
            self.clock.sleep(FAILURE_PAUSE).await;
        }
    }
}
