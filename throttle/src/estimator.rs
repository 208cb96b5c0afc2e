//! Backlog estimation for shares.
//!
//! Admission is soft: every participant advertises its transfer, and the backlog of a share is
//! the sum of older, still fresh advertisements. [`BacklogEstimator`] abstracts where those
//! advertisements live; [`LockDirEstimator`] keeps them as lock files in the share's
//! `DMS_LockFiles` directory so that processes on different machines see each other without any
//! other channel.

use std::future::Future;
use std::path::PathBuf;

use crate::lockfile::{self, LockFile};
use crate::share::Share;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed creating lock file {path:?}")]
    CreateLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no free lock file name in {dir:?}")]
    NameExhausted { dir: PathBuf },
}

/// A transfer asking for admission.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    pub size_bytes: u64,
    pub host: String,
    pub manager: String,
    /// Queue position; older requests have priority.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source_share: Option<Share>,
    pub target_share: Option<Share>,
}

impl TransferRequest {
    pub fn size_mb(&self) -> u64 {
        lockfile::size_mb(self.size_bytes)
    }

    fn lock_file(&self) -> LockFile {
        LockFile {
            timestamp: self.timestamp,
            source: self.source.clone(),
            target: self.target.clone(),
            size_bytes: self.size_bytes,
            host: self.host.clone(),
            manager: self.manager.clone(),
        }
    }
}

/// Older transfers counted against one share.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideBacklog {
    pub count: usize,
    pub total_mb: u64,
}

impl SideBacklog {
    pub fn add(&mut self, size_mb: u64) {
        self.count += 1;
        self.total_mb += size_mb;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backlog {
    pub source: SideBacklog,
    pub target: SideBacklog,
}

impl Backlog {
    pub fn max_mb(&self) -> u64 {
        std::cmp::max(self.source.total_mb, self.target.total_mb)
    }
}

/// Where an administrator can intervene to release a waiting transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BypassHint {
    pub source_lock: Option<PathBuf>,
    pub target_lock: Option<PathBuf>,
}

pub trait BacklogEstimator: Send + Sync {
    type Ticket: Send + Sync + std::fmt::Debug;

    /// Advertise `request` on every share it touches.
    fn register(
        &self,
        request: &TransferRequest,
    ) -> impl Future<Output = Result<Self::Ticket, Error>> + Send;

    /// Transfers registered strictly before `request` and not yet stale at `now`.
    fn backlog(
        &self,
        request: &TransferRequest,
        now: chrono::DateTime<chrono::Utc>,
    ) -> impl Future<Output = Backlog> + Send;

    /// True if the advertisement was removed by someone else (administrative bypass).
    fn is_withdrawn(&self, ticket: &Self::Ticket) -> impl Future<Output = bool> + Send;

    /// Remove the advertisement. Never fails; problems are logged.
    fn release(&self, ticket: Self::Ticket) -> impl Future<Output = ()> + Send;

    fn bypass_hint(&self, ticket: &Self::Ticket) -> BypassHint;
}

/// Lock files created for one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockTicket {
    pub source_lock: Option<PathBuf>,
    pub target_lock: Option<PathBuf>,
}

impl LockTicket {
    fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.source_lock.iter().chain(self.target_lock.iter())
    }
}

/// Lock files in `DMS_LockFiles` directories.
#[derive(Debug, Clone)]
pub struct LockDirEstimator {
    max_lock_age: std::time::Duration,
}

const MAX_NAME_COLLISIONS: u32 = 100;

impl LockDirEstimator {
    /// Locks older than `max_lock_age` are assumed to belong to crashed processes and ignored.
    pub fn new(max_lock_age: std::time::Duration) -> Self {
        Self { max_lock_age }
    }

    async fn create_lock(dir: &std::path::Path, lock: &LockFile) -> Result<PathBuf, Error> {
        for collision in 0..MAX_NAME_COLLISIONS {
            let path = dir.join(lock.file_name(collision));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    use tokio::io::AsyncWriteExt;
                    let written = async {
                        file.write_all(lock.contents().as_bytes()).await?;
                        file.flush().await
                    }
                    .await;
                    if let Err(source) = written {
                        drop(file);
                        let _ = tokio::fs::remove_file(&path).await;
                        return Err(Error::CreateLock { path, source });
                    }
                    tracing::debug!("created lock file {:?}", &path);
                    return Ok(path);
                }
                Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!("lock file {:?} already exists, trying another name", &path);
                }
                Err(source) => return Err(Error::CreateLock { path, source }),
            }
        }
        Err(Error::NameExhausted {
            dir: dir.to_owned(),
        })
    }

    async fn remove_lock(path: &std::path::Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!("removed lock file {:?}", path),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("lock file {:?} was already removed", path);
            }
            Err(error) => tracing::warn!("failed removing lock file {:?}: {}", path, error),
        }
    }

    /// Backlog of a single lock directory as seen by `request` at `now`.
    pub async fn scan(
        &self,
        lock_dir: &std::path::Path,
        request: &TransferRequest,
        now: chrono::DateTime<chrono::Utc>,
    ) -> SideBacklog {
        let mut backlog = SideBacklog::default();
        let mut entries = match tokio::fs::read_dir(lock_dir).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!("cannot list lock directory {:?}: {}", lock_dir, error);
                return backlog;
            }
        };
        let own_millis = request.timestamp.timestamp_millis();
        let now_millis = now.timestamp_millis();
        let max_age_millis = i64::try_from(self.max_lock_age.as_millis()).unwrap_or(i64::MAX);
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    // other processes add and remove files concurrently, count what we have
                    tracing::warn!("failed traversing lock directory {:?}: {}", lock_dir, error);
                    break;
                }
            };
            let name = entry.file_name();
            let Some(lock) = name.to_str().and_then(lockfile::parse_lock_file_name) else {
                continue;
            };
            if lock.timestamp_ms >= own_millis {
                continue;
            }
            if now_millis.saturating_sub(lock.timestamp_ms) >= max_age_millis {
                tracing::trace!("ignoring stale lock file {:?}", name);
                continue;
            }
            backlog.add(lock.size_mb);
        }
        backlog
    }
}

impl BacklogEstimator for LockDirEstimator {
    type Ticket = LockTicket;

    async fn register(&self, request: &TransferRequest) -> Result<LockTicket, Error> {
        let lock = request.lock_file();
        let mut ticket = LockTicket::default();
        if let Some(share) = &request.source_share {
            ticket.source_lock = Some(Self::create_lock(&share.lock_dir, &lock).await?);
        }
        if let Some(share) = &request.target_share {
            match Self::create_lock(&share.lock_dir, &lock).await {
                Ok(path) => ticket.target_lock = Some(path),
                Err(error) => {
                    self.release(ticket).await;
                    return Err(error);
                }
            }
        }
        Ok(ticket)
    }

    async fn backlog(
        &self,
        request: &TransferRequest,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Backlog {
        let mut backlog = Backlog::default();
        if let Some(share) = &request.source_share {
            backlog.source = self.scan(&share.lock_dir, request, now).await;
        }
        if let Some(share) = &request.target_share {
            backlog.target = self.scan(&share.lock_dir, request, now).await;
        }
        backlog
    }

    async fn is_withdrawn(&self, ticket: &LockTicket) -> bool {
        for path in ticket.paths() {
            // an unreadable share is not a bypass, only a confirmed absence is
            if let Ok(false) = tokio::fs::try_exists(path).await {
                tracing::info!("lock file {:?} was deleted, skipping the queue", path);
                return true;
            }
        }
        false
    }

    async fn release(&self, ticket: LockTicket) {
        for path in ticket.paths() {
            Self::remove_lock(path).await;
        }
    }

    fn bypass_hint(&self, ticket: &LockTicket) -> BypassHint {
        BypassHint {
            source_lock: ticket.source_lock.clone(),
            target_lock: ticket.target_lock.clone(),
        }
    }
}
