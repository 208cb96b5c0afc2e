use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_recursion::async_recursion;
use throttle::estimator::TransferRequest;
use throttle::{BacklogEstimator, Clock, LockDirEstimator, Notification, Notify, QueueState};
use tracing::instrument;

use crate::config::Settings;
use crate::resume::{self, ResumableCopier};

/// Error type for copy operations that preserves operation summary even on failure.
///
/// # Logging Convention
/// The Display implementation automatically shows the full error chain, so you can log it
/// with any format specifier:
/// ```ignore
/// tracing::error!("operation failed: {}", &error);   // ✅ Shows full chain
/// tracing::error!("operation failed: {:#}", &error); // ✅ Shows full chain
/// tracing::error!("operation failed: {:?}", &error); // ✅ Shows full chain
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub bytes_copied: u64,
    pub files_copied: usize,
    /// Files that continued an interrupted chunked copy.
    pub files_resumed: usize,
    /// Existing targets left alone because overwriting was not requested.
    pub files_skipped: usize,
    /// Files that had to wait in a lock queue before copying.
    pub files_queued: usize,
    pub directories_created: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            files_resumed: self.files_resumed + other.files_resumed,
            files_skipped: self.files_skipped + other.files_skipped,
            files_queued: self.files_queued + other.files_queued,
            directories_created: self.directories_created + other.directories_created,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes copied: {}\n\
            files copied: {}\n\
            files resumed: {}\n\
            files skipped: {}\n\
            files queued: {}\n\
            directories created: {}\n",
            bytesize::ByteSize(self.bytes_copied),
            self.files_copied,
            self.files_resumed,
            self.files_skipped,
            self.files_queued,
            self.directories_created,
        )
    }
}

/// Copies files between shares, queueing large transfers behind older ones.
///
/// The estimator decides where transfers are advertised, lock files in `DMS_LockFiles`
/// directories by default.
pub struct Copier<E: BacklogEstimator = LockDirEstimator> {
    settings: Settings,
    estimator: E,
    engine: ResumableCopier,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notify>,
    host: String,
    queue_state: Option<QueueState>,
}

impl<E: BacklogEstimator + std::fmt::Debug> std::fmt::Debug for Copier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Copier")
            .field("settings", &self.settings)
            .field("estimator", &self.estimator)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("queue_state", &self.queue_state)
            .finish_non_exhaustive()
    }
}

impl Copier<LockDirEstimator> {
    pub fn new(settings: Settings, clock: Arc<dyn Clock>, notifier: Arc<dyn Notify>) -> Self {
        let estimator = LockDirEstimator::new(settings.queue.max_lock_age);
        Self::with_estimator(settings, estimator, clock, notifier)
    }
}

impl<E: BacklogEstimator> Copier<E> {
    pub fn with_estimator(
        settings: Settings,
        estimator: E,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notify>,
    ) -> Self {
        let engine = ResumableCopier::new(settings.chunk, clock.clone(), notifier.clone());
        Self {
            settings,
            estimator,
            engine,
            clock,
            notifier,
            host: throttle::lockfile::local_host_name(),
            queue_state: None,
        }
    }

    /// Host name written into lock file names.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Where the last coordinated transfer got to, `None` before the first one.
    pub fn queue_state(&self) -> Option<QueueState> {
        self.queue_state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Plain copy for small files, the resumable engine from `resumable_min_size` up.
    async fn copy_direct(
        &mut self,
        source: &Path,
        target: &Path,
        size: u64,
    ) -> anyhow::Result<Summary> {
        if size >= self.settings.copy.resumable_min_size {
            let outcome = self
                .engine
                .copy_with_resume(source, target, self.settings.copy.ignore_file_locks)
                .await?;
            return Ok(Summary {
                bytes_copied: outcome.bytes_copied,
                files_copied: 1,
                files_resumed: usize::from(outcome.resumed),
                ..Default::default()
            });
        }
        self.notifier.notify(Notification::CopyStarting {
            source: source.to_owned(),
            target: target.to_owned(),
        });
        let bytes_copied = resume::copy_whole_file(source, target).await?;
        Ok(Summary {
            bytes_copied,
            files_copied: 1,
            ..Default::default()
        })
    }

    /// Copy a single file, waiting in the lock queue of the source and target shares first when
    /// the file is large enough to matter.
    ///
    /// With `overwrite == false` an existing target is left as is. Lock files are removed before
    /// this returns, whether the transfer succeeded or not.
    #[instrument(skip(self))]
    pub async fn copy_with_lock_coordination(
        &mut self,
        source: &Path,
        target: &Path,
        manager: &str,
        overwrite: bool,
    ) -> Result<Summary, Error> {
        if !overwrite
            && tokio::fs::try_exists(target)
                .await
                .with_context(|| format!("failed checking if {:?} exists", &target))
                .map_err(|err| Error::new(err, Default::default()))?
        {
            tracing::debug!("target exists, skipping");
            return Ok(Summary {
                files_skipped: 1,
                ..Default::default()
            });
        }
        let src_metadata = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("failed reading metadata from {:?}", &source))
            .map_err(|err| Error::new(err, Default::default()))?;
        let size = src_metadata.len();
        if size < self.settings.queue.min_lock_size {
            return self
                .copy_direct(source, target, size)
                .await
                .map_err(|err| Error::new(err, Default::default()));
        }
        let shares = &self.settings.queue.shares;
        let source_share = throttle::share::lock_directory(source, shares).await;
        let target_share = throttle::share::lock_directory(target, shares).await;
        if source_share.is_none() && target_share.is_none() {
            tracing::debug!("neither side is on a share with a lock directory");
            return self
                .copy_direct(source, target, size)
                .await
                .map_err(|err| Error::new(err, Default::default()));
        }
        let request = TransferRequest {
            source: source.to_owned(),
            target: target.to_owned(),
            size_bytes: size,
            host: self.host.clone(),
            manager: manager.to_string(),
            timestamp: self.clock.now(),
            source_share,
            target_share,
        };
        let ticket = match self.estimator.register(&request).await {
            Ok(ticket) => ticket,
            Err(error) => {
                tracing::warn!("{:#}, copying {:?} without coordination", &error, source);
                return self
                    .copy_direct(source, target, size)
                    .await
                    .map_err(|err| Error::new(err, Default::default()));
            }
        };
        self.queue_state = Some(QueueState::Waiting);
        let outcome = throttle::queue::wait_for_queue(
            &self.estimator,
            &request,
            &ticket,
            &self.settings.queue.wait,
            self.clock.as_ref(),
            self.notifier.as_ref(),
        )
        .await;
        tracing::debug!("lock queue: {:?}", &outcome);
        self.queue_state = Some(QueueState::Copying);
        let result = self.copy_direct(source, target, size).await;
        self.estimator.release(ticket).await;
        self.queue_state = Some(QueueState::Done);
        let summary = result.map_err(|err| Error::new(err, Default::default()))?;
        Ok(Summary {
            files_queued: usize::from(outcome.queued()),
            ..summary
        })
    }

    /// Copy a file or a directory tree. Directories that already exist are reused so that a
    /// rerun picks up where an interrupted one stopped.
    #[instrument(skip(self))]
    #[async_recursion]
    pub async fn copy(
        &mut self,
        source: &Path,
        target: &Path,
        manager: &str,
        overwrite: bool,
    ) -> Result<Summary, Error> {
        let src_metadata = tokio::fs::metadata(source)
            .await
            .with_context(|| format!("failed reading metadata from src: {:?}", &source))
            .map_err(|err| Error::new(err, Default::default()))?;
        if !src_metadata.is_dir() {
            return self
                .copy_with_lock_coordination(source, target, manager, overwrite)
                .await;
        }
        let mut copy_summary = Summary::default();
        match tokio::fs::create_dir(target).await {
            Ok(()) => copy_summary.directories_created += 1,
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                let dst_metadata = tokio::fs::metadata(target)
                    .await
                    .with_context(|| format!("failed reading metadata from {:?}", &target))
                    .map_err(|err| Error::new(err, copy_summary))?;
                if !dst_metadata.is_dir() {
                    return Err(Error::new(
                        anyhow!("destination {:?} exists and is not a directory", target),
                        copy_summary,
                    ));
                }
                tracing::debug!("directory already exists, copying into it");
            }
            Err(error) => {
                return Err(Error::new(
                    anyhow::Error::new(error)
                        .context(format!("cannot create directory {:?}", &target)),
                    copy_summary,
                ));
            }
        }
        let mut entries = tokio::fs::read_dir(source)
            .await
            .with_context(|| format!("cannot open directory {:?} for reading", &source))
            .map_err(|err| Error::new(err, copy_summary))?;
        let mut success = true;
        loop {
            let entry = entries
                .next_entry()
                .await
                .with_context(|| format!("failed traversing directory {:?}", &source))
                .map_err(|err| Error::new(err, copy_summary))?;
            let Some(entry) = entry else {
                break;
            };
            let name = entry.file_name();
            if is_bookkeeping(&name) {
                tracing::debug!("skipping {:?}", &name);
                continue;
            }
            match self
                .copy(&entry.path(), &target.join(&name), manager, overwrite)
                .await
            {
                Ok(summary) => copy_summary = copy_summary + summary,
                Err(error) => {
                    tracing::error!("copy: {:?} -> {:?} failed with: {:#}", source, target, &error);
                    copy_summary = copy_summary + error.summary;
                    if self.settings.copy.fail_early {
                        return Err(Error::new(error.source, copy_summary));
                    }
                    success = false;
                }
            }
        }
        if !success {
            return Err(Error::new(
                anyhow!("copy: {:?} -> {:?} failed!", source, target),
                copy_summary,
            ));
        }
        Ok(copy_summary)
    }
}

/// Lock directories and partial-copy files are never copied.
fn is_bookkeeping(name: &std::ffi::OsStr) -> bool {
    let name = name.to_string_lossy();
    name == throttle::lockfile::LOCK_DIR_NAME
        || name.ends_with(resume::FILE_PART_SUFFIX)
        || name.ends_with(resume::FILE_PART_INFO_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils;
    use throttle::ManualClock;
    use throttle::lockfile::BYTES_PER_MB;
    use tracing_test::traced_test;

    struct Fixture {
        _tmp_dir: tempfile::TempDir,
        local: std::path::PathBuf,
        src_root: std::path::PathBuf,
        dst_root: std::path::PathBuf,
        settings: Settings,
    }

    /// A local directory and two share roots, each share with its lock directory.
    fn fixture() -> Fixture {
        let tmp_dir = tempfile::tempdir().unwrap();
        let local = tmp_dir.path().join("local");
        std::fs::create_dir(&local).unwrap();
        let src_root = testutils::share_root(tmp_dir.path(), "proto-3");
        let dst_root = testutils::share_root(tmp_dir.path(), "proto-7");
        let mut settings = Settings::default();
        settings.queue.shares.share_roots = vec![src_root.clone(), dst_root.clone()];
        Fixture {
            local,
            src_root,
            dst_root,
            settings,
            _tmp_dir: tmp_dir,
        }
    }

    fn copier(settings: Settings, notifier: Arc<dyn Notify>) -> (Copier, ManualClock) {
        let clock = ManualClock::default();
        (
            Copier::new(settings, Arc::new(clock.clone()), notifier),
            clock,
        )
    }

    /// Counts lock files in both lock directories when a copy starts.
    struct LockCounter {
        dirs: Vec<std::path::PathBuf>,
        seen: std::sync::Mutex<Vec<Vec<usize>>>,
    }

    impl Notify for LockCounter {
        fn notify(&self, notification: Notification) {
            if let Notification::CopyStarting { .. } = notification {
                let counts = self
                    .dirs
                    .iter()
                    .map(|dir| testutils::lock_files(dir).len())
                    .collect();
                self.seen.lock().unwrap().push(counts);
            }
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn small_files_never_create_locks() {
        let fx = fixture();
        let src = fx.src_root.join("small.raw");
        testutils::write_pattern(&src, 5 * BYTES_PER_MB).await;
        let (mut copier, _) = copier(fx.settings.clone(), Arc::new(throttle::NoopNotifier));
        let dst = fx.dst_root.join("small.raw");
        let summary = copier
            .copy_with_lock_coordination(&src, &dst, "Manager_1", false)
            .await
            .unwrap();
        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.bytes_copied, 5 * BYTES_PER_MB);
        assert_eq!(copier.queue_state(), None);
        testutils::assert_same_contents(&src, &dst).await;
        testutils::assert_same_mtime(&src, &dst);
        let local_dst = fx.local.join("small.raw");
        copier
            .copy_with_lock_coordination(&src, &local_dst, "Manager_1", false)
            .await
            .unwrap();
        testutils::assert_same_contents(&src, &local_dst).await;
        assert!(testutils::lock_files(&testutils::lock_dir(&fx.src_root)).is_empty());
        assert!(testutils::lock_files(&testutils::lock_dir(&fx.dst_root)).is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn large_file_holds_one_lock_per_share_during_transfer() {
        let fx = fixture();
        let src = fx.src_root.join("big.raw");
        testutils::write_pattern(&src, 20 * BYTES_PER_MB).await;
        let counter = Arc::new(LockCounter {
            dirs: vec![
                testutils::lock_dir(&fx.src_root),
                testutils::lock_dir(&fx.dst_root),
            ],
            seen: Default::default(),
        });
        let (mut copier, clock) = copier(fx.settings.clone(), counter.clone());
        let dst = fx.dst_root.join("big.raw");
        let summary = copier
            .copy_with_lock_coordination(&src, &dst, "Manager_1", true)
            .await
            .unwrap();
        assert_eq!(summary.files_copied, 1);
        assert_eq!(summary.files_queued, 0);
        assert_eq!(*counter.seen.lock().unwrap(), vec![vec![1, 1]]);
        assert!(testutils::lock_files(&counter.dirs[0]).is_empty());
        assert!(testutils::lock_files(&counter.dirs[1]).is_empty());
        assert_eq!(copier.queue_state(), Some(QueueState::Done));
        assert!(clock.sleeps().is_empty());
        testutils::assert_same_contents(&src, &dst).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn existing_target_without_overwrite_is_skipped() {
        let fx = fixture();
        let src = fx.src_root.join("big.raw");
        testutils::write_pattern(&src, 20 * BYTES_PER_MB).await;
        let dst = fx.dst_root.join("big.raw");
        tokio::fs::write(&dst, "old").await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (mut copier, _) = copier(fx.settings.clone(), Arc::new(tx));
        let summary = copier
            .copy_with_lock_coordination(&src, &dst, "Manager_1", false)
            .await
            .unwrap();
        assert_eq!(
            summary,
            Summary {
                files_skipped: 1,
                ..Default::default()
            }
        );
        assert_eq!(tokio::fs::read_to_string(&dst).await.unwrap(), "old");
        assert!(testutils::drain(&mut rx).is_empty());
        assert!(testutils::lock_files(&testutils::lock_dir(&fx.dst_root)).is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_transfer_removes_locks() {
        let fx = fixture();
        let src = fx.src_root.join("big.raw");
        testutils::write_pattern(&src, 20 * BYTES_PER_MB).await;
        let dst = fx.dst_root.join("missing").join("big.raw");
        let (mut copier, _) = copier(fx.settings.clone(), Arc::new(throttle::NoopNotifier));
        let error = copier
            .copy_with_lock_coordination(&src, &dst, "Manager_1", true)
            .await
            .unwrap_err();
        assert!(format!("{error}").contains("failed copying"));
        assert!(testutils::lock_files(&testutils::lock_dir(&fx.src_root)).is_empty());
        assert!(testutils::lock_files(&testutils::lock_dir(&fx.dst_root)).is_empty());
        assert_eq!(copier.queue_state(), Some(QueueState::Done));
    }

    #[derive(Debug)]
    struct BrokenEstimator;

    impl BacklogEstimator for BrokenEstimator {
        type Ticket = ();

        async fn register(&self, request: &TransferRequest) -> Result<(), throttle::estimator::Error> {
            Err(throttle::estimator::Error::NameExhausted {
                dir: request.target.clone(),
            })
        }

        async fn backlog(
            &self,
            _request: &TransferRequest,
            _now: chrono::DateTime<chrono::Utc>,
        ) -> throttle::estimator::Backlog {
            unreachable!("never registered")
        }

        async fn is_withdrawn(&self, _ticket: &()) -> bool {
            unreachable!("never registered")
        }

        async fn release(&self, _ticket: ()) {
            unreachable!("never registered")
        }

        fn bypass_hint(&self, _ticket: &()) -> throttle::estimator::BypassHint {
            unreachable!("never registered")
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn lock_creation_failure_falls_back_to_direct_copy() {
        let fx = fixture();
        let src = fx.src_root.join("big.raw");
        testutils::write_pattern(&src, 20 * BYTES_PER_MB).await;
        let dst = fx.dst_root.join("big.raw");
        let mut copier = Copier::with_estimator(
            fx.settings.clone(),
            BrokenEstimator,
            Arc::new(ManualClock::default()),
            Arc::new(throttle::NoopNotifier),
        );
        let summary = copier
            .copy_with_lock_coordination(&src, &dst, "Manager_1", true)
            .await
            .unwrap();
        assert_eq!(summary.files_copied, 1);
        assert_eq!(copier.queue_state(), None);
        assert!(logs_contain("without coordination"));
        testutils::assert_same_contents(&src, &dst).await;
    }

    /// Deletes the oldest competing lock file on the first wait notification.
    struct Drainer {
        lock: std::path::PathBuf,
        waits: std::sync::atomic::AtomicUsize,
        completed: std::sync::atomic::AtomicBool,
    }

    impl Notify for Drainer {
        fn notify(&self, notification: Notification) {
            match notification {
                Notification::WaitForQueue {
                    backlog_target_mb, ..
                } => {
                    assert_eq!(backlog_target_mb, 1200);
                    self.waits
                        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    std::fs::remove_file(&self.lock).unwrap();
                }
                Notification::WaitComplete { .. } => {
                    self.completed
                        .store(true, std::sync::atomic::Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn waits_until_older_transfers_finish() {
        let fx = fixture();
        let src = fx.local.join("big.raw");
        testutils::write_pattern(&src, 20 * BYTES_PER_MB).await;
        let dst = fx.dst_root.join("big.raw");
        let clock = ManualClock::default();
        let dst_locks = testutils::lock_dir(&fx.dst_root);
        let older = testutils::place_lock(
            &dst_locks,
            clock.now() - chrono::Duration::seconds(20),
            600,
        );
        testutils::place_lock(
            &dst_locks,
            clock.now() - chrono::Duration::seconds(10),
            600,
        );
        let drainer = Arc::new(Drainer {
            lock: older,
            waits: Default::default(),
            completed: Default::default(),
        });
        let mut copier = Copier::new(fx.settings.clone(), Arc::new(clock.clone()), drainer.clone());
        let summary = copier
            .copy_with_lock_coordination(&src, &dst, "Manager_1", true)
            .await
            .unwrap();
        assert_eq!(summary.files_queued, 1);
        assert_eq!(drainer.waits.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(drainer.completed.load(std::sync::atomic::Ordering::SeqCst));
        // 1200 MB backlog at 200 MB/s
        assert_eq!(clock.sleeps(), vec![std::time::Duration::from_secs(6)]);
        // only the competing lock is left
        assert_eq!(testutils::lock_files(&dst_locks).len(), 1);
        testutils::assert_same_contents(&src, &dst).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn large_files_go_through_resumable_engine() {
        let fx = fixture();
        let src = fx.local.join("big.raw");
        testutils::write_pattern(&src, 3 * BYTES_PER_MB).await;
        let dst = fx.local.join("big.copy");
        let data = tokio::fs::read(&src).await.unwrap();
        tokio::fs::write(resume::file_part_path(&dst), &data[..BYTES_PER_MB as usize])
            .await
            .unwrap();
        let metadata = tokio::fs::metadata(&src).await.unwrap();
        let info = resume::FilePartInfo::from_metadata(&src, &metadata).unwrap();
        tokio::fs::write(resume::file_part_info_path(&dst), info.to_text())
            .await
            .unwrap();
        let mut settings = fx.settings.clone();
        settings.copy.resumable_min_size = 2 * BYTES_PER_MB;
        let (mut copier, _) = copier(settings, Arc::new(throttle::NoopNotifier));
        let summary = copier.copy(&src, &dst, "Manager_1", false).await.unwrap();
        assert_eq!(summary.files_resumed, 1);
        assert_eq!(summary.bytes_copied, 2 * BYTES_PER_MB);
        testutils::assert_same_contents(&src, &dst).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn tree_copy_skips_bookkeeping_files() {
        let fx = fixture();
        let src = fx.local.join("tree");
        tokio::fs::create_dir_all(src.join("sub")).await.unwrap();
        tokio::fs::write(src.join("a.txt"), "a").await.unwrap();
        tokio::fs::write(src.join("sub").join("b.txt"), "bb").await.unwrap();
        tokio::fs::write(src.join("c.raw.#FilePart#"), "partial").await.unwrap();
        tokio::fs::write(src.join("c.raw.#FilePartInfo#"), "info").await.unwrap();
        let dst = fx.dst_root.join("tree");
        let (mut copier, _) = copier(fx.settings.clone(), Arc::new(throttle::NoopNotifier));
        let summary = copier.copy(&src, &dst, "Manager_1", false).await.unwrap();
        assert_eq!(summary.files_copied, 2);
        assert_eq!(summary.bytes_copied, 3);
        assert_eq!(summary.directories_created, 2);
        assert_eq!(tokio::fs::read_to_string(dst.join("a.txt")).await.unwrap(), "a");
        assert_eq!(
            tokio::fs::read_to_string(dst.join("sub").join("b.txt"))
                .await
                .unwrap(),
            "bb"
        );
        assert!(!dst.join("c.raw.#FilePart#").exists());
        assert!(!dst.join("c.raw.#FilePartInfo#").exists());
        // second run finds everything in place
        let summary = copier.copy(&src, &dst, "Manager_1", false).await.unwrap();
        assert_eq!(summary.files_skipped, 2);
        assert_eq!(summary.files_copied, 0);
        assert_eq!(summary.directories_created, 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn tree_copy_continues_past_errors_unless_fail_early() {
        let fx = fixture();
        let src = fx.local.join("tree");
        tokio::fs::create_dir(&src).await.unwrap();
        tokio::fs::write(src.join("a.txt"), "a").await.unwrap();
        tokio::fs::write(src.join("b.txt"), "b").await.unwrap();
        let dst = fx.dst_root.join("tree");
        tokio::fs::create_dir(&dst).await.unwrap();
        // a directory where a file should go
        tokio::fs::create_dir(dst.join("a.txt")).await.unwrap();
        let (mut copier, _) = copier(fx.settings.clone(), Arc::new(throttle::NoopNotifier));
        let error = copier.copy(&src, &dst, "Manager_1", true).await.unwrap_err();
        assert_eq!(error.summary.files_copied, 1);
        assert_eq!(
            tokio::fs::read_to_string(dst.join("b.txt")).await.unwrap(),
            "b"
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn fail_early_stops_at_first_failed_entry() {
        let fx = fixture();
        let src = fx.local.join("tree");
        tokio::fs::create_dir(&src).await.unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            tokio::fs::write(src.join(name), name).await.unwrap();
        }
        let dst = fx.dst_root.join("tree");
        tokio::fs::create_dir(&dst).await.unwrap();
        // two of the three entries cannot be written
        tokio::fs::create_dir(dst.join("a.txt")).await.unwrap();
        tokio::fs::create_dir(dst.join("c.txt")).await.unwrap();
        let mut settings = fx.settings.clone();
        settings.copy.fail_early = true;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (mut copier, _) = copier(settings, Arc::new(tx));
        let error = copier.copy(&src, &dst, "Manager_1", true).await.unwrap_err();
        let started = testutils::drain(&mut rx)
            .iter()
            .filter(|n| matches!(n, Notification::CopyStarting { .. }))
            .count();
        // only entries up to and including the first failure were attempted
        assert_eq!(started, error.summary.files_copied + 1);
        assert_eq!(
            error.summary.files_copied,
            usize::from(dst.join("b.txt").exists())
        );
        // the failing entry's own error, not the directory-level one
        assert!(error.to_string().contains("failed copying"));
        assert!(!error.to_string().contains("failed!"));
    }

    #[test]
    fn summary_display_and_add() {
        let a = Summary {
            bytes_copied: 1024,
            files_copied: 1,
            ..Default::default()
        };
        let b = Summary {
            files_skipped: 2,
            files_queued: 1,
            ..Default::default()
        };
        let total = a + b;
        assert_eq!(total.files_copied, 1);
        assert_eq!(total.files_skipped, 2);
        let text = total.to_string();
        assert!(text.contains("files skipped: 2"));
        assert!(text.contains("files queued: 1"));
    }
}
