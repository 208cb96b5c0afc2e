//! Lock-file based throttling of large transfers on shared filesystems
//!
//! Processes copying large files to and from the same network share do not talk to each other.
//! They coordinate through the share itself: each transfer drops a small lock file into the
//! share's `DMS_LockFiles` directory, and before starting it looks at the lock files that were
//! there first. If the older transfers add up to too much data the newcomer waits.
//!
//! # Overview
//!
//! 1. **Share resolution** ([`share`]) - find the lock directory for a path, if any
//! 2. **Advertising** ([`estimator`]) - create a lock file per share, remove it when done
//! 3. **Backlog estimation** ([`estimator`]) - sum the sizes of older, fresh lock files
//! 4. **Waiting** ([`queue`]) - poll until the backlog clears, the wait times out, or an
//!    administrator deletes our lock file
//!
//! # Lock file names
//!
//! ```text
//! <timestampMs>_<sizeMB:0000>_<host>_<manager>.lock
//! ```
//!
//! Only the timestamp and the size are read back. See [`lockfile`].
//!
//! # Admission rule
//!
//! With `backlog` being the total size in MB of lock files older than ours (and younger than the
//! stale cutoff), a transfer of `size` MB starts when
//!
//! ```text
//! (older transfers <= 1 on both shares)
//!   OR ((backlog_source + size < 1000 OR source wait expired)
//!       AND (backlog_target + size < 1000 OR target wait expired))
//! ```
//!
//! Between polls it sleeps `clamp(max(backlog_source, backlog_target) / 200, 1, 30)` seconds.
//!
//! # Guarantees
//!
//! None beyond best effort. The lock directory is not synchronized, listings race with other
//! processes, and two transfers starting in the same millisecond range may both be admitted.
//! Timeouts never fail a transfer, they only end the wait.
//!
//! # Example
//!
//! ```rust,no_run
//! use throttle::{
//!     clock::SystemClock, estimator::BacklogEstimator, estimator::LockDirEstimator,
//!     estimator::TransferRequest, events::NoopNotifier, queue, share,
//! };
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), throttle::estimator::Error> {
//! let shares = share::ShareSettings {
//!     share_roots: vec!["/mnt/proto-7".into()],
//!     ..Default::default()
//! };
//! let target = Path::new("/mnt/proto-7/cache/dataset.raw");
//! let request = TransferRequest {
//!     source: "/data/dataset.raw".into(),
//!     target: target.to_owned(),
//!     size_bytes: 5 << 30,
//!     host: throttle::lockfile::local_host_name(),
//!     manager: "Manager_1".to_string(),
//!     timestamp: chrono::Utc::now(),
//!     source_share: None,
//!     target_share: share::lock_directory(target, &shares).await,
//! };
//! let estimator = LockDirEstimator::new(std::time::Duration::from_secs(3 * 3600));
//! let ticket = estimator.register(&request).await?;
//! queue::wait_for_queue(
//!     &estimator,
//!     &request,
//!     &ticket,
//!     &queue::Settings::default(),
//!     &SystemClock,
//!     &NoopNotifier,
//! )
//! .await;
//! // copy the file here
//! estimator.release(ticket).await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod estimator;
pub mod events;
pub mod lockfile;
pub mod memory;
pub mod queue;
pub mod share;

pub use clock::{Clock, ManualClock, SystemClock};
pub use estimator::{BacklogEstimator, LockDirEstimator, TransferRequest};
pub use events::{NoopNotifier, Notification, Notify};
pub use memory::MemoryEstimator;
pub use queue::{QueueState, WaitOutcome, WaitReason};
