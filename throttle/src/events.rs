//! Notifications emitted while waiting in the lock queue and while copying.
//!
//! These are informational, never errors. Callers consume them by implementing [`Notify`] or by
//! handing in the sending half of a tokio channel.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A fresh copy of `source` is starting.
    CopyStarting { source: PathBuf, target: PathBuf },
    /// A previously interrupted chunked copy continues at `offset`.
    ResumeStarting {
        source: PathBuf,
        target: PathBuf,
        offset: u64,
    },
    /// Percent (0-100) of `file` copied so far.
    CopyProgress { file: PathBuf, percent: f32 },
    /// The transfer is held back by older transfers on the same share(s).
    WaitForQueue {
        source: PathBuf,
        target: PathBuf,
        backlog_source_mb: u64,
        backlog_target_mb: u64,
    },
    /// Gave up waiting; the copy proceeds anyway.
    WaitTimedOut {
        source: PathBuf,
        target: PathBuf,
        minutes_waited: f64,
    },
    /// The queue cleared after waiting.
    WaitComplete {
        source: PathBuf,
        target: PathBuf,
        minutes_waited: f64,
    },
    /// Lock files an administrator may delete to let the copy start immediately.
    LockFilesForBypass {
        source_lock: Option<PathBuf>,
        target_lock: Option<PathBuf>,
        message: String,
    },
}

pub trait Notify: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notify for NoopNotifier {
    fn notify(&self, _notification: Notification) {}
}

impl Notify for tokio::sync::mpsc::UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        // receiver may be gone, notifications are best-effort
        let _ = self.send(notification);
    }
}

impl<T: Notify + ?Sized> Notify for std::sync::Arc<T> {
    fn notify(&self, notification: Notification) {
        (**self).notify(notification);
    }
}
