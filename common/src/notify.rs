//! Notification sinks.

use throttle::{Notification, Notify};

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notify for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::CopyStarting { source, target } => {
                tracing::info!("copying {:?} -> {:?}", source, target);
            }
            Notification::ResumeStarting {
                source,
                target,
                offset,
            } => {
                tracing::info!(
                    "resuming {:?} -> {:?} at {}",
                    source,
                    target,
                    bytesize::ByteSize(offset)
                );
            }
            Notification::CopyProgress { file, percent } => {
                tracing::debug!("{:?}: {:.0}%", file, percent);
            }
            Notification::WaitForQueue {
                source,
                target,
                backlog_source_mb,
                backlog_target_mb,
            } => {
                tracing::info!(
                    "{:?} -> {:?} waiting for the lock queue, backlog source: {} MB, target: {} MB",
                    source,
                    target,
                    backlog_source_mb,
                    backlog_target_mb
                );
            }
            Notification::WaitTimedOut {
                source,
                target,
                minutes_waited,
            } => {
                tracing::warn!(
                    "{:?} -> {:?} copying after waiting {:.1} minutes without the queue clearing",
                    source,
                    target,
                    minutes_waited
                );
            }
            Notification::WaitComplete {
                source,
                target,
                minutes_waited,
            } => {
                tracing::info!(
                    "{:?} -> {:?} lock queue cleared after {:.1} minutes",
                    source,
                    target,
                    minutes_waited
                );
            }
            Notification::LockFilesForBypass { message, .. } => {
                tracing::warn!("{}", message);
            }
        }
    }
}

/// Delivers every notification to each of the inner sinks in order.
pub struct Fanout(pub Vec<std::sync::Arc<dyn Notify>>);

impl Notify for Fanout {
    fn notify(&self, notification: Notification) {
        if let Some((last, rest)) = self.0.split_last() {
            for sink in rest {
                sink.notify(notification.clone());
            }
            last.notify(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn tracing_notifier_logs_bypass_message() {
        TracingNotifier.notify(Notification::LockFilesForBypass {
            source_lock: None,
            target_lock: Some("/mnt/proto-7/DMS_LockFiles/1_0100_a_b.lock".into()),
            message: "delete /mnt/proto-7/DMS_LockFiles/1_0100_a_b.lock to skip the queue"
                .to_string(),
        });
        assert!(logs_contain("to skip the queue"));
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let (tx1, mut rx1) = tokio::sync::mpsc::unbounded_channel();
        let (tx2, mut rx2) = tokio::sync::mpsc::unbounded_channel();
        let sinks: Vec<std::sync::Arc<dyn Notify>> =
            vec![std::sync::Arc::new(tx1), std::sync::Arc::new(tx2)];
        let fanout = Fanout(sinks);
        let progress = Notification::CopyProgress {
            file: "/a".into(),
            percent: 50.0,
        };
        fanout.notify(progress.clone());
        assert_eq!(rx1.try_recv().unwrap(), progress);
        assert_eq!(rx2.try_recv().unwrap(), progress);
        Fanout(Vec::new()).notify(progress);
    }
}
