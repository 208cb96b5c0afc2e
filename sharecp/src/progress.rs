//! Progress bar for the file being copied.

use indicatif::{ProgressBar, ProgressStyle};
use throttle::{Notification, Notify};

pub struct ProgressNotifier {
    bar: ProgressBar,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

impl Notify for ProgressNotifier {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::CopyStarting { source, .. } => {
                self.bar.reset();
                self.bar.set_message(format!("copying {}", file_name(&source)));
            }
            Notification::ResumeStarting { source, offset, .. } => {
                self.bar.reset();
                self.bar.set_message(format!(
                    "resuming {} at {}",
                    file_name(&source),
                    bytesize::ByteSize(offset)
                ));
            }
            Notification::CopyProgress { percent, .. } => {
                self.bar.set_position(percent.clamp(0.0, 100.0) as u64);
            }
            Notification::WaitForQueue {
                source,
                backlog_source_mb,
                backlog_target_mb,
                ..
            } => {
                self.bar.set_message(format!(
                    "{} waiting for {} MB ahead in the queue",
                    file_name(&source),
                    backlog_source_mb.max(backlog_target_mb)
                ));
                self.bar.tick();
            }
            Notification::WaitTimedOut { minutes_waited, .. } => {
                self.bar
                    .println(format!("queue still busy after {minutes_waited:.0} min, copying anyway"));
            }
            Notification::WaitComplete { .. } => {}
            Notification::LockFilesForBypass { message, .. } => self.bar.println(message),
        }
    }
}
