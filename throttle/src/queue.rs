//! Waiting for the lock queue of a share to drain.
//!
//! Every process runs this loop on its own. There is no arbiter: a transfer proceeds once the
//! older advertised transfers on its shares are few or small enough, once it has waited long
//! enough, or once an administrator deleted its lock file. Two transfers starting at the same
//! moment may both be admitted; the queue is advisory.
//!
//! ```text
//! Waiting --backlog clear / withdrawn--> Ready --> Copying --> Done
//!    \------max wait exceeded---------> TimedOut --> Copying --> Done
//! ```

use std::time::Duration;

use crate::clock::Clock;
use crate::estimator::{Backlog, BacklogEstimator, TransferRequest};
use crate::events::{Notification, Notify};

#[derive(Debug, Clone)]
pub struct Settings {
    /// A share is congested when its backlog plus this transfer reaches this many MB.
    pub backlog_limit_mb: u64,
    /// Longest wait for a share.
    pub max_wait: Duration,
    /// Longest wait for a share on one of `slow_hosts`.
    pub slow_host_max_wait: Duration,
    pub slow_hosts: Vec<String>,
    /// Assumed effective throughput used to pace polling.
    pub throughput_mb_per_sec: u64,
    pub min_poll: Duration,
    pub max_poll: Duration,
    /// After waiting this long, tell the operator how to force the copy.
    pub bypass_notice_after: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backlog_limit_mb: 1000,
            max_wait: Duration::from_secs(180 * 60),
            slow_host_max_wait: Duration::from_secs(30 * 60),
            slow_hosts: Vec::new(),
            throughput_mb_per_sec: 200,
            min_poll: Duration::from_secs(1),
            max_poll: Duration::from_secs(30),
            bypass_notice_after: Duration::from_secs(5 * 60),
        }
    }
}

impl Settings {
    fn max_wait_for(&self, share: Option<&crate::share::Share>) -> Duration {
        match share {
            Some(share)
                if self
                    .slow_hosts
                    .iter()
                    .any(|host| host.eq_ignore_ascii_case(&share.host)) =>
            {
                self.slow_host_max_wait
            }
            _ => self.max_wait,
        }
    }

    /// Pause between polls, sized to how long the backlog should take to drain.
    pub fn poll_delay(&self, backlog_mb: u64) -> Duration {
        let seconds = backlog_mb as f64 / std::cmp::max(1, self.throughput_mb_per_sec) as f64;
        Duration::from_secs_f64(seconds)
            .clamp(self.min_poll, std::cmp::max(self.min_poll, self.max_poll))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Waiting,
    Ready,
    TimedOut,
    Copying,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Few or small enough older transfers.
    Clear,
    /// Still congested, but every congested share waited its maximum.
    Expired,
    Wait,
}

/// Decide whether a transfer of `size_mb` may start given `backlog` after waiting `waited`.
pub fn admission(
    backlog: &Backlog,
    size_mb: u64,
    waited: Duration,
    source_max_wait: Duration,
    target_max_wait: Duration,
    limit_mb: u64,
) -> Admission {
    if backlog.source.count <= 1 && backlog.target.count <= 1 {
        return Admission::Clear;
    }
    let source_ok = backlog.source.total_mb + size_mb < limit_mb;
    let target_ok = backlog.target.total_mb + size_mb < limit_mb;
    if source_ok && target_ok {
        return Admission::Clear;
    }
    if (source_ok || waited >= source_max_wait) && (target_ok || waited >= target_max_wait) {
        return Admission::Expired;
    }
    Admission::Wait
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Clear,
    TimedOut,
    /// Own lock removed by someone else.
    Withdrawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    pub reason: WaitReason,
    pub waited: Duration,
    /// Number of polls that found the queue congested.
    pub polls: u32,
}

impl WaitOutcome {
    pub fn state(&self) -> QueueState {
        match self.reason {
            WaitReason::TimedOut => QueueState::TimedOut,
            WaitReason::Clear | WaitReason::Withdrawn => QueueState::Ready,
        }
    }

    pub fn queued(&self) -> bool {
        self.polls > 0
    }
}

fn bypass_message(hint: &crate::estimator::BypassHint) -> String {
    let paths: Vec<String> = hint
        .source_lock
        .iter()
        .chain(hint.target_lock.iter())
        .map(|path| path.display().to_string())
        .collect();
    if paths.is_empty() {
        "the transfer is waiting for older transfers to finish".to_string()
    } else {
        format!(
            "to start this copy immediately, delete lock file(s): {}",
            paths.join(", ")
        )
    }
}

/// Wait until `request` (already registered as `ticket`) may start.
#[tracing::instrument(skip_all, fields(source = ?request.source, target = ?request.target))]
pub async fn wait_for_queue<E: BacklogEstimator>(
    estimator: &E,
    request: &TransferRequest,
    ticket: &E::Ticket,
    settings: &Settings,
    clock: &dyn Clock,
    notifier: &dyn Notify,
) -> WaitOutcome {
    let size_mb = request.size_mb();
    let source_max_wait = settings.max_wait_for(request.source_share.as_ref());
    let target_max_wait = settings.max_wait_for(request.target_share.as_ref());
    let start = clock.now();
    let mut polls = 0;
    let mut bypass_noticed = false;
    let reason = loop {
        let now = clock.now();
        let waited = (now - start).to_std().unwrap_or_default();
        let backlog = estimator.backlog(request, now).await;
        tracing::debug!(
            "backlog source: {} file(s) {} MB, target: {} file(s) {} MB",
            backlog.source.count,
            backlog.source.total_mb,
            backlog.target.count,
            backlog.target.total_mb
        );
        match admission(
            &backlog,
            size_mb,
            waited,
            source_max_wait,
            target_max_wait,
            settings.backlog_limit_mb,
        ) {
            Admission::Clear => break WaitReason::Clear,
            Admission::Expired => break WaitReason::TimedOut,
            Admission::Wait => {}
        }
        if estimator.is_withdrawn(ticket).await {
            break WaitReason::Withdrawn;
        }
        polls += 1;
        notifier.notify(Notification::WaitForQueue {
            source: request.source.clone(),
            target: request.target.clone(),
            backlog_source_mb: backlog.source.total_mb,
            backlog_target_mb: backlog.target.total_mb,
        });
        if !bypass_noticed && waited >= settings.bypass_notice_after {
            bypass_noticed = true;
            let hint = estimator.bypass_hint(ticket);
            let message = bypass_message(&hint);
            tracing::info!("{}", &message);
            notifier.notify(Notification::LockFilesForBypass {
                source_lock: hint.source_lock,
                target_lock: hint.target_lock,
                message,
            });
        }
        clock.sleep(settings.poll_delay(backlog.max_mb())).await;
    };
    let waited = (clock.now() - start).to_std().unwrap_or_default();
    let outcome = WaitOutcome {
        reason,
        waited,
        polls,
    };
    if outcome.queued() {
        let minutes_waited = waited.as_secs_f64() / 60.0;
        let (source, target) = (request.source.clone(), request.target.clone());
        if reason == WaitReason::TimedOut {
            tracing::warn!("gave up waiting for the lock queue after {minutes_waited:.1} minutes");
            notifier.notify(Notification::WaitTimedOut {
                source,
                target,
                minutes_waited,
            });
        } else {
            tracing::info!("lock queue cleared after {minutes_waited:.1} minutes");
            notifier.notify(Notification::WaitComplete {
                source,
                target,
                minutes_waited,
            });
        }
    }
    outcome
}
