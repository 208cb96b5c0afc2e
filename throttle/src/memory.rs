//! In-process backlog estimator.
//!
//! Keeps advertisements in memory instead of on a share. Clones share the same registry, so
//! several copiers inside one process throttle each other exactly like separate processes do
//! through lock files.

use crate::estimator::{Backlog, BacklogEstimator, BypassHint, Error, TransferRequest};

#[derive(Debug, Clone)]
struct Entry {
    timestamp_ms: i64,
    size_mb: u64,
    source_dir: Option<std::path::PathBuf>,
    target_dir: Option<std::path::PathBuf>,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    entries: std::collections::BTreeMap<u64, Entry>,
}

#[derive(Debug, Clone)]
pub struct MemoryEstimator {
    registry: std::sync::Arc<std::sync::Mutex<Registry>>,
    max_lock_age: std::time::Duration,
}

impl Default for MemoryEstimator {
    fn default() -> Self {
        Self::with_max_lock_age(std::time::Duration::from_secs(180 * 60))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTicket {
    id: u64,
}

impl MemoryEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertisements older than `max_lock_age` no longer count, like stale lock files.
    pub fn with_max_lock_age(max_lock_age: std::time::Duration) -> Self {
        Self {
            registry: Default::default(),
            max_lock_age,
        }
    }

    /// Drop an advertisement from outside, the in-memory counterpart of deleting a lock file.
    pub fn withdraw(&self, ticket: MemoryTicket) {
        self.registry.lock().unwrap().entries.remove(&ticket.id);
    }

    pub fn len(&self) -> usize {
        self.registry.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BacklogEstimator for MemoryEstimator {
    type Ticket = MemoryTicket;

    async fn register(&self, request: &TransferRequest) -> Result<MemoryTicket, Error> {
        let mut registry = self.registry.lock().unwrap();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.insert(
            id,
            Entry {
                timestamp_ms: request.timestamp.timestamp_millis(),
                size_mb: request.size_mb(),
                source_dir: request.source_share.as_ref().map(|s| s.lock_dir.clone()),
                target_dir: request.target_share.as_ref().map(|s| s.lock_dir.clone()),
            },
        );
        Ok(MemoryTicket { id })
    }

    async fn backlog(
        &self,
        request: &TransferRequest,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Backlog {
        let own_millis = request.timestamp.timestamp_millis();
        let now_millis = now.timestamp_millis();
        let max_age_millis = i64::try_from(self.max_lock_age.as_millis()).unwrap_or(i64::MAX);
        let source_dir = request.source_share.as_ref().map(|s| &s.lock_dir);
        let target_dir = request.target_share.as_ref().map(|s| &s.lock_dir);
        let registry = self.registry.lock().unwrap();
        let mut backlog = Backlog::default();
        for entry in registry
            .entries
            .values()
            .filter(|entry| entry.timestamp_ms < own_millis)
            .filter(|entry| now_millis.saturating_sub(entry.timestamp_ms) < max_age_millis)
        {
            let dirs = [entry.source_dir.as_ref(), entry.target_dir.as_ref()];
            if source_dir.is_some() && dirs.contains(&source_dir) {
                backlog.source.add(entry.size_mb);
            }
            if target_dir.is_some() && dirs.contains(&target_dir) {
                backlog.target.add(entry.size_mb);
            }
        }
        backlog
    }

    async fn is_withdrawn(&self, ticket: &MemoryTicket) -> bool {
        !self
            .registry
            .lock()
            .unwrap()
            .entries
            .contains_key(&ticket.id)
    }

    async fn release(&self, ticket: MemoryTicket) {
        self.withdraw(ticket);
    }

    fn bypass_hint(&self, _ticket: &MemoryTicket) -> BypassHint {
        BypassHint::default()
    }
}
