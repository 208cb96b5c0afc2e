//! Time source used by the lock queue and the copy engine.
//!
//! Everything that reads the wall clock or sleeps goes through [`Clock`] so that hours of queue
//! waiting can be simulated in tests with [`ManualClock`].

use futures::future::BoxFuture;

pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> chrono::DateTime<chrono::Utc>;

    /// Suspend the caller for `duration`.
    fn sleep(&self, duration: std::time::Duration) -> BoxFuture<'static, ()>;
}

/// Real time: `chrono::Utc::now()` and `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    fn sleep(&self, duration: std::time::Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Simulated time. Sleeping returns immediately and moves the clock forward by the requested
/// duration; every requested sleep is recorded.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: std::sync::Arc<std::sync::Mutex<chrono::DateTime<chrono::Utc>>>,
    sleeps: std::sync::Arc<std::sync::Mutex<Vec<std::time::Duration>>>,
}

impl ManualClock {
    pub fn new(start: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            now: std::sync::Arc::new(std::sync::Mutex::new(start)),
            sleeps: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn advance(&self, duration: std::time::Duration) {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }

    /// All sleeps requested so far, in order.
    pub fn sleeps(&self) -> Vec<std::time::Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(chrono::Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: std::time::Duration) -> BoxFuture<'static, ()> {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
        Box::pin(futures::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_advances_on_sleep() {
        let start = chrono::Utc::now();
        let clock = ManualClock::new(start);
        clock.sleep(std::time::Duration::from_secs(30)).await;
        clock.sleep(std::time::Duration::from_secs(2)).await;
        assert_eq!(clock.now() - start, chrono::Duration::seconds(32));
        assert_eq!(
            clock.sleeps(),
            vec![
                std::time::Duration::from_secs(30),
                std::time::Duration::from_secs(2)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn system_clock_sleeps_on_tokio_timer() {
        let before = tokio::time::Instant::now();
        SystemClock.sleep(std::time::Duration::from_secs(5)).await;
        assert!(before.elapsed() >= std::time::Duration::from_secs(5));
    }
}
