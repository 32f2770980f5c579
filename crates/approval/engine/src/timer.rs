//! Timer/race primitive and the per-approval timer registry.
//!
//! A timer waits on a deadline and a stop signal at once. Whichever wins,
//! the other branch is dropped, so a stopped timer never wakes again.
//! The registry holds at most one timer per approval; arming a new level
//! stops the previous one.

use approval_types::ApprovalId;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Which side of a [`race`] completed first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Race<T> {
    Signal(T),
    Deadline,
}

/// Wait for `signal` or `deadline`, whichever comes first.
///
/// The losing branch is dropped before this returns. A signal that is
/// ready at the same instant as the deadline wins.
pub async fn race<F>(signal: F, deadline: Duration) -> Race<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        value = signal => Race::Signal(value),
        _ = tokio::time::sleep(deadline) => Race::Deadline,
    }
}

struct ArmedTimer {
    level: usize,
    generation: u64,
    stop: oneshot::Sender<()>,
}

/// In-process timers keyed by approval id, one per id.
#[derive(Default)]
pub struct TimerRegistry {
    timers: Arc<DashMap<ApprovalId, ArmedTimer>>,
    generation: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` after `delay` unless stopped first. Replaces any timer
    /// already armed for `id`.
    ///
    /// The previous timer is signalled, not aborted: `fire` commonly arms
    /// the next level from inside the previous timer's task.
    pub fn arm(&self, id: ApprovalId, level: usize, delay: Duration, fire: BoxFuture<'static, ()>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (stop, stopped) = oneshot::channel::<()>();

        // Registered before the task exists, so even a zero delay finds
        // its own entry to clear.
        let armed = ArmedTimer {
            level,
            generation,
            stop,
        };
        if let Some(previous) = self.timers.insert(id.clone(), armed) {
            debug!(approval_id = %id, level = previous.level, "Replacing armed timer");
            let _ = previous.stop.send(());
        }

        let timers = Arc::clone(&self.timers);
        tokio::spawn(async move {
            match race(stopped, delay).await {
                // Err means the registry dropped the sender; same as a stop.
                Race::Signal(_) => {}
                Race::Deadline => {
                    timers.remove_if(&id, |_, armed| armed.generation == generation);
                    fire.await;
                }
            }
        });
    }

    /// Stop the timer for `id`, if any. Returns whether one was armed.
    pub fn disarm(&self, id: &ApprovalId) -> bool {
        match self.timers.remove(id) {
            Some((_, armed)) => {
                let _ = armed.stop.send(());
                true
            }
            None => false,
        }
    }

    /// Level of the timer currently armed for `id`.
    pub fn armed_level(&self, id: &ApprovalId) -> Option<usize> {
        self.timers.get(id).map(|armed| armed.level)
    }

    pub fn is_armed(&self, id: &ApprovalId) -> bool {
        self.timers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Stop every timer. Returns how many were armed.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<ApprovalId> = self.timers.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.disarm(id)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counter_fire(count: &Arc<AtomicUsize>) -> BoxFuture<'static, ()> {
        let count = Arc::clone(count);
        async move {
            count.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn race_prefers_signal_when_ready() {
        let outcome = race(async { 7 }, Duration::ZERO).await;
        assert_eq!(outcome, Race::Signal(7));
    }

    #[tokio::test(start_paused = true)]
    async fn race_reaches_deadline() {
        let outcome = race(std::future::pending::<()>(), Duration::from_secs(60)).await;
        assert_eq!(outcome, Race::Deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn armed_timer_fires_once_and_unregisters() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = ApprovalId::generate();

        registry.arm(id.clone(), 0, Duration::from_secs(60), counter_fire(&fired));
        assert_eq!(registry.armed_level(&id), Some(0));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!registry.is_armed(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_timer_never_fires() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = ApprovalId::generate();

        registry.arm(id.clone(), 0, Duration::from_secs(60), counter_fire(&fired));
        assert!(registry.disarm(&id));
        assert!(!registry.disarm(&id));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_level() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = ApprovalId::generate();

        registry.arm(id.clone(), 0, Duration::from_secs(60), counter_fire(&fired));
        registry.arm(id.clone(), 1, Duration::from_secs(600), counter_fire(&fired));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.armed_level(&id), Some(1));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            registry.arm(ApprovalId::generate(), 0, Duration::from_secs(5), counter_fire(&fired));
        }

        assert_eq!(registry.shutdown(), 3);
        assert!(registry.is_empty());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
