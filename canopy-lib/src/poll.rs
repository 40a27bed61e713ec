//! Self-throttling poll scheduler.
//!
//! While visible work is in progress the scheduler refreshes on a short
//! interval (Active). Once everything looks finished it waits a longer
//! interval (Idle), performs one confirmatory refresh and stops, unless
//! that refresh shows work again.

use async_trait::async_trait;
use log::debug;
use log::warn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::error::Error;

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Work in progress; short interval.
    Active,
    /// Everything looked finished; long interval before the last check.
    Idle,
    /// No timer armed.
    Stopped,
}

/// Something a [`PollScheduler`] keeps fresh.
#[async_trait]
pub trait PollTarget: Send + Sync + 'static {
    /// Returns `true` if any visible node still has unfinished work.
    fn has_pending_work(&self) -> bool;

    /// Re-fetches and reconciles the target.
    async fn refresh(&self) -> Result<(), Error>;
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    state: watch::Receiver<PollState>,
}

/// Owns at most one running poll loop.
///
/// Starting a new loop cancels the previous one; dropping the scheduler
/// cancels the running loop.
///
/// # Example
///
/// ```no_run
/// use canopy_lib::config::PollConfig;
/// use canopy_lib::poll::{PollScheduler, PollState};
/// # use canopy_lib::tree::Tree;
///
/// # async fn example(tree: Tree) {
/// let mut scheduler = PollScheduler::new(PollConfig::default());
/// let mut state = scheduler.start(tree);
/// let _ = state.wait_for(|s| *s == PollState::Stopped).await;
/// # }
/// ```
pub struct PollScheduler {
    config: PollConfig,
    running: Option<Running>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl PollScheduler {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    /// Starts polling `target`, cancelling any previous loop first.
    ///
    /// The loop starts Active. Returns a receiver that observes every
    /// state transition, ending with `Stopped`.
    pub fn start<T: PollTarget>(&mut self, target: T) -> watch::Receiver<PollState> {
        self.cancel();

        let (tx, rx) = watch::channel(PollState::Active);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(target, self.config.clone(), tx, cancel.clone()));
        self.running = Some(Running {
            cancel,
            handle,
            state: rx.clone(),
        });
        rx
    }

    /// Cancels the running loop. Returns `false` if nothing was running.
    pub fn cancel(&mut self) -> bool {
        match self.running.take() {
            Some(running) => {
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Current state; `Stopped` if no loop is running.
    pub fn state(&self) -> PollState {
        self.running
            .as_ref()
            .map(|running| *running.state.borrow())
            .unwrap_or(PollState::Stopped)
    }

    /// Returns `true` while a loop is armed.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run<T: PollTarget>(
    target: T,
    config: PollConfig,
    state: watch::Sender<PollState>,
    cancel: CancellationToken,
) {
    let mut current = PollState::Active;
    loop {
        let interval = match current {
            PollState::Active => config.active_interval,
            PollState::Idle => config.idle_interval,
            PollState::Stopped => break,
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = tick(&target, current) => next,
        };
        if next != current {
            debug!("poll {:?} -> {:?}", current, next);
        }
        current = next;
        publish(&state, current);
    }
    publish(&state, PollState::Stopped);
}

fn publish(state: &watch::Sender<PollState>, next: PollState) {
    state.send_if_modified(|current| {
        let changed = *current != next;
        *current = next;
        changed
    });
}

async fn tick<T: PollTarget>(target: &T, state: PollState) -> PollState {
    match state {
        PollState::Active => {
            if target.has_pending_work() {
                refresh(target).await;
                PollState::Active
            } else {
                PollState::Idle
            }
        }
        PollState::Idle => {
            if target.has_pending_work() {
                refresh(target).await;
                return PollState::Active;
            }
            if !refresh(target).await {
                return PollState::Idle;
            }
            if target.has_pending_work() {
                PollState::Active
            } else {
                PollState::Stopped
            }
        }
        PollState::Stopped => PollState::Stopped,
    }
}

/// Refreshes the target. Failures are logged and reported as `false`.
async fn refresh<T: PollTarget>(target: &T) -> bool {
    match target.refresh().await {
        Ok(()) => true,
        Err(e) => {
            warn!("poll refresh failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::error::FetchError;

    /// Pending until `finish_after` refreshes; optionally reopens work on a
    /// given refresh.
    #[derive(Default)]
    struct Fake {
        refreshes: AtomicUsize,
        finish_after: usize,
        reopen_on: Option<usize>,
        reopened: AtomicBool,
        fail: bool,
    }

    #[async_trait]
    impl PollTarget for Arc<Fake> {
        fn has_pending_work(&self) -> bool {
            let done = self.refreshes.load(Ordering::SeqCst);
            done < self.finish_after || self.reopened.load(Ordering::SeqCst)
        }

        async fn refresh(&self) -> Result<(), Error> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.reopen_on == Some(n) {
                self.reopened.store(true, Ordering::SeqCst);
            }
            if self.fail {
                return Err(FetchError::Unavailable("down".to_string()).into());
            }
            Ok(())
        }
    }

    fn config() -> PollConfig {
        PollConfig::default()
            .with_active_interval(Duration::from_secs(1))
            .with_idle_interval(Duration::from_secs(3))
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_confirms_once_then_stops() {
        let fake = Arc::new(Fake {
            finish_after: 2,
            ..Default::default()
        });
        let mut scheduler = PollScheduler::new(config());
        let mut rx = scheduler.start(fake.clone());

        rx.wait_for(|s| *s == PollState::Idle).await.unwrap();
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 2);

        rx.wait_for(|s| *s == PollState::Stopped).await.unwrap();
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_returns_to_active() {
        let fake = Arc::new(Fake {
            finish_after: 0,
            reopen_on: Some(1),
            ..Default::default()
        });
        let mut scheduler = PollScheduler::new(config());
        let mut rx = scheduler.start(fake.clone());

        rx.wait_for(|s| *s == PollState::Idle).await.unwrap();
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 0);
        rx.wait_for(|s| *s == PollState::Active).await.unwrap();
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 1);
        assert!(scheduler.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_keep_polling() {
        let fake = Arc::new(Fake {
            finish_after: usize::MAX,
            fail: true,
            ..Default::default()
        });
        let mut scheduler = PollScheduler::new(config());
        let _rx = scheduler.start(fake.clone());

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.state(), PollState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_once_and_restart_cancels_previous() {
        let fake = Arc::new(Fake {
            finish_after: usize::MAX,
            ..Default::default()
        });
        let mut scheduler = PollScheduler::new(config());
        let mut first = scheduler.start(fake.clone());
        let _second = scheduler.start(fake.clone());

        first.wait_for(|s| *s == PollState::Stopped).await.unwrap();
        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());
        assert_eq!(scheduler.state(), PollState::Stopped);

        let before = fake.refreshes.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fake.refreshes.load(Ordering::SeqCst), before);
    }
}
