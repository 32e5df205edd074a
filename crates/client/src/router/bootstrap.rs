//! One-time session bootstrap.
//!
//! The first navigation restores the persisted session before the guard
//! decides anything. Navigations that arrive while that restore is running
//! wait for it; later ones skip it.

use std::future::Future;

use tokio::sync::watch;
use tracing::{debug, warn};

/// Progress of the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
}

/// Per-router bootstrap latch.
#[derive(Debug)]
pub struct SessionBootstrap {
    state: watch::Sender<BootstrapState>,
}

impl Default for SessionBootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBootstrap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(BootstrapState::Uninitialized),
        }
    }

    #[must_use]
    pub fn state(&self) -> BootstrapState {
        *self.state.borrow()
    }

    /// Run `init` if no caller has yet, otherwise wait until the running
    /// `init` has finished.
    ///
    /// If the running caller is cancelled the latch resets, and a waiting
    /// caller runs its own `init` instead.
    pub async fn ensure<F, Fut>(&self, init: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut init = Some(init);
        let mut updates = self.state.subscribe();

        loop {
            if let Some(run) = init.take_if(|_| self.claim()) {
                let reset = ResetOnDrop(&self.state);
                debug!("Bootstrapping session");
                run().await;
                std::mem::forget(reset);
                self.state.send_replace(BootstrapState::Ready);
                return;
            }

            if *updates.borrow_and_update() == BootstrapState::Ready {
                return;
            }
            if updates.changed().await.is_err() {
                warn!("Bootstrap latch dropped while waiting");
                return;
            }
        }
    }

    /// Move `Uninitialized` to `Initializing`; true if this call did.
    fn claim(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == BootstrapState::Uninitialized {
                *state = BootstrapState::Initializing;
                true
            } else {
                false
            }
        })
    }
}

/// Puts the latch back to `Uninitialized` if the runner never finishes.
struct ResetOnDrop<'a>(&'a watch::Sender<BootstrapState>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(BootstrapState::Uninitialized);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_once() {
        let bootstrap = SessionBootstrap::new();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            bootstrap
                .ensure(|| async {
                    runs.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(bootstrap.state(), BootstrapState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let bootstrap = Arc::new(SessionBootstrap::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let bootstrap = Arc::clone(&bootstrap);
                let runs = Arc::clone(&runs);
                tokio::spawn(async move {
                    bootstrap
                        .ensure(|| async {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            runs.fetch_add(1, Ordering::SeqCst);
                        })
                        .await;
                    // Nobody returns before the run has finished.
                    assert_eq!(runs.load(Ordering::SeqCst), 1);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_resets() {
        let bootstrap = SessionBootstrap::new();

        let pending = bootstrap.ensure(|| std::future::pending::<()>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
        assert_eq!(bootstrap.state(), BootstrapState::Uninitialized);

        bootstrap.ensure(|| async {}).await;
        assert_eq!(bootstrap.state(), BootstrapState::Ready);
    }
}
