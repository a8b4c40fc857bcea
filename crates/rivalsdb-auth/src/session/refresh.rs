//! Periodic silent refresh
//!
//! One fixed-period timer. Each tick: skip when not authenticated, skip when no
//! identity can be fetched, otherwise deliver the claims. There is no diffing;
//! the same identity may be delivered on every tick.
//!
//! Nothing a tick does can stop the loop. Only [`RefreshHandle`] can.
//! Subscriber panics are caught, which requires the unwinding panic strategy;
//! a binary built with `panic = "abort"` loses that guarantee.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::broadcaster::IdentityBroadcaster;
use super::store::TokenStore;

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No session; nothing fetched or delivered
    NotAuthenticated,
    /// Session exists but no usable identity this time
    NoIdentity,
    /// Claims were handed to the broadcaster
    Delivered,
}

/// The refresh loop, before it is started
#[derive(Debug, Clone)]
pub struct RefreshLoop {
    store: TokenStore,
    broadcaster: IdentityBroadcaster,
    period: Duration,
}

impl RefreshLoop {
    /// Create a loop ticking every `period`
    pub fn new(store: TokenStore, broadcaster: IdentityBroadcaster, period: Duration) -> Self {
        Self {
            store,
            broadcaster,
            period,
        }
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one tick now
    pub async fn tick(&self) -> TickOutcome {
        if !self.store.is_authenticated().await {
            return TickOutcome::NotAuthenticated;
        }

        let Some(claims) = self.store.fetch_identity().await else {
            return TickOutcome::NoIdentity;
        };

        // A panicking subscriber must not take the loop down with it. Needs
        // panic = "unwind", which every profile in this workspace keeps.
        let broadcaster = &self.broadcaster;
        if std::panic::catch_unwind(AssertUnwindSafe(|| broadcaster.notify(claims))).is_err() {
            error!("Identity subscriber panicked during refresh delivery");
        }
        TickOutcome::Delivered
    }

    /// Start ticking in the background
    ///
    /// The first tick fires one full period from now. Must be called within a
    /// tokio runtime.
    pub fn spawn(self) -> RefreshHandle {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();

        // Anchor the schedule now, not when the task is first polled
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(period_secs = self.period.as_secs(), "Starting session refresh loop");
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    _ = interval.tick() => {}
                }

                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    outcome = self.tick() => trace!(?outcome, "Refresh tick"),
                }
            }
            debug!("Session refresh loop stopped");
        });

        RefreshHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Cancellation handle for a running [`RefreshLoop`]
///
/// Dropping the handle stops the loop.
#[derive(Debug)]
pub struct RefreshHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    /// Ask the loop to stop; returns immediately
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the loop has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the loop and wait for it to finish
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!(error = %e, "Session refresh task failed");
        }
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
