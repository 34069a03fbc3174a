//! Stale-presence reaper.
//!
//! Provides a [`ReaperScheduler`] trait and a default [`IntervalScheduler`]
//! implementation that ticks at a fixed interval. On every tick, and whenever
//! a delivery evicts someone, the [`Reaper`] compares the directory with the
//! last presence broadcast and re-broadcasts if they differ.

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{sync::Notify, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{config::DEFAULT_REAPER_INTERVAL, dispatch::Dispatcher};

/// Trait for controlling when the reaper checks for drift.
#[async_trait]
pub trait ReaperScheduler: Send + Sync {
    /// Wait until the next check should run.
    async fn next_tick(&mut self);
}

/// A simple interval-based scheduler. The first tick completes immediately.
pub struct IntervalScheduler {
    interval: tokio::time::Interval,
}

impl IntervalScheduler {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

impl Default for IntervalScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_REAPER_INTERVAL)
    }
}

#[async_trait]
impl ReaperScheduler for IntervalScheduler {
    async fn next_tick(&mut self) {
        self.interval.tick().await;
    }
}

pub struct Reaper<S = IntervalScheduler> {
    dispatcher: Arc<Dispatcher>,
    scheduler: S,
    drift: Arc<Notify>,
}

impl<S: ReaperScheduler> Reaper<S> {
    pub fn new(dispatcher: Arc<Dispatcher>, scheduler: S, drift: Arc<Notify>) -> Self {
        Self {
            dispatcher,
            scheduler,
            drift,
        }
    }

    /// One reconciliation pass. Returns whether a broadcast was sent.
    pub async fn reconcile(&self) -> bool {
        if !self.dispatcher.presence_drifted() {
            return false;
        }
        let reached = self.dispatcher.broadcast_presence(None, false).await;
        info!("Reaper has refreshed the user list ({reached} reached)");
        true
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Stale-presence reaper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.scheduler.next_tick() => {}
                _ = self.drift.notified() => debug!("Eviction reported, checking presence drift"),
            }
            self.reconcile().await;
        }
        info!("Stale-presence reaper stopped");
    }
}
