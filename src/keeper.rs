// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Lease Keeper
//!
//! Background task that drives the time-based transitions the engine never
//! schedules for itself. The engine only reacts to calls; the keeper is one
//! more caller that happens to watch the wall clock.
//!
//! ## Strategy
//!
//! Every `interval` the keeper takes the market lock once and:
//! 1. Sweeps every lease whose acknowledgment windows have all elapsed with
//!    at least one slot still unacknowledged.
//! 2. Reports dead every node that has been silent for longer than the dead
//!    timeout and still holds acknowledged slots.
//!
//! A failed sweep or dead report is logged and the pass continues; a dead
//! report that fails leaves that node untouched for the next pass.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown; the same
//! token stops the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::market::{KeeperReport, Market};

pub struct Keeper {
    market: Arc<Mutex<Market>>,
    interval: Duration,
}

impl Keeper {
    /// Returns `None` when `interval_secs` is 0, which disables the keeper.
    pub fn new(market: Arc<Mutex<Market>>, interval_secs: u64) -> Option<Self> {
        if interval_secs == 0 {
            return None;
        }
        Some(Self {
            market,
            interval: Duration::from_secs(interval_secs),
        })
    }

    /// Run the keeper loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(keeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Lease keeper starting");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.cancelled() => {
                    info!("Lease keeper shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one keeper pass.
    pub async fn tick(&self) -> KeeperReport {
        let report = self.market.lock().await.keeper_tick();
        if report.swept.is_empty() && report.dead_nodes.is_empty() {
            debug!("Keeper pass found nothing to do");
        } else {
            info!(
                swept = report.swept.len(),
                dead_nodes = report.dead_nodes.len(),
                "Keeper pass complete"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::TestApp;

    #[test]
    fn zero_interval_disables_keeper() {
        let app = TestApp::new();
        assert!(Keeper::new(app.state.market.clone(), 0).is_none());
        assert!(Keeper::new(app.state.market.clone(), 5).is_some());
    }

    #[tokio::test]
    async fn tick_sweeps_and_reports_dead() {
        let app = TestApp::new();
        let keeper = Keeper::new(app.state.market.clone(), 60).unwrap();

        let pending = app.open_lease().await;
        let live = app.open_live_lease().await;

        // Nothing is due yet.
        assert_eq!(keeper.tick().await, KeeperReport::default());

        app.clock.advance(51);
        let report = keeper.tick().await;
        assert_eq!(report.swept, vec![pending]);
        assert!(report.dead_nodes.is_empty());

        app.clock.advance(200);
        let report = keeper.tick().await;
        assert!(report.swept.is_empty());
        assert_eq!(report.dead_nodes.len(), 2);

        let market = app.state.market.lock().await;
        assert!(market.lease(pending).is_err());
        // The first dead node is dropped with no spare available; once it
        // has been reported it is eligible again and takes over the second
        // slot, pending a fresh acknowledgment.
        let slots = market.assignments(live).unwrap();
        assert_eq!(slots.len(), 1);
        assert!(!slots[0].acknowledged);
        assert!(report.dead_nodes.contains(&slots[0].node));
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let app = TestApp::new();
        let keeper = Keeper::new(app.state.market.clone(), 1).unwrap();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(keeper.run(shutdown.clone()));
        shutdown.cancel();
        handle.await.unwrap();
    }
}
