//! Background sweep tasks
//!
//! Three periodic loops run next to the manager: the scan sweeper detects
//! and repairs duplicate and out-of-subnet addresses, the telemetry
//! sweeper pulls collector snapshots, and the forecast sweeper pulls
//! predictor output into the capacity advisor. All honor a shutdown
//! signal delivered over a watch channel, checked between spaces and
//! between per-subnet pulls, so shutdown completes within one subnet's
//! latency instead of waiting out a whole sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::advisor::CapacityAdvisor;
use crate::models::{ForecastProvider, TelemetrySource};
use crate::service::AddressManager;

/// Handle to a running background sweeper
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to stop and wait for it to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

fn cancelled(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

/// Periodic duplicate-address and unauthorized-assignment sweep across
/// every space
pub struct ScanSweeper {
    manager: Arc<AddressManager>,
    interval: Duration,
}

impl ScanSweeper {
    pub fn new(manager: Arc<AddressManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run one full sweep: scan each space, then repair what was found.
    pub fn sweep_once(&self) {
        let (_hold, stop) = watch::channel(false);
        self.sweep(&stop);
    }

    fn sweep(&self, stop: &watch::Receiver<bool>) {
        for space in self.manager.list_spaces() {
            if cancelled(stop) {
                return;
            }
            match self.manager.scan(space.id) {
                Ok(records) if !records.is_empty() => {
                    tracing::info!(
                        space_id = %space.id,
                        conflicts = records.len(),
                        "Scan sweep found conflicts"
                    );
                    if let Err(err) = self.manager.resolve_all(space.id) {
                        tracing::error!(
                            space_id = %space.id,
                            error = %err,
                            "Conflict repair sweep failed"
                        );
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(space_id = %space.id, error = %err, "Scan sweep failed");
                }
            }

            if cancelled(stop) {
                return;
            }
            match self.manager.scan_unauthorized(space.id) {
                Ok(found) if !found.is_empty() => {
                    if let Err(err) = self.manager.remediate_unauthorized(space.id) {
                        tracing::error!(
                            space_id = %space.id,
                            error = %err,
                            "Unauthorized remediation sweep failed"
                        );
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(
                        space_id = %space.id,
                        error = %err,
                        "Unauthorized scan sweep failed"
                    );
                }
            }
        }
    }

    /// Spawn the periodic loop.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let sweep_stop = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep(&sweep_stop);
                        if cancelled(&sweep_stop) {
                            break;
                        }
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            tracing::debug!("Scan sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        });
        SweeperHandle { shutdown, handle }
    }
}

/// Periodic collector pull feeding the manager's snapshot store
pub struct TelemetrySweeper {
    manager: Arc<AddressManager>,
    source: Arc<dyn TelemetrySource>,
    interval: Duration,
}

impl TelemetrySweeper {
    pub fn new(
        manager: Arc<AddressManager>,
        source: Arc<dyn TelemetrySource>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            source,
            interval,
        }
    }

    /// Pull the collector's latest snapshots into the manager.
    pub async fn sweep_once(&self) {
        let snapshots = self.source.latest().await;
        for snapshot in snapshots {
            self.manager.ingest_snapshot(snapshot);
        }
    }

    pub fn spawn(self) -> SweeperHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            tracing::debug!("Telemetry sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        });
        SweeperHandle { shutdown, handle }
    }
}

/// Periodic forecast pull feeding the capacity advisor
pub struct ForecastSweeper {
    manager: Arc<AddressManager>,
    advisor: CapacityAdvisor,
    provider: Arc<dyn ForecastProvider>,
    interval: Duration,
}

impl ForecastSweeper {
    pub fn new(
        manager: Arc<AddressManager>,
        advisor: CapacityAdvisor,
        provider: Arc<dyn ForecastProvider>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            advisor,
            provider,
            interval,
        }
    }

    /// Pull a forecast for every known subnet and run the advisor once.
    pub async fn sweep_once(&self) {
        let (_hold, stop) = watch::channel(false);
        self.sweep(&stop).await;
    }

    async fn sweep(&self, stop: &watch::Receiver<bool>) {
        let horizon = self.advisor.config().horizon_days;
        for space in self.manager.list_spaces() {
            if cancelled(stop) {
                return;
            }
            let Ok(subnets) = self.manager.list_subnets(space.id) else {
                continue;
            };
            let mut points = Vec::new();
            for subnet in subnets {
                // Provider pulls dominate sweep latency; re-check the
                // signal before each one.
                if cancelled(stop) {
                    return;
                }
                if let Some(point) = self.provider.forecast(subnet.id, horizon).await {
                    points.push(point);
                }
            }
            if !points.is_empty() {
                self.advisor.check(&self.manager, &points);
            }
        }
    }

    pub fn spawn(self) -> SweeperHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let sweep_stop = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep(&sweep_stop).await;
                        if cancelled(&sweep_stop) {
                            break;
                        }
                    }
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            tracing::debug!("Forecast sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        });
        SweeperHandle { shutdown, handle }
    }
}
