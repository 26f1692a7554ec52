//! Read-only telemetry and forecast inputs
//!
//! The collector and the predictor are external collaborators; the engine
//! consumes their records through the traits below and never computes or
//! trains forecasts itself. A missing or low-confidence forecast means
//! "no forecast available", never zero utilization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Point-in-time utilization of one subnet, produced by the collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilizationSnapshot {
    pub subnet_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Addresses currently assigned
    pub used_count: u32,
    /// Host-assignable addresses in the subnet
    pub capacity: u32,
}

impl UtilizationSnapshot {
    /// Used fraction in `[0, 1]`; zero-capacity subnets report 0.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            f64::from(self.used_count) / f64::from(self.capacity)
        }
    }
}

/// Predicted utilization of one subnet at a future horizon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub subnet_id: Uuid,
    /// Days ahead this prediction refers to
    pub horizon_days: u16,
    /// Predicted used fraction in `[0, 1]`
    pub predicted_utilization: f64,
    /// Model confidence in `[0, 1]`
    pub confidence: f64,
}

/// Source of utilization snapshots (push or pull cadence owned elsewhere)
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Latest snapshot per subnet.
    async fn latest(&self) -> Vec<UtilizationSnapshot>;
}

/// Opaque forecast oracle
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    /// Forecast for one subnet at the given horizon, if the model has one.
    async fn forecast(&self, subnet_id: Uuid, horizon_days: u16) -> Option<ForecastPoint>;
}
