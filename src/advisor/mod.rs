//! Proactive capacity advisor
//!
//! Consumes forecast points from the external predictor and, when a
//! subnet is forecast to cross the utilization threshold within the
//! horizon, carves a same-size overflow sibling and announces it as an
//! advisory event. The advisor never mutates existing allocations and a
//! forecast below the confidence floor counts as no forecast at all.

use serde::{Deserialize, Serialize};

use crate::events::AdvisoryEvent;
use crate::models::ForecastPoint;
use crate::service::AddressManager;
use crate::Error;

/// Thresholds gating advisory actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Predicted utilization fraction that triggers action
    pub utilization_threshold: f64,
    /// Forecasts with lower confidence are treated as unavailable
    pub confidence_floor: f64,
    /// Forecasts beyond this horizon are out of scope
    pub horizon_days: u16,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            utilization_threshold: 0.85,
            confidence_floor: 0.5,
            horizon_days: 7,
        }
    }
}

/// Threshold-cross to advisory-emission, nothing more
pub struct CapacityAdvisor {
    config: AdvisorConfig,
}

impl CapacityAdvisor {
    pub fn new(config: AdvisorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Evaluate a batch of forecast points against the thresholds.
    ///
    /// Returns the advisories emitted; each is also published on the
    /// manager's advisory stream.
    pub fn check(
        &self,
        manager: &AddressManager,
        forecasts: &[ForecastPoint],
    ) -> Vec<AdvisoryEvent> {
        let mut emitted = Vec::new();

        for point in forecasts {
            if point.confidence < self.config.confidence_floor {
                tracing::debug!(
                    subnet_id = %point.subnet_id,
                    confidence = point.confidence,
                    "Forecast below confidence floor, treating as unavailable"
                );
                continue;
            }
            if point.horizon_days > self.config.horizon_days {
                continue;
            }
            if point.predicted_utilization < self.config.utilization_threshold {
                continue;
            }

            let Ok(subnet) = manager.get_subnet(point.subnet_id) else {
                tracing::debug!(subnet_id = %point.subnet_id, "Forecast for unknown subnet");
                continue;
            };

            let warning = AdvisoryEvent::CapacityWarning {
                subnet_id: subnet.id,
                predicted_utilization: point.predicted_utilization,
                horizon_days: point.horizon_days,
                confidence: point.confidence,
            };
            tracing::warn!(
                subnet_id = %subnet.id,
                cidr = %subnet.cidr,
                predicted = point.predicted_utilization,
                horizon_days = point.horizon_days,
                "Subnet forecast to cross utilization threshold"
            );
            manager.publish(warning.clone());
            emitted.push(warning);

            // One overflow sibling per subnet; repeat sweeps must not
            // stack extensions. Keyed on the source subnet id, not the
            // tag, since tags are free-form and may repeat.
            let already_extended = manager
                .list_subnets(subnet.address_space_id)
                .map(|subnets| subnets.iter().any(|s| s.overflow_of == Some(subnet.id)))
                .unwrap_or(false);
            if already_extended {
                continue;
            }

            let event = match manager.allocate_overflow(subnet.id) {
                Ok(overflow) => {
                    tracing::info!(
                        subnet_id = %subnet.id,
                        overflow_subnet_id = %overflow.id,
                        cidr = %overflow.cidr,
                        "Provisioned overflow sibling"
                    );
                    AdvisoryEvent::OverflowProvisioned {
                        subnet_id: subnet.id,
                        overflow_subnet_id: overflow.id,
                        cidr: overflow.cidr,
                    }
                }
                Err(err @ Error::CapacityExhausted { .. }) => {
                    tracing::warn!(
                        subnet_id = %subnet.id,
                        error = %err,
                        "No room for an overflow sibling"
                    );
                    AdvisoryEvent::OverflowUnavailable {
                        subnet_id: subnet.id,
                        reason: err.to_string(),
                    }
                }
                Err(err) => AdvisoryEvent::OverflowUnavailable {
                    subnet_id: subnet.id,
                    reason: err.to_string(),
                },
            };
            manager.publish(event.clone());
            emitted.push(event);
        }

        emitted
    }
}

impl Default for CapacityAdvisor {
    fn default() -> Self {
        Self::new(AdvisorConfig::default())
    }
}
