//! Advisory event stream
//!
//! Conflict and capacity advisories are broadcast for operator-facing
//! consumers (dashboard, alerting). The engine never pushes state to a
//! consumer directly; it publishes events and answers queries.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Operator-facing advisory events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AdvisoryEvent {
    /// A duplicate-address condition was found by a scan
    ConflictDetected {
        record_id: Uuid,
        ip: Ipv4Addr,
        claimants: usize,
    },
    /// A conflict record was repaired
    ConflictResolved {
        record_id: Uuid,
        reassigned: usize,
    },
    /// A conflict record could not be repaired and stays pending
    ConflictUnresolved {
        record_id: Uuid,
        reason: String,
    },
    /// An allocation holds an address outside its own subnet
    UnauthorizedDetected {
        allocation_id: Uuid,
        ip: Ipv4Addr,
        subnet_id: Uuid,
    },
    /// An out-of-subnet allocation was moved back into range
    UnauthorizedRemediated {
        allocation_id: Uuid,
        old_ip: Ipv4Addr,
        new_ip: Ipv4Addr,
    },
    /// A forecast crossed the utilization threshold
    CapacityWarning {
        subnet_id: Uuid,
        predicted_utilization: f64,
        horizon_days: u16,
        confidence: f64,
    },
    /// An overflow sibling subnet was carved proactively
    OverflowProvisioned {
        subnet_id: Uuid,
        overflow_subnet_id: Uuid,
        cidr: Ipv4Net,
    },
    /// No overflow sibling could be carved
    OverflowUnavailable {
        subnet_id: Uuid,
        reason: String,
    },
}

/// Broadcast publisher for advisory events
///
/// Publishing never blocks and never fails: with no live subscriber the
/// event is dropped, which is the correct behavior for an advisory.
#[derive(Debug, Clone)]
pub struct AdvisoryPublisher {
    tx: broadcast::Sender<AdvisoryEvent>,
}

impl AdvisoryPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdvisoryEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: AdvisoryEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for AdvisoryPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let publisher = AdvisoryPublisher::new(8);
        let mut rx = publisher.subscribe();

        let record_id = Uuid::new_v4();
        publisher.publish(AdvisoryEvent::ConflictDetected {
            record_id,
            ip: Ipv4Addr::new(10, 0, 0, 5),
            claimants: 2,
        });

        match rx.recv().await.unwrap() {
            AdvisoryEvent::ConflictDetected { record_id: id, claimants, .. } => {
                assert_eq!(id, record_id);
                assert_eq!(claimants, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscriber_is_silent() {
        let publisher = AdvisoryPublisher::new(8);
        publisher.publish(AdvisoryEvent::OverflowUnavailable {
            subnet_id: Uuid::new_v4(),
            reason: "exhausted".to_string(),
        });
    }
}
