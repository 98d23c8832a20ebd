// src/bus.rs
//! Completion event bus: consumers register directly instead of listening on
//! an ambient runtime-wide channel. Fire-and-forget; a slow subscriber lags
//! and drops, it never blocks the orchestrator.

use tokio::sync::broadcast;

use crate::sync::types::RefreshReport;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RefreshReport>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshReport> {
        self.tx.subscribe()
    }

    pub fn publish(&self, report: RefreshReport) {
        // No subscribers is fine; the send result only carries the count.
        let delivered = self.tx.send(report).unwrap_or(0);
        tracing::debug!(delivered, "published refresh report");
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::SourceOutcome;

    fn report(generation: u64) -> RefreshReport {
        RefreshReport {
            job_id: "odds".into(),
            generation,
            per_source: vec![SourceOutcome {
                source_id: "odds-api".into(),
                records: 3,
                error: None,
            }],
            started_at_ms: 1,
            finished_at_ms: 2,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_reports() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(report(1));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.generation, 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::default();
        bus.publish(report(1));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
