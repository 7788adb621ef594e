//! C9 — Notification Dispatcher. At-least-once delivery of AUTHORISED
//! transitions to a downstream endpoint, with a bounded exponential-backoff
//! retry queue; grounded in the teacher's `services::webhook_service`
//! retry-and-sign idiom and its `services::notification_dispatcher`
//! queue/dispatch split.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::store::SettlementStore;

const BASE_INTERVAL_SECS: i64 = 30;
const MAX_INTERVAL_SECS: i64 = 30 * 60;

#[derive(Debug, Serialize)]
struct NotificationPayload<'a> {
    settlement_id: &'a str,
    settlement_version: i64,
    status: &'a str,
    details: &'a str,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn SettlementStore>,
    endpoint_url: Option<String>,
    http: reqwest::Client,
    max_retries: u32,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn SettlementStore>, endpoint_url: Option<String>, max_retries: u32) -> Self {
        Self {
            store,
            endpoint_url,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            max_retries,
        }
    }

    /// C8 hands off here on every AUTHORISED transition.
    pub async fn enqueue_authorised(&self, settlement_id: &str, settlement_version: i64) -> Result<()> {
        self.store
            .enqueue_notification(settlement_id, settlement_version, "AUTHORISED", "{}")
            .await?;
        info!(settlement_id, settlement_version, "notification enqueued");
        Ok(())
    }

    /// One sweep of the queue: delivers everything whose `next_attempt_at`
    /// has passed. The endpoint is expected to dedupe by
    /// `(settlement_id, version)` since delivery here is at-least-once,
    /// never exactly-once.
    pub async fn dispatch_due(&self) -> Result<usize> {
        let due = self.store.due_notifications(Utc::now()).await?;
        let count = due.len();
        for entry in due {
            self.attempt_delivery(entry).await;
        }
        Ok(count)
    }

    async fn attempt_delivery(&self, entry: crate::models::NotificationQueueEntry) {
        match self.deliver(&entry).await {
            Ok(()) => {
                if let Err(e) = self.store.delete_notification(entry.id).await {
                    error!("failed to delete delivered notification {}: {e}", entry.id);
                }
                info!(
                    settlement_id = %entry.settlement_id,
                    settlement_version = entry.settlement_version,
                    "notification delivered"
                );
            }
            Err(e) => {
                let retry_count = entry.retry_count + 1;
                if retry_count as u32 >= self.max_retries {
                    error!(
                        settlement_id = %entry.settlement_id,
                        settlement_version = entry.settlement_version,
                        retries = retry_count,
                        error = %e,
                        "notification exhausted retries; moving to failure table"
                    );
                    metrics::counter!("notification_delivery_exhausted_total").increment(1);
                    if let Err(move_err) = self.store.move_notification_to_failure(&entry).await {
                        error!("failed to move exhausted notification to failure table: {move_err}");
                    }
                    return;
                }

                let delay_secs = (BASE_INTERVAL_SECS * 2i64.pow((retry_count - 1) as u32))
                    .min(MAX_INTERVAL_SECS);
                let next_attempt_at = Utc::now() + chrono::Duration::seconds(delay_secs);
                warn!(
                    settlement_id = %entry.settlement_id,
                    settlement_version = entry.settlement_version,
                    retry_count,
                    delay_secs,
                    error = %e,
                    "notification delivery failed; rescheduling"
                );
                if let Err(reschedule_err) = self
                    .store
                    .reschedule_notification(entry.id, retry_count, next_attempt_at, &e.to_string())
                    .await
                {
                    error!("failed to reschedule notification {}: {reschedule_err}", entry.id);
                }
            }
        }
    }

    async fn deliver(&self, entry: &crate::models::NotificationQueueEntry) -> anyhow::Result<()> {
        let Some(url) = &self.endpoint_url else {
            // No downstream configured: treat as delivered so the queue
            // does not grow unbounded in environments that never set one.
            return Ok(());
        };

        let payload = NotificationPayload {
            settlement_id: &entry.settlement_id,
            settlement_version: entry.settlement_version,
            status: &entry.status,
            details: &entry.details,
        };

        let response = self.http.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("notification endpoint returned status {}", response.status());
        }
        Ok(())
    }

    /// Runs the scheduled dispatch sweep until `shutdown` fires.
    pub async fn run_dispatch_loop(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch_due().await {
                        error!("notification dispatch sweep failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    info!("notification dispatch loop shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockSettlementStore;

    #[tokio::test]
    async fn enqueue_then_dispatch_without_endpoint_clears_queue() {
        let store = Arc::new(MockSettlementStore::new());
        let dispatcher = NotificationDispatcher::new(store.clone() as Arc<dyn SettlementStore>, None, 10);

        dispatcher.enqueue_authorised("S1", 1).await.unwrap();
        let delivered = dispatcher.dispatch_due().await.unwrap();
        assert_eq!(delivered, 1);

        let due = store.due_notifications(Utc::now()).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_reschedules_with_backoff() {
        let store = Arc::new(MockSettlementStore::new());
        let dispatcher = NotificationDispatcher::new(
            store.clone() as Arc<dyn SettlementStore>,
            Some("http://127.0.0.1:1/unreachable".to_string()),
            3,
        );

        dispatcher.enqueue_authorised("S1", 1).await.unwrap();
        dispatcher.dispatch_due().await.unwrap();

        let due_now = store.due_notifications(Utc::now()).await.unwrap();
        assert!(due_now.is_empty(), "rescheduled entry should not be due immediately");

        let due_later = store
            .due_notifications(Utc::now() + chrono::Duration::seconds(BASE_INTERVAL_SECS * 2 + 5))
            .await
            .unwrap();
        assert_eq!(due_later.len(), 1);
        assert_eq!(due_later[0].retry_count, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_move_to_failure_table() {
        let store = Arc::new(MockSettlementStore::new());
        let dispatcher = NotificationDispatcher::new(
            store.clone() as Arc<dyn SettlementStore>,
            Some("http://127.0.0.1:1/unreachable".to_string()),
            1,
        );

        dispatcher.enqueue_authorised("S1", 1).await.unwrap();
        dispatcher.dispatch_due().await.unwrap();

        let due = store.due_notifications(Utc::now()).await.unwrap();
        assert!(due.is_empty());
        let failures = store.list_notification_failures().await.unwrap();
        assert_eq!(failures.len(), 1);
    }
}
