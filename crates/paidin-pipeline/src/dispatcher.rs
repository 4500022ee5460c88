//! Webhook Dispatcher
//!
//! Authenticated callbacks are stored once per `(provider, event_id)` and
//! handed to the webhook lane. The lane worker (or, with the queue disabled,
//! the receiving request) decodes the stored payload into a [`ProviderEvent`]
//! and routes it to the orchestrator.
//!
//! ```text
//! POST /webhooks/{provider}
//!   └─▶ receive ─▶ verify signature ─▶ record event ─┬─▶ webhook job ─▶ process_event
//!                                                    └─▶ (queue disabled) process inline
//! ```
//!
//! Replay re-runs the stored event through the same route. Every route is
//! idempotent against the ledger, so replaying a processed event leaves the
//! ledger unchanged.

use std::sync::Arc;

use paidin_core::{PaymentStore, ProviderKind, WebhookEvent, WebhookFilter, WebhookRecord};
use paidin_providers::WebhookVerifier;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::events::{BreezEvent, ProviderEvent, StripeEvent};
use crate::jobs::{JobQueue, WebhookJob};
use crate::orchestrator::PaymentOrchestrator;

/// Outcome of accepting a webhook
#[derive(Clone, Debug, Serialize)]
pub struct WebhookReceipt {
    /// Stored webhook event row
    pub event_id: Uuid,

    /// Already received and processed; nothing was done
    pub duplicate: bool,

    pub job_id: Option<Uuid>,
}

pub struct WebhookDispatcher {
    store: Arc<dyn PaymentStore>,
    orchestrator: Arc<PaymentOrchestrator>,
    verifier: WebhookVerifier,
    queue: JobQueue,
}

impl WebhookDispatcher {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        orchestrator: Arc<PaymentOrchestrator>,
        verifier: WebhookVerifier,
        queue: JobQueue,
    ) -> Self {
        Self {
            store,
            orchestrator,
            verifier,
            queue,
        }
    }

    pub const fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    /// Verify a raw delivery and accept it. Unsigned or mis-signed bodies
    /// are rejected before anything is stored.
    pub async fn receive(
        &self,
        provider: ProviderKind,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookReceipt> {
        let inbound = self
            .verifier
            .verify(provider, signature, body)
            .inspect_err(|e| warn!(%provider, error = %e, "Rejected webhook"))?;

        self.handle_webhook(
            inbound.provider,
            &inbound.event_type,
            &inbound.event_id,
            inbound.payload,
        )
        .await
    }

    /// Store an authenticated event and schedule its processing
    pub async fn handle_webhook(
        &self,
        provider: ProviderKind,
        event_type: &str,
        event_id: &str,
        payload: Value,
    ) -> Result<WebhookReceipt> {
        let record = self
            .store
            .record_webhook_event(WebhookEvent::new(provider, event_type, event_id, payload))
            .await?;

        let event = match record {
            WebhookRecord::Existing(event) if event.processed => {
                info!(%provider, event_id, "Duplicate webhook ignored");
                return Ok(WebhookReceipt {
                    event_id: event.id,
                    duplicate: true,
                    job_id: None,
                });
            }
            WebhookRecord::Existing(event) => {
                info!(%provider, event_id, "Redelivery of unprocessed webhook");
                event
            }
            WebhookRecord::Inserted(event) => {
                info!(%provider, event_id, event_type, "Webhook received");
                event
            }
        };

        let job = self
            .queue
            .add_webhook_job(WebhookJob {
                webhook_event_id: event.id,
            })
            .await;

        if job.is_none() {
            self.run(&event).await?;
        }

        Ok(WebhookReceipt {
            event_id: event.id,
            duplicate: false,
            job_id: job.map(|h| h.id),
        })
    }

    /// Webhook-lane entry point
    pub async fn process_event(&self, webhook_event_id: Uuid) -> Result<()> {
        let event = self
            .store
            .webhook_event_by_id(webhook_event_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("webhook event {webhook_event_id}")))?;

        if event.processed {
            debug!(event_id = %event.event_id, "Webhook already processed");
            return Ok(());
        }
        self.run(&event).await
    }

    /// Re-run a stored event regardless of its processed flag. A handler
    /// failure is recorded on the returned event rather than returned.
    pub async fn replay(&self, provider: ProviderKind, event_id: &str) -> Result<WebhookEvent> {
        let event = self
            .store
            .webhook_event(provider, event_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("{provider} webhook {event_id}")))?;

        info!(%provider, event_id, "Replaying webhook");
        if let Err(e) = self.run(&event).await {
            warn!(%provider, event_id, error = %e, "Replay failed");
        }

        self.store
            .webhook_event_by_id(event.id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("{provider} webhook {event_id}")))
    }

    pub async fn list_events(&self, filter: &WebhookFilter) -> Result<Vec<WebhookEvent>> {
        Ok(self.store.list_webhook_events(filter).await?)
    }

    /// Route the event and record the outcome on its row
    async fn run(&self, event: &WebhookEvent) -> Result<()> {
        let outcome = match ProviderEvent::decode(event.provider, &event.event_type, &event.payload) {
            Ok(decoded) => self.route(decoded).await,
            Err(e) => Err(e),
        };

        let error = outcome.as_ref().err().map(ToString::to_string);
        if let Err(store_err) = self.store.finish_webhook_event(event.id, error).await {
            error!(event_id = %event.event_id, error = %store_err, "Failed to record webhook outcome");
        }

        match &outcome {
            Ok(()) => debug!(
                provider = %event.provider,
                event_id = %event.event_id,
                "Webhook processed"
            ),
            Err(e) => warn!(
                provider = %event.provider,
                event_id = %event.event_id,
                event_type = %event.event_type,
                retryable = e.is_retryable(),
                error = %e,
                "Webhook handling failed"
            ),
        }
        outcome
    }

    async fn route(&self, event: ProviderEvent) -> Result<()> {
        match event {
            ProviderEvent::Stripe(StripeEvent::PaymentSucceeded { payment_intent }) => {
                self.orchestrator
                    .complete_funding_by_ref(&payment_intent)
                    .await?;
            }
            ProviderEvent::Stripe(StripeEvent::PaymentFailed {
                payment_intent,
                reason,
            }) => {
                self.orchestrator
                    .fail_funding_by_ref(&payment_intent, &reason)
                    .await?;
            }
            ProviderEvent::Stripe(StripeEvent::PaymentProcessing { payment_intent }) => {
                self.orchestrator
                    .mark_processing_by_ref(&payment_intent)
                    .await?;
            }
            ProviderEvent::Breez(BreezEvent::InvoicePaid {
                payment_hash,
                node_id,
            }) => {
                let payout = self.orchestrator.complete_payout(&payment_hash).await?;
                if payout.is_none() {
                    debug!(payment_hash, "Paid invoice is not a payout");
                }
                if let Some(node_id) = node_id {
                    self.orchestrator.sync_wallet_by_node(&node_id).await?;
                }
            }
            ProviderEvent::Breez(BreezEvent::PaymentFailed {
                payment_hash,
                reason,
            }) => {
                self.orchestrator.fail_payout(&payment_hash, &reason).await?;
            }
            ProviderEvent::Breez(BreezEvent::NodeUpdated { node_id }) => {
                self.orchestrator.sync_wallet_by_node(&node_id).await?;
            }
            ProviderEvent::Strike {
                event_type,
                entity_id,
            } => {
                info!(event_type, entity_id, "Strike notification");
            }
            ProviderEvent::Invoice {
                provider,
                invoice_id,
                status,
            } => {
                info!(%provider, invoice_id, status = ?status, "Invoice status changed");
            }
            ProviderEvent::Ignored {
                provider,
                event_type,
            } => {
                debug!(%provider, event_type, "No handler for webhook type");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use paidin_core::{MemoryPaymentStore, SecretBox};
    use paidin_providers::SandboxProviders;
    use paidin_providers::webhook::sign_hex;
    use serde_json::json;

    use super::*;
    use crate::jobs::MemoryBroker;
    use crate::orchestrator::Providers;

    const SECRET: &str = "whsec_test";

    fn dispatcher(queue: JobQueue) -> (Arc<MemoryPaymentStore>, WebhookDispatcher) {
        let store = Arc::new(MemoryPaymentStore::new());
        let secrets = SecretBox::new("dispatcher-tests").unwrap();
        let sandbox = SandboxProviders::new(store.clone(), &secrets);
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            store.clone(),
            Providers::sandbox(&sandbox),
            queue.clone(),
        ));
        let verifier = WebhookVerifier::new().with_secret(ProviderKind::Breez, SECRET);
        let dispatcher = WebhookDispatcher::new(store.clone(), orchestrator, verifier, queue);
        (store, dispatcher)
    }

    fn node_updated(id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "type": "node.updated",
            "data": { "nodeId": "node_unknown" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_bad_signature_stores_nothing() {
        let (store, dispatcher) = dispatcher(JobQueue::disabled());
        let body = node_updated("b1");

        let err = dispatcher
            .receive(ProviderKind::Breez, Some("deadbeef"), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SignatureVerification(_)));

        let missing = dispatcher.receive(ProviderKind::Breez, None, &body).await.unwrap_err();
        assert!(matches!(missing, PipelineError::SignatureVerification(_)));

        assert!(store.list_webhook_events(&WebhookFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inline_processing_when_queue_disabled() {
        let (store, dispatcher) = dispatcher(JobQueue::disabled());
        let body = node_updated("b2");
        let sig = sign_hex(&body, SECRET);

        let receipt = dispatcher
            .receive(ProviderKind::Breez, Some(&sig), &body)
            .await
            .unwrap();
        assert!(receipt.job_id.is_none());
        assert!(!receipt.duplicate);

        let event = store.webhook_event_by_id(receipt.event_id).await.unwrap().unwrap();
        assert!(event.processed);
        assert!(event.error.is_none());

        let again = dispatcher
            .receive(ProviderKind::Breez, Some(&sig), &body)
            .await
            .unwrap();
        assert!(again.duplicate);
        assert_eq!(again.event_id, receipt.event_id);
    }

    #[tokio::test]
    async fn test_queued_events_wait_for_worker() {
        let broker = Arc::new(MemoryBroker::new());
        let (store, dispatcher) = dispatcher(JobQueue::new(broker));

        let receipt = dispatcher
            .handle_webhook(
                ProviderKind::Breez,
                "node.updated",
                "b3",
                json!({ "id": "b3", "data": { "nodeId": "node_x" } }),
            )
            .await
            .unwrap();
        assert!(receipt.job_id.is_some());
        let stored = store.webhook_event_by_id(receipt.event_id).await.unwrap().unwrap();
        assert!(!stored.processed);

        dispatcher.process_event(receipt.event_id).await.unwrap();
        let stored = store.webhook_event_by_id(receipt.event_id).await.unwrap().unwrap();
        assert!(stored.processed);
    }

    #[tokio::test]
    async fn test_malformed_payload_records_error() {
        let (store, dispatcher) = dispatcher(JobQueue::disabled());

        let err = dispatcher
            .handle_webhook(ProviderKind::Breez, "invoice.paid", "b4", json!({ "data": {} }))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let stored = store
            .webhook_event(ProviderKind::Breez, "b4")
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.processed);
        assert!(stored.error.is_some());
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_replay_unknown_event_is_not_found() {
        let (_, dispatcher) = dispatcher(JobQueue::disabled());
        let err = dispatcher.replay(ProviderKind::Stripe, "evt_missing").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
