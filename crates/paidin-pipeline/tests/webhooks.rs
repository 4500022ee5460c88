//! Webhook ingestion, de-duplication and replay

mod common;

use chrono::Utc;
use common::{Harness, STRIPE_SECRET};
use paidin_core::{PaymentStore, ProviderKind, TransactionStatus, TransactionType, WebhookFilter};
use paidin_pipeline::{Lane, PipelineError};
use paidin_providers::webhook::stripe_signature_header;
use rust_decimal_macros::dec;
use serde_json::json;

fn stripe_body(event_id: &str, event_type: &str, payment_intent: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": event_type,
        "data": { "object": { "id": payment_intent, "object": "payment_intent" } }
    }))
    .unwrap()
}

fn sign(body: &[u8]) -> String {
    stripe_signature_header(body, STRIPE_SECRET, Utc::now().timestamp())
}

#[tokio::test]
async fn test_duplicate_stripe_delivery_funds_once() {
    let h = Harness::unqueued().await;
    let funded = h.fund(dec!(100)).await;

    let body = stripe_body("evt_1", "payment_intent.succeeded", &funded.provider_ref);
    let first = h
        .pipeline
        .dispatcher
        .receive(ProviderKind::Stripe, Some(&sign(&body)), &body)
        .await
        .unwrap();
    let second = h
        .pipeline
        .dispatcher
        .receive(ProviderKind::Stripe, Some(&sign(&body)), &body)
        .await
        .unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.event_id, second.event_id);
    assert_eq!(h.count(TransactionType::Funding, TransactionStatus::Completed).await, 1);

    let events = h
        .pipeline
        .dispatcher
        .list_events(&WebhookFilter {
            provider: Some(ProviderKind::Stripe),
            ..WebhookFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].processed);
}

#[tokio::test]
async fn test_replay_does_not_refund() {
    let h = Harness::unqueued().await;
    let funded = h.fund(dec!(30)).await;

    let body = stripe_body("evt_replay", "payment_intent.succeeded", &funded.provider_ref);
    h.pipeline
        .dispatcher
        .receive(ProviderKind::Stripe, Some(&sign(&body)), &body)
        .await
        .unwrap();
    let sats_before = h.sandbox.lightning.strike_balance().await;

    for _ in 0..3 {
        let event = h
            .pipeline
            .dispatcher
            .replay(ProviderKind::Stripe, "evt_replay")
            .await
            .unwrap();
        assert!(event.processed);
        assert!(event.error.is_none());
    }

    assert_eq!(h.ledger().await.len(), 1);
    assert_eq!(h.sandbox.lightning.strike_balance().await, sats_before);
}

#[tokio::test]
async fn test_webhook_and_funding_job_share_one_entry() {
    let h = Harness::queued().await;
    let funded = h.fund(dec!(60)).await;

    let body = stripe_body("evt_race", "payment_intent.succeeded", &funded.provider_ref);
    let receipt = h
        .pipeline
        .dispatcher
        .receive(ProviderKind::Stripe, Some(&sign(&body)), &body)
        .await
        .unwrap();
    assert!(receipt.job_id.is_some());

    assert_eq!(h.drain(Lane::Webhook).await, 1);
    assert_eq!(h.drain(Lane::Funding).await, 1);

    assert_eq!(h.ledger().await.len(), 1);
    assert_eq!(h.count(TransactionType::Funding, TransactionStatus::Completed).await, 1);
}

#[tokio::test]
async fn test_stripe_failure_webhook_marks_intent_failed() {
    let h = Harness::unqueued().await;
    let funded = h.fund(dec!(15)).await;

    let body = serde_json::to_vec(&json!({
        "id": "evt_fail",
        "type": "payment_intent.payment_failed",
        "data": { "object": {
            "id": funded.provider_ref,
            "last_payment_error": { "message": "R02 account closed" }
        } }
    }))
    .unwrap();
    h.pipeline
        .dispatcher
        .receive(ProviderKind::Stripe, Some(&sign(&body)), &body)
        .await
        .unwrap();

    let intent = h
        .store
        .payment_intent(funded.payment_intent_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(intent.status, paidin_core::PaymentIntentStatus::Failed);

    let ledger = h.ledger().await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].status, TransactionStatus::Failed);
    assert_eq!(ledger[0].meta_str("error"), Some("R02 account closed"));

    h.pipeline
        .dispatcher
        .replay(ProviderKind::Stripe, "evt_fail")
        .await
        .unwrap();
    assert_eq!(h.ledger().await.len(), 1);
}

#[tokio::test]
async fn test_tampered_body_is_rejected() {
    let h = Harness::unqueued().await;
    let body = stripe_body("evt_bad", "payment_intent.succeeded", "pi_unknown");
    let signature = sign(&body);

    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");
    let err = h
        .pipeline
        .dispatcher
        .receive(ProviderKind::Stripe, Some(&signature), &tampered)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::SignatureVerification(_)));
    assert!(
        h.store
            .webhook_event(ProviderKind::Stripe, "evt_bad")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_unknown_payment_intent_is_acknowledged() {
    let h = Harness::unqueued().await;
    let body = stripe_body("evt_other", "payment_intent.succeeded", "pi_not_ours");

    let receipt = h
        .pipeline
        .dispatcher
        .receive(ProviderKind::Stripe, Some(&sign(&body)), &body)
        .await
        .unwrap();

    let event = h.store.webhook_event_by_id(receipt.event_id).await.unwrap().unwrap();
    assert!(event.processed);
    assert!(h.ledger().await.is_empty());
}
