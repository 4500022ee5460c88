//! End-to-end money flows against the sandbox providers

mod common;

use common::Harness;
use paidin_core::{
    LedgerCurrency, PaymentIntentStatus, PaymentStore, TransactionStatus, TransactionType,
    WalletType,
};
use paidin_pipeline::{
    Lane, PayoutRequest, PipelineError, RequestStatus, SwapDirection, SwapRequest,
};
use paidin_providers::ProviderErrorKind;
use paidin_providers::mock::SettleMode;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_fund_one_hundred_dollars() {
    let h = Harness::queued().await;

    let response = h.fund(dec!(100)).await;
    assert_eq!(response.status, PaymentIntentStatus::Processing);
    assert!(response.job_id.is_some());

    let intent = h
        .store
        .payment_intent(response.payment_intent_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(intent.amount_cents, 10_000);
    assert_eq!(intent.provider_ref, response.provider_ref);

    assert_eq!(h.drain(Lane::Funding).await, 1);

    let ledger = h.ledger().await;
    assert_eq!(ledger.len(), 1);
    let entry = &ledger[0];
    assert_eq!(entry.transaction_type, TransactionType::Funding);
    assert_eq!(entry.amount, dec!(100));
    assert_eq!(entry.currency, LedgerCurrency::Usd);
    assert_eq!(entry.status, TransactionStatus::Completed);
    assert!(entry.meta_str("quote_id").is_some());
    assert!(entry.meta_str("invoice_id").is_some());
    assert!(entry.meta_str("payment_id").is_some());

    // 100 / 97500 BTC, rounded to 8 places
    assert_eq!(entry.metadata["amount_sats"], 102_564);
    assert_eq!(h.balance(h.admin_id, WalletType::Company).await, 102_564);

    let status = h
        .pipeline
        .orchestrator
        .get_payment_status(h.admin_id, response.payment_intent_id)
        .await
        .unwrap();
    assert_eq!(status.status, PaymentIntentStatus::Succeeded);
    assert_eq!(status.details.funding_status, Some(TransactionStatus::Completed));
}

#[tokio::test]
async fn test_funding_job_waits_for_settlement() {
    let h = Harness::queued().await;
    h.sandbox.stripe.set_settle_mode(SettleMode::Hold).await;

    let response = h.fund(dec!(40)).await;
    h.pipeline
        .orchestrator
        .process_funding_completion(response.payment_intent_id)
        .await
        .map(|_| ())
        .unwrap_err();
    assert!(h.ledger().await.is_empty());

    h.sandbox.stripe.set_settle_mode(SettleMode::Succeed).await;
    h.pipeline
        .orchestrator
        .process_funding_completion(response.payment_intent_id)
        .await
        .unwrap();
    assert_eq!(h.count(TransactionType::Funding, TransactionStatus::Completed).await, 1);
}

#[tokio::test]
async fn test_returned_debit_fails_once() {
    let h = Harness::queued().await;
    h.sandbox.stripe.set_settle_mode(SettleMode::Fail).await;

    let response = h.fund(dec!(25)).await;
    h.drain(Lane::Funding).await;

    let failed = h.pipeline.queue.failed_jobs(Lane::Funding, 10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].attempts, 1);

    let again = h
        .pipeline
        .orchestrator
        .process_funding_completion(response.payment_intent_id)
        .await
        .unwrap_err();
    assert!(!again.is_retryable());

    assert_eq!(h.count(TransactionType::Funding, TransactionStatus::Failed).await, 1);
    let intent = h
        .store
        .payment_intent(response.payment_intent_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(intent.status, PaymentIntentStatus::Failed);
}

#[tokio::test]
async fn test_funding_completion_is_idempotent() {
    let h = Harness::unqueued().await;
    let response = h.fund(dec!(10)).await;
    assert!(response.job_id.is_none());

    let first = h
        .pipeline
        .orchestrator
        .process_funding_completion(response.payment_intent_id)
        .await
        .unwrap();
    let second = h
        .pipeline
        .orchestrator
        .process_funding_completion(response.payment_intent_id)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.ledger().await.len(), 1);
    assert_eq!(h.sandbox.lightning.strike_balance().await, 0);
}

#[tokio::test]
async fn test_breez_outage_resumes_funding_without_reconverting() {
    let h = Harness::unqueued().await;
    h.sandbox
        .breez
        .faults()
        .fail_next("generate_invoice", 3, ProviderErrorKind::Transient)
        .await;
    let response = h.fund(dec!(30)).await;

    let err = h
        .pipeline
        .orchestrator
        .process_funding_completion(response.payment_intent_id)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let failed: Vec<_> = h
        .ledger()
        .await
        .into_iter()
        .filter(|t| t.transaction_type == TransactionType::Funding)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, TransactionStatus::Failed);
    assert_eq!(failed[0].metadata["retryable"], true);

    // Faults are spent; the next run picks up the executed conversion
    let entry = h
        .pipeline
        .orchestrator
        .process_funding_completion(response.payment_intent_id)
        .await
        .unwrap();
    assert_eq!(entry.status, TransactionStatus::Completed);
    assert_eq!(entry.metadata["resumed"], true);

    assert_eq!(h.count(TransactionType::Funding, TransactionStatus::Completed).await, 1);
    assert_eq!(h.count(TransactionType::Funding, TransactionStatus::Failed).await, 1);
    let conversions: Vec<_> = h
        .store
        .conversions_for_company(h.company_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.payment_intent_id == Some(response.payment_intent_id))
        .collect();
    assert_eq!(conversions.len(), 1);
    assert_eq!(h.sandbox.strike.faults().calls("create_quote").await, 1);
}

#[tokio::test]
async fn test_funding_lane_retries_breez_outage() {
    let h = Harness::queued().await;
    h.sandbox
        .breez
        .faults()
        .fail_next("generate_invoice", 3, ProviderErrorKind::Transient)
        .await;
    h.fund(dec!(30)).await;

    assert_eq!(h.drain(Lane::Funding).await, 2);

    assert_eq!(h.count(TransactionType::Funding, TransactionStatus::Failed).await, 1);
    assert_eq!(h.count(TransactionType::Funding, TransactionStatus::Completed).await, 1);
    assert!(h.pipeline.queue.failed_jobs(Lane::Funding, 10).await.unwrap().is_empty());
    assert_eq!(h.sandbox.strike.faults().calls("execute_quote").await, 1);
}

#[tokio::test]
async fn test_employee_cannot_fund() {
    let h = Harness::unqueued().await;
    let account = h.link_account().await;

    let err = h
        .pipeline
        .orchestrator
        .fund_company_wallet(paidin_pipeline::FundWalletRequest {
            requested_by: h.employee_id,
            company_id: h.company_id,
            plaid_account_id: account,
            amount_usd: dec!(100),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Authorization(_)));
    assert_eq!(h.sandbox.stripe.intent_count().await, 0);
}

#[tokio::test]
async fn test_swap_with_insufficient_balance() {
    let h = Harness::unqueued().await;
    h.fund_employee(5_000).await;

    let err = h
        .pipeline
        .orchestrator
        .process_employee_swap(SwapRequest {
            user_id: h.employee_id,
            company_id: h.company_id,
            direction: SwapDirection::BtcToUsd,
            amount: dec!(10000),
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::InsufficientFunds {
            requested: 10_000,
            available: 5_000
        }
    ));
    assert!(h.ledger().await.is_empty());
    assert_eq!(h.balance(h.employee_id, WalletType::Employee).await, 5_000);
}

#[tokio::test]
async fn test_swap_btc_to_usd() {
    let h = Harness::unqueued().await;
    h.fund_employee(20_000).await;

    let response = h
        .pipeline
        .orchestrator
        .process_employee_swap(SwapRequest {
            user_id: h.employee_id,
            company_id: h.company_id,
            direction: SwapDirection::BtcToUsd,
            amount: dec!(10000),
        })
        .await
        .unwrap();
    assert_eq!(response.status, RequestStatus::Completed);

    let entry = h
        .store
        .transaction(response.transaction_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.transaction_type, TransactionType::SwapBtcToUsd);
    assert_eq!(entry.currency, LedgerCurrency::Sats);
    assert_eq!(entry.status, TransactionStatus::Completed);
    assert_eq!(h.balance(h.employee_id, WalletType::Employee).await, 10_000);
    assert_eq!(h.sandbox.lightning.strike_balance().await, 0);
}

#[tokio::test]
async fn test_swap_usd_to_btc() {
    let h = Harness::unqueued().await;

    let response = h
        .pipeline
        .orchestrator
        .process_employee_swap(SwapRequest {
            user_id: h.employee_id,
            company_id: h.company_id,
            direction: SwapDirection::UsdToBtc,
            amount: dec!(50),
        })
        .await
        .unwrap();

    let entry = h
        .store
        .transaction(response.transaction_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.transaction_type, TransactionType::SwapUsdToBtc);
    assert_eq!(entry.amount, dec!(50));
    assert_eq!(entry.currency, LedgerCurrency::Usd);
    assert_eq!(h.balance(h.employee_id, WalletType::Employee).await, 51_282);
}

#[tokio::test]
async fn test_strike_outage_fails_swap() {
    let h = Harness::unqueued().await;
    h.sandbox
        .strike
        .faults()
        .fail_next("create_quote", 3, ProviderErrorKind::Transient)
        .await;

    let err = h
        .pipeline
        .orchestrator
        .process_employee_swap(SwapRequest {
            user_id: h.employee_id,
            company_id: h.company_id,
            direction: SwapDirection::UsdToBtc,
            amount: dec!(20),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Provider(_)));
    assert!(err.is_retryable());
    assert_eq!(h.sandbox.strike.faults().calls("create_quote").await, 3);

    let ledger = h.ledger().await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].status, TransactionStatus::Failed);
    assert_eq!(ledger[0].metadata["retryable"], true);
}

#[tokio::test]
async fn test_deferred_swap_runs_on_conversion_lane() {
    let h = Harness::queued().await;

    let response = h
        .pipeline
        .orchestrator
        .queue_employee_swap(SwapRequest {
            user_id: h.employee_id,
            company_id: h.company_id,
            direction: SwapDirection::UsdToBtc,
            amount: dec!(5),
        })
        .await
        .unwrap();
    assert_eq!(response.status, RequestStatus::Queued);
    assert!(h.ledger().await.is_empty());

    assert_eq!(h.drain(Lane::Conversion).await, 1);
    assert_eq!(
        h.count(TransactionType::SwapUsdToBtc, TransactionStatus::Completed).await,
        1
    );
}

#[tokio::test]
async fn test_payout_completes_on_breez_webhook() {
    let h = Harness::queued().await;
    h.fund(dec!(100)).await;
    h.drain(Lane::Funding).await;

    let response = h
        .pipeline
        .orchestrator
        .process_employee_payout(PayoutRequest {
            requested_by: h.admin_id,
            company_id: h.company_id,
            employee_id: h.employee_id,
            amount_sats: 50_000,
            description: Some("October bonus".into()),
        })
        .await
        .unwrap();
    assert_eq!(response.status, RequestStatus::Queued);
    assert!(response.invoice_id.is_some());

    assert_eq!(h.drain(Lane::Payout).await, 1);
    let payout = h
        .ledger()
        .await
        .into_iter()
        .find(|t| t.transaction_type == TransactionType::Payout)
        .unwrap();
    assert_eq!(payout.status, TransactionStatus::AwaitingPayment);
    assert_eq!(payout.source_id, response.invoice_id.unwrap().to_string());
    let hash = payout.meta_str("payment_hash").unwrap().to_string();

    h.pipeline
        .dispatcher
        .handle_webhook(
            paidin_core::ProviderKind::Breez,
            "invoice.paid",
            "breez_evt_1",
            serde_json::json!({ "id": "breez_evt_1", "data": { "paymentHash": hash } }),
        )
        .await
        .unwrap();
    assert_eq!(h.drain(Lane::Webhook).await, 1);

    let done = h.store.transaction(payout.id).await.unwrap().unwrap();
    assert_eq!(done.status, TransactionStatus::Completed);
    assert_eq!(h.balance(h.employee_id, WalletType::Employee).await, 50_000);
    assert_eq!(h.balance(h.admin_id, WalletType::Company).await, 52_564);
}

#[tokio::test]
async fn test_payout_without_company_wallet() {
    let h = Harness::queued().await;

    h.pipeline
        .orchestrator
        .process_employee_payout(PayoutRequest {
            requested_by: h.admin_id,
            company_id: h.company_id,
            employee_id: h.employee_id,
            amount_sats: 1_000,
            description: None,
        })
        .await
        .unwrap();
    h.drain(Lane::Payout).await;

    let dead = h.pipeline.queue.failed_jobs(Lane::Payout, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(h.count(TransactionType::Payout, TransactionStatus::Failed).await, 1);
}

#[tokio::test]
async fn test_degraded_payout_is_accepted() {
    let h = Harness::unqueued().await;

    let response = h
        .pipeline
        .orchestrator
        .process_employee_payout(PayoutRequest {
            requested_by: h.admin_id,
            company_id: h.company_id,
            employee_id: h.employee_id,
            amount_sats: 1_000,
            description: None,
        })
        .await
        .unwrap();
    assert_eq!(response.status, RequestStatus::Accepted);
    assert!(response.invoice_id.is_none());
}

#[tokio::test]
async fn test_history_scoped_by_role() {
    let h = Harness::unqueued().await;
    let funded = h.fund(dec!(10)).await;
    h.pipeline
        .orchestrator
        .process_funding_completion(funded.payment_intent_id)
        .await
        .unwrap();
    h.pipeline
        .orchestrator
        .process_employee_swap(SwapRequest {
            user_id: h.employee_id,
            company_id: h.company_id,
            direction: SwapDirection::UsdToBtc,
            amount: dec!(1),
        })
        .await
        .unwrap();

    let orchestrator = &h.pipeline.orchestrator;
    let admin = orchestrator
        .get_transaction_history(h.admin_id, h.company_id, None)
        .await
        .unwrap();
    let employee = orchestrator
        .get_transaction_history(h.employee_id, h.company_id, None)
        .await
        .unwrap();
    assert_eq!(admin.len(), 2);
    assert_eq!(employee.len(), 1);
    assert_eq!(employee[0].transaction_type, TransactionType::SwapUsdToBtc);

    let outsider = orchestrator
        .get_transaction_history(uuid::Uuid::new_v4(), h.company_id, None)
        .await
        .unwrap_err();
    assert!(matches!(outsider, PipelineError::Authorization(_)));
}
