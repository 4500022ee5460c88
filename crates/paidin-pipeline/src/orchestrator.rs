//! Payment Orchestrator
//!
//! Sequences adapter calls for the three money flows and records every
//! attempt in the ledger. The orchestrator holds no state between calls:
//! each step's result is stored before the next step starts.
//!
//! ```text
//! fund_company_wallet ─▶ Plaid auth ─▶ Stripe debit ─▶ [funding job]
//!                                                          │
//!   process_funding_completion ◀───────────────────────────┘ (or Stripe webhook)
//!     └─▶ Strike quote ─▶ execute ─▶ Breez invoice ─▶ Strike pays ─▶ sync
//!
//! process_employee_payout ─▶ [payout job] ─▶ employee invoice ─▶ company wallet pays
//!                                               └─▶ awaiting_payment ─▶ Breez webhook ─▶ completed
//! ```
//!
//! Ledger discipline: pre-flight checks (authorization, validation, balance)
//! write nothing. Once provider calls begin, a failure leaves exactly one
//! `failed` entry for the attempt. Funding, payout and swap runs first append
//! a `pending` entry that claims their ledger key; a second run finding the
//! claim returns it instead of moving money again.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use paidin_core::model::{MAX_SATS, btc_to_sats, sats_to_btc, usd_to_cents};
use paidin_core::{
    BreezWallet, Conversion, ConversionStatus, CoreError, LedgerCurrency, LedgerKey, MemberRole,
    PaymentIntent, PaymentIntentStatus, PaymentStore, PlaidAccount, PlaidAccountStatus,
    ProviderKind, TransactionStatus, TransactionType, WalletTransaction, WalletType,
};
use paidin_providers::mock::SandboxProviders;
use paidin_providers::stripe::StripePaymentIntent;
use paidin_providers::{BreezApi, PlaidApi, ProviderError, Settlement, StrikeApi, StripeApi};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::jobs::{FundingJob, JobQueue};

/// Default page size for transaction history
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Largest page of transaction history served at once
pub const MAX_HISTORY_LIMIT: usize = 200;

/// Provider adapters used by the orchestrator
#[derive(Clone)]
pub struct Providers {
    pub plaid: Arc<dyn PlaidApi>,
    pub stripe: Arc<dyn StripeApi>,
    pub strike: Arc<dyn StrikeApi>,
    pub breez: Arc<dyn BreezApi>,
}

impl Providers {
    pub fn sandbox(sandbox: &SandboxProviders) -> Self {
        Self {
            plaid: sandbox.plaid.clone(),
            stripe: sandbox.stripe.clone(),
            strike: sandbox.strike.clone(),
            breez: sandbox.breez.clone(),
        }
    }
}

// ============================================================================
// Requests & responses
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FundWalletRequest {
    pub requested_by: Uuid,
    pub company_id: Uuid,
    pub plaid_account_id: Uuid,
    pub amount_usd: Decimal,
}

#[derive(Clone, Debug, Serialize)]
pub struct FundWalletResponse {
    pub payment_intent_id: Uuid,
    pub provider_ref: String,
    pub status: PaymentIntentStatus,

    /// Funding job, when the queue accepted one
    pub job_id: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapDirection {
    BtcToUsd,
    UsdToBtc,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwapRequest {
    /// Employee whose wallet is swapped
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub direction: SwapDirection,

    /// Satoshis for `btc_to_usd`, dollars for `usd_to_btc`
    pub amount: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Finished synchronously
    Completed,

    /// A job was enqueued
    Queued,

    /// Accepted while the queue is unavailable; no job exists
    Accepted,
}

#[derive(Clone, Debug, Serialize)]
pub struct SwapResponse {
    pub status: RequestStatus,
    pub transaction_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub requested_by: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub amount_sats: u64,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PayoutResponse {
    pub status: RequestStatus,

    /// Payout job id; the payout's ledger entry is keyed by it
    pub invoice_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentDetails {
    pub provider_ref: String,
    pub amount_usd: Decimal,
    pub currency: String,
    pub funding_status: Option<TransactionStatus>,
    pub transaction_id: Option<Uuid>,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentStatus {
    pub payment_intent_id: Uuid,
    pub status: PaymentIntentStatus,
    pub details: PaymentDetails,
}

enum SwapAmount {
    Sats(u64),
    Usd(Decimal),
}

enum Claim {
    Acquired(WalletTransaction),
    Held(WalletTransaction),
}

type Trail = Map<String, Value>;

fn funding_key(intent: &PaymentIntent) -> LedgerKey {
    LedgerKey::new(
        TransactionType::Funding,
        ProviderKind::Stripe,
        intent.provider_ref.clone(),
    )
}

fn funding_entry(intent: &PaymentIntent, status: TransactionStatus, stage: &str) -> WalletTransaction {
    WalletTransaction::new(
        funding_key(intent),
        intent.company_id,
        intent.amount_usd(),
        LedgerCurrency::Usd,
        status,
    )
    .for_user(intent.user_id)
    .with_metadata(json!({
        "stage": stage,
        "payment_intent_id": intent.id,
    }))
}

fn validate_usd(amount: Decimal) -> Result<i64> {
    if amount <= Decimal::ZERO {
        return Err(PipelineError::Validation("amount must be positive".into()));
    }
    usd_to_cents(amount).ok_or_else(|| {
        PipelineError::Validation("amount must be a whole number of cents within range".into())
    })
}

fn conversion_sats(conversion: &Conversion) -> Result<u64> {
    btc_to_sats(conversion.amount_btc).ok_or_else(|| {
        PipelineError::Validation(format!(
            "conversion {} amount {} BTC is out of range",
            conversion.id, conversion.amount_btc
        ))
    })
}

fn validate_swap(request: &SwapRequest) -> Result<SwapAmount> {
    match request.direction {
        SwapDirection::BtcToUsd => request
            .amount
            .to_u64()
            .filter(|sats| (1..=MAX_SATS).contains(sats) && Decimal::from(*sats) == request.amount)
            .map(SwapAmount::Sats)
            .ok_or_else(|| {
                PipelineError::Validation("amount must be a positive whole number of sats".into())
            }),
        SwapDirection::UsdToBtc => validate_usd(request.amount).map(|_| SwapAmount::Usd(request.amount)),
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct PaymentOrchestrator {
    store: Arc<dyn PaymentStore>,
    providers: Providers,
    queue: JobQueue,
}

impl PaymentOrchestrator {
    pub fn new(store: Arc<dyn PaymentStore>, providers: Providers, queue: JobQueue) -> Self {
        Self {
            store,
            providers,
            queue,
        }
    }

    pub const fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn store(&self) -> Arc<dyn PaymentStore> {
        self.store.clone()
    }

    // ------------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------------

    async fn require_member(&self, company_id: Uuid, user_id: Uuid) -> Result<MemberRole> {
        self.store
            .member_role(company_id, user_id)
            .await?
            .ok_or_else(|| {
                PipelineError::Authorization(format!(
                    "user {user_id} is not a member of company {company_id}"
                ))
            })
    }

    async fn require_admin(&self, company_id: Uuid, user_id: Uuid) -> Result<()> {
        match self.require_member(company_id, user_id).await? {
            MemberRole::Admin => Ok(()),
            MemberRole::Employee => Err(PipelineError::Authorization(
                "company admin role required".into(),
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Ledger helpers
    // ------------------------------------------------------------------------

    /// Append a pending entry holding its key, unless another run already holds it
    async fn claim(&self, entry: WalletTransaction) -> Result<Claim> {
        let key = entry.key();
        if let Some(holder) = self.store.active_transaction(&key).await? {
            return Ok(Claim::Held(holder));
        }
        match self.store.append_transaction(&entry).await {
            Ok(()) => Ok(Claim::Acquired(entry)),
            Err(CoreError::DuplicateLedgerEntry(_)) => self
                .store
                .active_transaction(&key)
                .await?
                .map(Claim::Held)
                .ok_or_else(|| CoreError::DuplicateLedgerEntry(key.to_string()).into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Close a claim with the outcome of its provider chain
    async fn settle_claim(
        &self,
        claim: &WalletTransaction,
        outcome: Result<()>,
        success: TransactionStatus,
        mut trail: Trail,
    ) -> Result<WalletTransaction> {
        match outcome {
            Ok(()) => Ok(self
                .store
                .transition_transaction(claim.id, success, Some(Value::Object(trail)))
                .await?),
            Err(e) => {
                trail.insert("error".into(), json!(e.to_string()));
                trail.insert("retryable".into(), json!(e.is_retryable()));
                if let Err(store_err) = self
                    .store
                    .transition_transaction(claim.id, TransactionStatus::Failed, Some(Value::Object(trail)))
                    .await
                {
                    tracing::error!(
                        transaction_id = %claim.id,
                        error = %store_err,
                        "Failed to record ledger failure"
                    );
                }
                warn!(
                    transaction_id = %claim.id,
                    key = %claim.key(),
                    error = %e,
                    "Ledger entry failed"
                );
                Err(e)
            }
        }
    }

    /// Append a standalone failed entry for an attempt that never held a claim
    async fn record_failure(&self, mut entry: WalletTransaction, err: &PipelineError) {
        entry.status = TransactionStatus::Failed;
        if let Value::Object(meta) = &mut entry.metadata {
            meta.insert("error".into(), json!(err.to_string()));
            meta.insert("retryable".into(), json!(err.is_retryable()));
        }
        warn!(key = %entry.key(), error = %err, "Recording failed attempt");
        if let Err(store_err) = self.store.append_transaction(&entry).await {
            tracing::error!(key = %entry.key(), error = %store_err, "Failed to record ledger failure");
        }
    }

    async fn refresh_wallet(&self, wallet_id: Uuid) {
        if let Err(e) = self.providers.breez.sync_wallet(wallet_id).await {
            warn!(wallet_id = %wallet_id, error = %e, "Wallet sync failed; cached balance is stale");
        }
    }

    // ------------------------------------------------------------------------
    // Funding
    // ------------------------------------------------------------------------

    /// Debit the linked bank account and schedule the BTC conversion
    pub async fn fund_company_wallet(&self, request: FundWalletRequest) -> Result<FundWalletResponse> {
        let cents = validate_usd(request.amount_usd)?;
        self.require_admin(request.company_id, request.requested_by).await?;

        let account = self
            .store
            .plaid_account(request.plaid_account_id)
            .await?
            .filter(|a| a.belongs_to(request.requested_by, request.company_id))
            .ok_or_else(|| {
                PipelineError::Authorization("bank account does not belong to requester".into())
            })?;
        if account.status != PlaidAccountStatus::Active {
            return Err(PipelineError::Validation("bank account is not active".into()));
        }

        let intent_id = Uuid::new_v4();
        let metadata: HashMap<String, String> = [
            ("payment_intent_id", intent_id.to_string()),
            ("company_id", request.company_id.to_string()),
            ("user_id", request.requested_by.to_string()),
            ("plaid_account_id", account.id.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let remote = match self.initiate_debit(&account, cents, &metadata, intent_id).await {
            Ok(remote) => remote,
            Err(e) => {
                let entry = WalletTransaction::new(
                    LedgerKey::new(TransactionType::Funding, ProviderKind::Stripe, intent_id.to_string()),
                    request.company_id,
                    request.amount_usd,
                    LedgerCurrency::Usd,
                    TransactionStatus::Failed,
                )
                .for_user(request.requested_by)
                .with_metadata(json!({
                    "stage": "initiate",
                    "payment_intent_id": intent_id,
                    "plaid_account_id": account.id,
                }));
                self.record_failure(entry, &e).await;
                return Err(e);
            }
        };

        let mut intent = PaymentIntent::new(
            request.company_id,
            request.requested_by,
            account.id,
            remote.id.clone(),
            cents,
            remote.local_status(),
        );
        intent.id = intent_id;
        intent.metadata = metadata;
        self.store.insert_payment_intent(&intent).await?;

        let job = self
            .queue
            .add_funding_job(FundingJob {
                payment_intent_id: intent.id,
                company_id: intent.company_id,
            })
            .await;

        info!(
            payment_intent = %intent.id,
            provider_ref = %intent.provider_ref,
            amount_usd = %request.amount_usd,
            status = intent.status.as_str(),
            queued = job.is_some(),
            "Funding initiated"
        );

        Ok(FundWalletResponse {
            payment_intent_id: intent.id,
            provider_ref: intent.provider_ref,
            status: intent.status,
            job_id: job.map(|h| h.id),
        })
    }

    async fn initiate_debit(
        &self,
        account: &PlaidAccount,
        cents: i64,
        metadata: &HashMap<String, String>,
        intent_id: Uuid,
    ) -> Result<StripePaymentIntent> {
        let ach = self.providers.plaid.get_auth(account.id).await?;
        let method = self
            .providers
            .stripe
            .create_payment_method_from_ach(&account.name, &ach)
            .await?;
        let created = self
            .providers
            .stripe
            .create_payment_intent(cents, &method.id, metadata, &format!("fund-{intent_id}"))
            .await?;
        Ok(self.providers.stripe.confirm_payment_intent(&created.id).await?)
    }

    async fn load_intent(&self, id: Uuid) -> Result<PaymentIntent> {
        self.store
            .payment_intent(id)
            .await?
            .ok_or_else(|| CoreError::not_found("payment intent", id).into())
    }

    /// Convert a settled debit into BTC in the company wallet.
    ///
    /// Safe to call repeatedly: a completed or in-flight run for the same
    /// intent is returned as is.
    pub async fn process_funding_completion(&self, payment_intent_id: Uuid) -> Result<WalletTransaction> {
        let mut intent = self.load_intent(payment_intent_id).await?;
        let key = funding_key(&intent);

        if let Some(holder) = self.store.active_transaction(&key).await? {
            info!(
                payment_intent = %intent.id,
                status = holder.status.as_str(),
                "Funding already recorded"
            );
            return Ok(holder);
        }

        let remote = match self
            .providers
            .stripe
            .retrieve_payment_intent(&intent.provider_ref)
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                let err = PipelineError::from(e);
                let entry = funding_entry(&intent, TransactionStatus::Failed, "verify");
                self.record_failure(entry, &err).await;
                return Err(err);
            }
        };

        if intent.apply_status(remote.local_status()) {
            self.store.update_payment_intent(&intent).await?;
        }

        match remote.settlement() {
            Settlement::Settled => {}
            Settlement::Pending => {
                info!(payment_intent = %intent.id, "Debit still processing");
                return Err(PipelineError::NotSettled(intent.provider_ref));
            }
            Settlement::Failed(reason) => {
                self.record_settlement_failure(&intent, &reason).await?;
                return Err(ProviderError::terminal(
                    ProviderKind::Stripe,
                    format!("payment {} failed: {reason}", intent.provider_ref),
                )
                .into());
            }
        }

        let entry = funding_entry(&intent, TransactionStatus::Pending, "convert");
        let claim = match self.claim(entry).await? {
            Claim::Held(holder) => return Ok(holder),
            Claim::Acquired(claim) => claim,
        };

        let mut trail = Trail::new();
        let outcome = self.convert_and_deposit(&intent, &mut trail).await;
        let entry = self
            .settle_claim(&claim, outcome, TransactionStatus::Completed, trail)
            .await?;

        info!(
            payment_intent = %intent.id,
            transaction_id = %entry.id,
            amount_usd = %entry.amount,
            "Funding completed"
        );
        Ok(entry)
    }

    /// Record a returned or declined debit once, however many paths report it
    async fn record_settlement_failure(&self, intent: &PaymentIntent, reason: &str) -> Result<()> {
        let key = funding_key(intent);
        let recorded = self
            .store
            .transactions_for_key(&key)
            .await?
            .iter()
            .any(|t| t.status == TransactionStatus::Failed && t.meta_str("stage") == Some("settlement"));
        if recorded {
            return Ok(());
        }

        let entry = funding_entry(intent, TransactionStatus::Failed, "settlement")
            .with_metadata(json!({
                "stage": "settlement",
                "payment_intent_id": intent.id,
                "error": reason,
                "retryable": false,
            }));
        warn!(payment_intent = %intent.id, reason, "Bank debit failed");
        self.store.append_transaction(&entry).await?;
        Ok(())
    }

    /// Conversion already executed for this intent by an earlier attempt
    async fn executed_conversion(&self, intent: &PaymentIntent) -> Result<Option<Conversion>> {
        Ok(self
            .store
            .conversions_for_company(intent.company_id)
            .await?
            .into_iter()
            .find(|c| {
                c.payment_intent_id == Some(intent.id) && c.status == ConversionStatus::Completed
            }))
    }

    async fn convert_and_deposit(&self, intent: &PaymentIntent, trail: &mut Trail) -> Result<()> {
        let conversion = match self.executed_conversion(intent).await? {
            Some(existing) => {
                trail.insert("resumed".into(), json!(true));
                existing
            }
            None => {
                let quote = self.providers.strike.create_quote(intent.amount_usd()).await?;
                trail.insert("quote_id".into(), json!(quote.id));
                let executed = self.providers.strike.execute_quote(&quote).await?;
                let conversion = Conversion::completed(
                    intent.company_id,
                    intent.user_id,
                    executed.id.clone(),
                    executed.usd_amount(),
                    executed.btc_amount(),
                    executed.usd_per_btc(),
                )
                .with_payment_intent(intent.id);
                self.store.insert_conversion(&conversion).await?;
                conversion
            }
        };
        trail.insert("quote_id".into(), json!(conversion.quote_ref));
        trail.insert("conversion_id".into(), json!(conversion.id));
        trail.insert("amount_btc".into(), json!(conversion.amount_btc));
        trail.insert("exchange_rate".into(), json!(conversion.exchange_rate));

        let wallet = self
            .providers
            .breez
            .initialize_wallet(intent.company_id, None, WalletType::Company)
            .await?;
        trail.insert("wallet_id".into(), json!(wallet.id));

        let sats = conversion_sats(&conversion)?;
        let invoice = self
            .providers
            .breez
            .generate_invoice(wallet.id, sats, &format!("PaidIn funding {}", intent.provider_ref))
            .await?;
        trail.insert("invoice_id".into(), json!(invoice.payment_hash));
        trail.insert("amount_sats".into(), json!(sats));

        let payment = self.providers.strike.pay_invoice(&invoice.bolt11).await?;
        trail.insert("payment_id".into(), json!(payment.payment_id));

        self.refresh_wallet(wallet.id).await;
        Ok(())
    }

    /// Stripe reported success for `provider_ref`
    pub async fn complete_funding_by_ref(&self, provider_ref: &str) -> Result<Option<WalletTransaction>> {
        let Some(intent) = self.store.payment_intent_by_ref(provider_ref).await? else {
            info!(provider_ref, "Unknown payment intent; ignoring");
            return Ok(None);
        };
        self.process_funding_completion(intent.id).await.map(Some)
    }

    /// Stripe reported a failed or canceled debit for `provider_ref`
    pub async fn fail_funding_by_ref(&self, provider_ref: &str, reason: &str) -> Result<()> {
        let Some(mut intent) = self.store.payment_intent_by_ref(provider_ref).await? else {
            info!(provider_ref, "Unknown payment intent; ignoring");
            return Ok(());
        };
        if intent.apply_status(PaymentIntentStatus::Failed) {
            self.store.update_payment_intent(&intent).await?;
        }
        if intent.status == PaymentIntentStatus::Failed {
            self.record_settlement_failure(&intent, reason).await?;
        }
        Ok(())
    }

    /// Stripe reported the debit is in flight
    pub async fn mark_processing_by_ref(&self, provider_ref: &str) -> Result<()> {
        if let Some(mut intent) = self.store.payment_intent_by_ref(provider_ref).await? {
            if intent.apply_status(PaymentIntentStatus::Processing) {
                self.store.update_payment_intent(&intent).await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Swaps
    // ------------------------------------------------------------------------

    /// Swap synchronously
    pub async fn process_employee_swap(&self, request: SwapRequest) -> Result<SwapResponse> {
        let entry = self.run_swap(Uuid::new_v4(), &request).await?;
        Ok(SwapResponse {
            status: RequestStatus::Completed,
            transaction_id: Some(entry.id),
            job_id: None,
        })
    }

    /// Validate now, swap later on the conversion lane
    pub async fn queue_employee_swap(&self, request: SwapRequest) -> Result<SwapResponse> {
        validate_swap(&request)?;
        self.require_member(request.company_id, request.user_id).await?;

        let job = self.queue.add_conversion_job(request).await;
        Ok(SwapResponse {
            status: if job.is_some() {
                RequestStatus::Queued
            } else {
                RequestStatus::Accepted
            },
            transaction_id: None,
            job_id: job.map(|h| h.id),
        })
    }

    /// Conversion-lane entry point; the job id keys the ledger entry
    pub async fn process_queued_swap(&self, job_id: Uuid, request: &SwapRequest) -> Result<WalletTransaction> {
        self.run_swap(job_id, request).await
    }

    async fn run_swap(&self, swap_id: Uuid, request: &SwapRequest) -> Result<WalletTransaction> {
        let amount = validate_swap(request)?;
        self.require_member(request.company_id, request.user_id).await?;

        let (transaction_type, ledger_amount, currency) = match amount {
            SwapAmount::Sats(sats) => (TransactionType::SwapBtcToUsd, Decimal::from(sats), LedgerCurrency::Sats),
            SwapAmount::Usd(usd) => (TransactionType::SwapUsdToBtc, usd, LedgerCurrency::Usd),
        };
        let key = LedgerKey::new(transaction_type, ProviderKind::Strike, swap_id.to_string());
        if let Some(holder) = self.store.active_transaction(&key).await? {
            return Ok(holder);
        }
        let entry = |status| {
            WalletTransaction::new(key.clone(), request.company_id, ledger_amount, currency, status)
                .for_user(request.user_id)
                .with_metadata(json!({ "swap_id": swap_id }))
        };

        let wallet = match self
            .providers
            .breez
            .initialize_wallet(request.company_id, Some(request.user_id), WalletType::Employee)
            .await
        {
            Ok(wallet) => wallet,
            Err(e) => {
                let err = PipelineError::from(e);
                self.record_failure(entry(TransactionStatus::Failed), &err).await;
                return Err(err);
            }
        };

        if let SwapAmount::Sats(sats) = amount {
            if wallet.balance_sats < sats {
                return Err(PipelineError::InsufficientFunds {
                    requested: sats,
                    available: wallet.balance_sats,
                });
            }
        }

        let claim = match self.claim(entry(TransactionStatus::Pending)).await? {
            Claim::Held(holder) => return Ok(holder),
            Claim::Acquired(claim) => claim,
        };

        let mut trail = Trail::new();
        trail.insert("wallet_id".into(), json!(wallet.id));
        let outcome = match amount {
            SwapAmount::Sats(sats) => self.swap_btc_to_usd(request, &wallet, sats, swap_id, &mut trail).await,
            SwapAmount::Usd(usd) => self.swap_usd_to_btc(request, &wallet, usd, swap_id, &mut trail).await,
        };
        let entry = self
            .settle_claim(&claim, outcome, TransactionStatus::Completed, trail)
            .await?;

        info!(
            swap_id = %swap_id,
            user_id = %request.user_id,
            direction = ?request.direction,
            amount = %ledger_amount,
            "Swap completed"
        );
        Ok(entry)
    }

    async fn swap_btc_to_usd(
        &self,
        request: &SwapRequest,
        wallet: &BreezWallet,
        sats: u64,
        swap_id: Uuid,
        trail: &mut Trail,
    ) -> Result<()> {
        let invoice = self
            .providers
            .strike
            .create_invoice(sats_to_btc(sats), &format!("PaidIn swap {swap_id}"))
            .await?;
        trail.insert("invoice_id".into(), json!(invoice.invoice_id));

        let payment = self.providers.breez.pay_invoice(wallet.id, &invoice.ln_invoice).await?;
        trail.insert("payment_id".into(), json!(payment.id));
        trail.insert("payment_hash".into(), json!(payment.payment_hash));

        let quote = self.providers.strike.swap_btc_to_usd(sats).await?;
        let conversion = Conversion::completed(
            request.company_id,
            request.user_id,
            quote.id.clone(),
            quote.usd_amount(),
            quote.btc_amount(),
            quote.usd_per_btc(),
        );
        self.store.insert_conversion(&conversion).await?;
        trail.insert("quote_id".into(), json!(quote.id));
        trail.insert("conversion_id".into(), json!(conversion.id));
        trail.insert("amount_usd".into(), json!(conversion.amount_usd));
        trail.insert("exchange_rate".into(), json!(conversion.exchange_rate));

        self.refresh_wallet(wallet.id).await;
        Ok(())
    }

    async fn swap_usd_to_btc(
        &self,
        request: &SwapRequest,
        wallet: &BreezWallet,
        usd: Decimal,
        swap_id: Uuid,
        trail: &mut Trail,
    ) -> Result<()> {
        let quote = self.providers.strike.create_quote(usd).await?;
        trail.insert("quote_id".into(), json!(quote.id));
        let executed = self.providers.strike.execute_quote(&quote).await?;

        let conversion = Conversion::completed(
            request.company_id,
            request.user_id,
            executed.id.clone(),
            executed.usd_amount(),
            executed.btc_amount(),
            executed.usd_per_btc(),
        );
        self.store.insert_conversion(&conversion).await?;
        trail.insert("conversion_id".into(), json!(conversion.id));
        trail.insert("amount_btc".into(), json!(conversion.amount_btc));
        trail.insert("exchange_rate".into(), json!(conversion.exchange_rate));

        let sats = conversion_sats(&conversion)?;
        let invoice = self
            .providers
            .breez
            .generate_invoice(wallet.id, sats, &format!("PaidIn swap {swap_id}"))
            .await?;
        trail.insert("invoice_id".into(), json!(invoice.payment_hash));
        trail.insert("amount_sats".into(), json!(sats));

        let payment = self.providers.strike.pay_invoice(&invoice.bolt11).await?;
        trail.insert("payment_id".into(), json!(payment.payment_id));

        self.refresh_wallet(wallet.id).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Payouts
    // ------------------------------------------------------------------------

    /// Authorize and enqueue a payout; no provider calls happen here
    pub async fn process_employee_payout(&self, request: PayoutRequest) -> Result<PayoutResponse> {
        if !(1..=MAX_SATS).contains(&request.amount_sats) {
            return Err(PipelineError::Validation(format!(
                "amount_sats must be between 1 and {MAX_SATS}"
            )));
        }
        self.require_admin(request.company_id, request.requested_by).await?;
        if self
            .store
            .member_role(request.company_id, request.employee_id)
            .await?
            .is_none()
        {
            return Err(PipelineError::Validation(
                "employee is not a member of this company".into(),
            ));
        }

        let job = self.queue.add_payout_job(request).await;
        Ok(PayoutResponse {
            status: if job.is_some() {
                RequestStatus::Queued
            } else {
                RequestStatus::Accepted
            },
            invoice_id: job.map(|h| h.id),
        })
    }

    /// Payout-lane entry point. Leaves the entry `awaiting_payment` until
    /// Breez confirms the employee invoice was paid.
    pub async fn process_payout(&self, job_id: Uuid, request: &PayoutRequest) -> Result<WalletTransaction> {
        let key = LedgerKey::new(TransactionType::Payout, ProviderKind::Breez, job_id.to_string());
        let entry = WalletTransaction::new(
            key,
            request.company_id,
            Decimal::from(request.amount_sats),
            LedgerCurrency::Sats,
            TransactionStatus::Pending,
        )
        .for_user(request.employee_id)
        .with_metadata(json!({
            "requested_by": request.requested_by,
            "description": request.description,
        }));

        let claim = match self.claim(entry).await? {
            Claim::Held(holder) => return Ok(holder),
            Claim::Acquired(claim) => claim,
        };

        let mut trail = Trail::new();
        let outcome = self.send_payout(request, &mut trail).await;
        let entry = self
            .settle_claim(&claim, outcome, TransactionStatus::AwaitingPayment, trail)
            .await?;

        info!(
            job_id = %job_id,
            employee_id = %request.employee_id,
            amount_sats = request.amount_sats,
            "Payout sent; awaiting confirmation"
        );
        Ok(entry)
    }

    async fn send_payout(&self, request: &PayoutRequest, trail: &mut Trail) -> Result<()> {
        let company_wallet = self
            .store
            .find_wallet(request.company_id, None, WalletType::Company)
            .await?
            .ok_or_else(|| {
                PipelineError::WalletNotFound(format!("company {} has no wallet", request.company_id))
            })?;
        if company_wallet.balance_sats < request.amount_sats {
            return Err(PipelineError::InsufficientFunds {
                requested: request.amount_sats,
                available: company_wallet.balance_sats,
            });
        }
        trail.insert("company_wallet_id".into(), json!(company_wallet.id));

        let employee_wallet = self
            .providers
            .breez
            .initialize_wallet(request.company_id, Some(request.employee_id), WalletType::Employee)
            .await?;
        trail.insert("employee_wallet_id".into(), json!(employee_wallet.id));

        let description = request.description.as_deref().unwrap_or("PaidIn payout");
        let invoice = self
            .providers
            .breez
            .generate_invoice(employee_wallet.id, request.amount_sats, description)
            .await?;
        trail.insert("payment_hash".into(), json!(invoice.payment_hash));
        trail.insert("invoice".into(), json!(invoice.bolt11));

        let payment = self
            .providers
            .breez
            .pay_invoice(company_wallet.id, &invoice.bolt11)
            .await?;
        trail.insert("payment_id".into(), json!(payment.id));
        trail.insert("fee_msat".into(), json!(payment.fee_msat));

        self.refresh_wallet(company_wallet.id).await;
        Ok(())
    }

    /// Breez confirmed the invoice behind `payment_hash` was paid
    pub async fn complete_payout(&self, payment_hash: &str) -> Result<Option<WalletTransaction>> {
        let Some(entry) = self
            .store
            .find_transaction_by_meta(TransactionType::Payout, "payment_hash", payment_hash)
            .await?
        else {
            return Ok(None);
        };
        if entry.status != TransactionStatus::AwaitingPayment {
            return Ok(Some(entry));
        }

        let done = self
            .store
            .transition_transaction(
                entry.id,
                TransactionStatus::Completed,
                Some(json!({ "settled_at": Utc::now() })),
            )
            .await?;
        if let Some(wallet_id) = entry
            .meta_str("employee_wallet_id")
            .and_then(|id| Uuid::parse_str(id).ok())
        {
            self.refresh_wallet(wallet_id).await;
        }

        info!(transaction_id = %done.id, payment_hash, "Payout completed");
        Ok(Some(done))
    }

    /// Breez reported the payment behind `payment_hash` failed
    pub async fn fail_payout(&self, payment_hash: &str, reason: &str) -> Result<Option<WalletTransaction>> {
        let Some(entry) = self
            .store
            .find_transaction_by_meta(TransactionType::Payout, "payment_hash", payment_hash)
            .await?
        else {
            return Ok(None);
        };
        if entry.status != TransactionStatus::AwaitingPayment {
            return Ok(Some(entry));
        }

        let failed = self
            .store
            .transition_transaction(
                entry.id,
                TransactionStatus::Failed,
                Some(json!({ "error": reason, "retryable": false })),
            )
            .await?;
        warn!(transaction_id = %failed.id, payment_hash, reason, "Payout failed");
        Ok(Some(failed))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Intent status, refreshed from Stripe while non-terminal
    pub async fn get_payment_status(&self, requested_by: Uuid, payment_intent_id: Uuid) -> Result<PaymentStatus> {
        let mut intent = self.load_intent(payment_intent_id).await?;
        self.require_member(intent.company_id, requested_by).await?;

        let mut failure = None;
        if !intent.status.is_terminal() {
            match self
                .providers
                .stripe
                .retrieve_payment_intent(&intent.provider_ref)
                .await
            {
                Ok(remote) => {
                    failure = remote.failure_message();
                    if intent.apply_status(remote.local_status()) {
                        self.store.update_payment_intent(&intent).await?;
                    }
                }
                Err(e) => {
                    warn!(payment_intent = %intent.id, error = %e, "Status refresh failed; serving cached status");
                }
            }
        }

        let latest = self
            .store
            .transactions_for_key(&funding_key(&intent))
            .await?
            .into_iter()
            .last();
        if failure.is_none() {
            failure = latest
                .as_ref()
                .filter(|t| t.status == TransactionStatus::Failed)
                .and_then(|t| t.meta_str("error").map(str::to_string));
        }

        Ok(PaymentStatus {
            payment_intent_id: intent.id,
            status: intent.status,
            details: PaymentDetails {
                amount_usd: intent.amount_usd(),
                provider_ref: intent.provider_ref,
                currency: intent.currency,
                funding_status: latest.as_ref().map(|t| t.status),
                transaction_id: latest.map(|t| t.id),
                failure,
                created_at: intent.created_at,
                updated_at: intent.updated_at,
            },
        })
    }

    /// Cached balance in satoshis
    pub async fn get_wallet_balance(&self, user_id: Uuid, company_id: Uuid, wallet_type: WalletType) -> Result<u64> {
        self.require_member(company_id, user_id).await?;
        let owner = match wallet_type {
            WalletType::Company => None,
            WalletType::Employee => Some(user_id),
        };
        self.store
            .find_wallet(company_id, owner, wallet_type)
            .await?
            .map(|w| w.balance_sats)
            .ok_or_else(|| {
                PipelineError::WalletNotFound(format!(
                    "no {} wallet for company {company_id}",
                    wallet_type.as_str()
                ))
            })
    }

    /// Newest first. Admins see the whole company, employees their own entries.
    pub async fn get_transaction_history(
        &self,
        user_id: Uuid,
        company_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<WalletTransaction>> {
        let role = self.require_member(company_id, user_id).await?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        Ok(match role {
            MemberRole::Admin => self.store.transactions_for_company(company_id, limit).await?,
            MemberRole::Employee => {
                self.store
                    .transactions_for_user(company_id, user_id, limit)
                    .await?
            }
        })
    }

    /// Refresh a wallet's cached balance from its node
    pub async fn sync_wallet(&self, wallet_id: Uuid) -> Result<BreezWallet> {
        self.providers.breez.sync_wallet(wallet_id).await?;
        self.store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| PipelineError::WalletNotFound(wallet_id.to_string()))
    }

    /// Resync the wallet on `node_id`, if it is one of ours
    pub async fn sync_wallet_by_node(&self, node_id: &str) -> Result<Option<BreezWallet>> {
        match self.store.wallet_by_node(node_id).await? {
            Some(wallet) => self.sync_wallet(wallet.id).await.map(Some),
            None => {
                info!(node_id, "Unknown node; ignoring");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn swap(direction: SwapDirection, amount: Decimal) -> SwapRequest {
        SwapRequest {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            direction,
            amount,
        }
    }

    #[test]
    fn test_validate_usd() {
        assert_eq!(validate_usd(dec!(100)).unwrap(), 10_000);
        assert_eq!(validate_usd(dec!(0.01)).unwrap(), 1);
        assert!(validate_usd(dec!(0)).is_err());
        assert!(validate_usd(dec!(-5)).is_err());
        assert!(validate_usd(dec!(1.005)).is_err());
        assert!(matches!(validate_usd(Decimal::MAX), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_conversion_sats_out_of_range() {
        let conversion = Conversion::completed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "q_1",
            dec!(100),
            Decimal::MAX,
            dec!(97500),
        );
        assert!(matches!(conversion_sats(&conversion), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_validate_swap_amounts() {
        assert!(matches!(
            validate_swap(&swap(SwapDirection::BtcToUsd, dec!(10000))),
            Ok(SwapAmount::Sats(10_000))
        ));
        assert!(validate_swap(&swap(SwapDirection::BtcToUsd, dec!(10.5))).is_err());
        assert!(validate_swap(&swap(SwapDirection::BtcToUsd, dec!(0))).is_err());
        assert!(validate_swap(&swap(SwapDirection::BtcToUsd, Decimal::from(MAX_SATS + 1))).is_err());
        assert!(matches!(
            validate_swap(&swap(SwapDirection::UsdToBtc, dec!(25.50))),
            Ok(SwapAmount::Usd(_))
        ));
    }

    #[test]
    fn test_request_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(RequestStatus::Queued).unwrap(), json!("queued"));
        assert_eq!(
            serde_json::to_value(SwapDirection::BtcToUsd).unwrap(),
            json!("btc_to_usd")
        );
    }
}
