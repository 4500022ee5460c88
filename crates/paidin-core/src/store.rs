//! Persistence Contract
//!
//! Typed CRUD for every pipeline record. The production database lives
//! outside this workspace; [`MemoryPaymentStore`](crate::MemoryPaymentStore)
//! implements the same contract in-process.
//!
//! Ledger rule: at most one *non-failed* [`WalletTransaction`] may exist per
//! [`LedgerKey`]. Appending a second one fails with
//! [`CoreError::DuplicateLedgerEntry`](crate::CoreError::DuplicateLedgerEntry).
//! Failed entries are exempt, so every failed attempt keeps its own row.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    BreezWallet, CompanyMember, Conversion, LedgerKey, MemberRole, PaymentIntent, PlaidAccount,
    ProviderKind, TransactionStatus, TransactionType, WalletTransaction, WalletType, WebhookEvent,
};

/// Outcome of recording an inbound webhook
#[derive(Clone, Debug)]
pub enum WebhookRecord {
    /// First delivery of this `(provider, event_id)`
    Inserted(WebhookEvent),

    /// Already stored; the stored row is returned untouched
    Existing(WebhookEvent),
}

impl WebhookRecord {
    pub const fn event(&self) -> &WebhookEvent {
        match self {
            Self::Inserted(event) | Self::Existing(event) => event,
        }
    }
}

/// Filter for listing webhook events
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WebhookFilter {
    pub provider: Option<ProviderKind>,
    pub processed: Option<bool>,
    pub limit: Option<usize>,
}

impl WebhookFilter {
    pub fn matches(&self, event: &WebhookEvent) -> bool {
        self.provider.is_none_or(|p| p == event.provider)
            && self.processed.is_none_or(|p| p == event.processed)
    }
}

/// Storage trait for pipeline records
#[async_trait]
pub trait PaymentStore: Send + Sync {
    // Membership --------------------------------------------------------------

    async fn upsert_member(&self, member: CompanyMember) -> Result<()>;

    async fn member_role(&self, company_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>>;

    // Payment intents ---------------------------------------------------------

    async fn insert_payment_intent(&self, intent: &PaymentIntent) -> Result<()>;

    async fn payment_intent(&self, id: Uuid) -> Result<Option<PaymentIntent>>;

    async fn payment_intent_by_ref(&self, provider_ref: &str) -> Result<Option<PaymentIntent>>;

    async fn update_payment_intent(&self, intent: &PaymentIntent) -> Result<()>;

    async fn payment_intents_for_company(&self, company_id: Uuid) -> Result<Vec<PaymentIntent>>;

    // Conversions -------------------------------------------------------------

    async fn insert_conversion(&self, conversion: &Conversion) -> Result<()>;

    async fn conversion(&self, id: Uuid) -> Result<Option<Conversion>>;

    async fn conversions_for_company(&self, company_id: Uuid) -> Result<Vec<Conversion>>;

    // Wallets -----------------------------------------------------------------

    /// Insert a wallet; one wallet per `(company, user, wallet_type)`
    async fn insert_wallet(&self, wallet: &BreezWallet) -> Result<()>;

    async fn wallet(&self, id: Uuid) -> Result<Option<BreezWallet>>;

    async fn find_wallet(
        &self,
        company_id: Uuid,
        user_id: Option<Uuid>,
        wallet_type: WalletType,
    ) -> Result<Option<BreezWallet>>;

    async fn wallet_by_node(&self, node_id: &str) -> Result<Option<BreezWallet>>;

    async fn update_wallet(&self, wallet: &BreezWallet) -> Result<()>;

    async fn wallets_for_company(&self, company_id: Uuid) -> Result<Vec<BreezWallet>>;

    // Ledger ------------------------------------------------------------------

    /// Append a ledger entry, enforcing the non-failed key uniqueness rule
    async fn append_transaction(&self, tx: &WalletTransaction) -> Result<()>;

    async fn transaction(&self, id: Uuid) -> Result<Option<WalletTransaction>>;

    /// The non-failed entry holding `key`, if any
    async fn active_transaction(&self, key: &LedgerKey) -> Result<Option<WalletTransaction>>;

    /// Every entry for `key`, failed attempts included, oldest first
    async fn transactions_for_key(&self, key: &LedgerKey) -> Result<Vec<WalletTransaction>>;

    /// The non-failed entry of `transaction_type` whose metadata `field` equals `value`
    async fn find_transaction_by_meta(
        &self,
        transaction_type: TransactionType,
        field: &str,
        value: &str,
    ) -> Result<Option<WalletTransaction>>;

    /// Apply a status transition, merging `metadata` into the entry
    async fn transition_transaction(
        &self,
        id: Uuid,
        next: TransactionStatus,
        metadata: Option<Value>,
    ) -> Result<WalletTransaction>;

    /// Newest first
    async fn transactions_for_user(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>>;

    /// Newest first
    async fn transactions_for_company(
        &self,
        company_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>>;

    // Webhook events ----------------------------------------------------------

    /// Insert unless `(provider, event_id)` is already stored
    async fn record_webhook_event(&self, event: WebhookEvent) -> Result<WebhookRecord>;

    async fn webhook_event(
        &self,
        provider: ProviderKind,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>>;

    async fn webhook_event_by_id(&self, id: Uuid) -> Result<Option<WebhookEvent>>;

    /// Record a handler run. A successful run marks the event processed; a
    /// failed run records the error and never clears an earlier success.
    async fn finish_webhook_event(&self, id: Uuid, error: Option<String>) -> Result<WebhookEvent>;

    /// Newest first
    async fn list_webhook_events(&self, filter: &WebhookFilter) -> Result<Vec<WebhookEvent>>;

    // Bank accounts -----------------------------------------------------------

    async fn insert_plaid_account(&self, account: &PlaidAccount) -> Result<()>;

    async fn plaid_account(&self, id: Uuid) -> Result<Option<PlaidAccount>>;

    async fn plaid_accounts_for_company(&self, company_id: Uuid) -> Result<Vec<PlaidAccount>>;

    /// Returns whether a row was deleted
    async fn delete_plaid_account(&self, id: Uuid) -> Result<bool>;
}
