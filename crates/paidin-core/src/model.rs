//! Domain Records
//!
//! Payment intents, conversions, wallets, the append-only ledger and the
//! webhook replay log. USD and BTC amounts use `rust_decimal`; cents and
//! satoshis are integer minor units.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::crypto::EncryptedSecret;
use crate::error::{CoreError, Result};

/// Satoshis in one bitcoin
pub const SATS_PER_BTC: Decimal = dec!(100_000_000);

/// Upper bound for any satoshi amount: the 21 million BTC supply
pub const MAX_SATS: u64 = 21_000_000 * 100_000_000;

/// Convert a BTC amount to whole satoshis, rounding down; `None` when out of range
pub fn btc_to_sats(btc: Decimal) -> Option<u64> {
    btc.checked_mul(SATS_PER_BTC)?.floor().to_u64()
}

/// Convert satoshis to a BTC amount
pub fn sats_to_btc(sats: u64) -> Decimal {
    Decimal::from(sats) / SATS_PER_BTC
}

/// Convert a USD amount to cents, rejecting sub-cent precision
pub fn usd_to_cents(usd: Decimal) -> Option<i64> {
    let cents = usd.checked_mul(dec!(100))?;
    if cents.fract() != Decimal::ZERO {
        return None;
    }
    cents.to_i64()
}

// ============================================================================
// Providers & membership
// ============================================================================

/// External financial provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Plaid,
    Stripe,
    Strike,
    Breez,
    BtcPay,
    LnBits,
}

impl ProviderKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plaid => "plaid",
            Self::Stripe => "stripe",
            Self::Strike => "strike",
            Self::Breez => "breez",
            Self::BtcPay => "btcpay",
            Self::LnBits => "lnbits",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "plaid" => Ok(Self::Plaid),
            "stripe" => Ok(Self::Stripe),
            "strike" => Ok(Self::Strike),
            "breez" => Ok(Self::Breez),
            "btcpay" => Ok(Self::BtcPay),
            "lnbits" => Ok(Self::LnBits),
            other => Err(CoreError::InvalidRecord(format!("unknown provider '{other}'"))),
        }
    }
}

/// Role of a user inside a company
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Employee,
}

/// Company membership, owned by the HR side of the application
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyMember {
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
}

// ============================================================================
// Payment intents
// ============================================================================

/// Lifecycle of a bank-debit attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PaymentIntentStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Map a provider status string; unknown intermediate states count as processing
    pub fn from_provider(status: &str) -> Self {
        match status {
            "requires_payment_method" => Self::RequiresPaymentMethod,
            "requires_confirmation" => Self::RequiresConfirmation,
            "succeeded" => Self::Succeeded,
            "failed" | "payment_failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Processing,
        }
    }
}

/// One bank-debit attempt
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,

    /// Provider's payment intent id
    pub provider_ref: String,

    /// Amount in cents
    pub amount_cents: i64,

    pub currency: String,
    pub status: PaymentIntentStatus,

    /// Linked bank account
    pub plaid_account_id: Uuid,

    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn new(
        company_id: Uuid,
        user_id: Uuid,
        plaid_account_id: Uuid,
        provider_ref: impl Into<String>,
        amount_cents: i64,
        status: PaymentIntentStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_id,
            user_id,
            provider_ref: provider_ref.into(),
            amount_cents,
            currency: "usd".into(),
            status,
            plaid_account_id,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount in dollars
    pub fn amount_usd(&self) -> Decimal {
        Decimal::new(self.amount_cents, 2)
    }

    /// Apply a status reported by the provider. Terminal intents never change.
    pub fn apply_status(&mut self, status: PaymentIntentStatus) -> bool {
        if self.status.is_terminal() || self.status == status {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }
}

// ============================================================================
// Conversions
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Pending,
    Completed,
    Failed,
}

/// One USD/BTC quote execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversion {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub payment_intent_id: Option<Uuid>,

    /// Provider's quote id
    pub quote_ref: String,

    pub amount_usd: Decimal,
    pub amount_btc: Decimal,

    /// USD per BTC
    pub exchange_rate: Decimal,

    pub status: ConversionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Conversion {
    /// A conversion whose quote has been executed
    pub fn completed(
        company_id: Uuid,
        user_id: Uuid,
        quote_ref: impl Into<String>,
        amount_usd: Decimal,
        amount_btc: Decimal,
        exchange_rate: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_id,
            user_id,
            payment_intent_id: None,
            quote_ref: quote_ref.into(),
            amount_usd,
            amount_btc,
            exchange_rate,
            status: ConversionStatus::Completed,
            created_at: now,
            completed_at: Some(now),
        }
    }

    pub const fn with_payment_intent(mut self, payment_intent_id: Uuid) -> Self {
        self.payment_intent_id = Some(payment_intent_id);
        self
    }

    /// Check `amount_usd ≈ amount_btc * exchange_rate` within a relative tolerance
    pub fn is_consistent(&self, tolerance: Decimal) -> bool {
        let (Some(implied), Some(allowed)) = (
            self.amount_btc.checked_mul(self.exchange_rate),
            self.amount_usd.abs().checked_mul(tolerance),
        ) else {
            return false;
        };
        implied
            .checked_sub(self.amount_usd)
            .is_some_and(|drift| drift.abs() <= allowed)
    }
}

// ============================================================================
// Wallets
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    Company,
    Employee,
}

impl WalletType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Employee => "employee",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Initializing,
    Active,
    Error,
}

/// A Lightning wallet backed by a Breez node.
///
/// `balance_sats` caches the node's balance; the node is the source of truth.
#[derive(Clone, Debug, Serialize)]
pub struct BreezWallet {
    pub id: Uuid,
    pub company_id: Uuid,

    /// `None` for the shared company wallet
    pub user_id: Option<Uuid>,

    pub wallet_type: WalletType,
    pub node_id: String,

    /// Node credentials, encrypted at rest
    #[serde(skip_serializing)]
    pub credentials: EncryptedSecret,

    pub balance_sats: u64,
    pub can_receive_invoices: bool,
    pub status: WalletStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BreezWallet {
    pub fn new(
        company_id: Uuid,
        user_id: Option<Uuid>,
        wallet_type: WalletType,
        node_id: impl Into<String>,
        credentials: EncryptedSecret,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            company_id,
            user_id,
            wallet_type,
            node_id: node_id.into(),
            credentials,
            balance_sats: 0,
            can_receive_invoices: false,
            status: WalletStatus::Initializing,
            last_sync_at: None,
            created_at: Utc::now(),
        }
    }

    /// Check the shape invariant: company wallets have no owner, employee wallets do
    pub fn validate(&self) -> Result<()> {
        match (self.wallet_type, self.user_id) {
            (WalletType::Company, Some(_)) => Err(CoreError::InvalidRecord(
                "company wallet cannot belong to a user".into(),
            )),
            (WalletType::Employee, None) => Err(CoreError::InvalidRecord(
                "employee wallet requires a user".into(),
            )),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Funding,
    Payout,
    SwapBtcToUsd,
    SwapUsdToBtc,
}

impl TransactionType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Funding => "funding",
            Self::Payout => "payout",
            Self::SwapBtcToUsd => "swap_btc_to_usd",
            Self::SwapUsdToBtc => "swap_usd_to_btc",
        }
    }

    /// Employee-scoped movements must name the employee
    pub const fn requires_user(&self) -> bool {
        !matches!(self, Self::Funding)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerCurrency {
    Usd,
    Sats,
}

/// Ledger entry status.
///
/// ```text
/// pending ──▶ awaiting_payment ──▶ completed
///    │               │
///    ├───────────────┴──────────▶ failed
///    └──────────────────────────▶ completed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    AwaitingPayment,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::AwaitingPayment | Self::Completed | Self::Failed)
                | (Self::AwaitingPayment, Self::Completed | Self::Failed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniqueness key of a ledger entry
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub transaction_type: TransactionType,
    pub source_type: ProviderKind,
    pub source_id: String,
}

impl LedgerKey {
    pub fn new(
        transaction_type: TransactionType,
        source_type: ProviderKind,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            transaction_type,
            source_type,
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.transaction_type.as_str(),
            self.source_type,
            self.source_id
        )
    }
}

/// Append-only ledger entry recording one money movement
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Option<Uuid>,
    pub transaction_type: TransactionType,

    /// Provider that initiated the movement
    pub source_type: ProviderKind,

    /// Provider's reference for the movement
    pub source_id: String,

    pub amount: Decimal,
    pub currency: LedgerCurrency,
    pub status: TransactionStatus,

    /// Provider chain: quote id, invoice id, payment id, error
    pub metadata: Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn new(
        key: LedgerKey,
        company_id: Uuid,
        amount: Decimal,
        currency: LedgerCurrency,
        status: TransactionStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_id,
            user_id: None,
            transaction_type: key.transaction_type,
            source_type: key.source_type,
            source_id: key.source_id,
            amount,
            currency,
            status,
            metadata: Value::Object(serde_json::Map::new()),
            created_at: now,
            updated_at: now,
        }
    }

    pub const fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(self.transaction_type, self.source_type, self.source_id.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.transaction_type.requires_user() && self.user_id.is_none() {
            return Err(CoreError::InvalidRecord(format!(
                "{} entry requires a user",
                self.transaction_type.as_str()
            )));
        }
        if self.source_id.is_empty() {
            return Err(CoreError::InvalidRecord("source id is empty".into()));
        }
        Ok(())
    }

    /// Move to `next`, merging `metadata` into the existing blob
    pub fn transition(&mut self, next: TransactionStatus, metadata: Option<Value>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if let Some(extra) = metadata {
            merge_metadata(&mut self.metadata, extra);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Read a string field from the metadata blob
    pub fn meta_str(&self, field: &str) -> Option<&str> {
        self.metadata.get(field).and_then(Value::as_str)
    }
}

fn merge_metadata(target: &mut Value, extra: Value) {
    match (target, extra) {
        (Value::Object(existing), Value::Object(incoming)) => {
            existing.extend(incoming);
        }
        (slot, incoming) => *slot = incoming,
    }
}

// ============================================================================
// Webhooks
// ============================================================================

/// Inbound provider callback, kept for de-duplication and replay
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub event_type: String,

    /// Provider's unique event id
    pub event_id: String,

    pub payload: Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,

    /// Handler runs, including replays
    pub attempts: u32,

    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(
        provider: ProviderKind,
        event_type: impl Into<String>,
        event_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            event_type: event_type.into(),
            event_id: event_id.into(),
            payload,
            processed: false,
            processed_at: None,
            error: None,
            attempts: 0,
            received_at: Utc::now(),
        }
    }
}

// ============================================================================
// Bank accounts
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaidAccountStatus {
    Active,
    Inactive,
    Error,
}

/// Linked bank account
#[derive(Clone, Debug, Serialize)]
pub struct PlaidAccount {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub item_id: String,

    /// Plaid access token, encrypted at rest
    #[serde(skip_serializing)]
    pub access_token: EncryptedSecret,

    pub account_id: String,
    pub name: String,
    pub account_type: String,
    pub account_subtype: Option<String>,
    pub mask: Option<String>,
    pub institution_id: Option<String>,
    pub institution_name: Option<String>,
    pub status: PlaidAccountStatus,
    pub created_at: DateTime<Utc>,
}

impl PlaidAccount {
    pub fn belongs_to(&self, user_id: Uuid, company_id: Uuid) -> bool {
        self.user_id == user_id && self.company_id == company_id
    }
}
