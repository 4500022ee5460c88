//! Sandbox Providers
//!
//! In-process stand-ins for Plaid, Stripe, Strike and Breez. They share one
//! simulated Lightning network, so sats bought on Strike and paid to a Breez
//! invoice really do show up in that wallet's balance. Every operation can be
//! made to fail on demand through [`Faults`].
//!
//! Used by `PAIDIN_SANDBOX=1` and by the pipeline's scenario tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use paidin_core::model::{btc_to_sats, sats_to_btc};
use paidin_core::{
    BreezWallet, CoreError, PaymentStore, PlaidAccount, PlaidAccountStatus, ProviderKind,
    SecretBox, WalletStatus, WalletType,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::breez::{BreezApi, BreezInvoice, BreezPayment, BreezPaymentStatus, NodeInfo, sats_to_msat};
use crate::error::{ProviderError, ProviderErrorKind, Result};
use crate::plaid::{AchNumbers, LinkToken, PlaidApi};
use crate::retry::RetryPolicy;
use crate::strike::{
    PaymentState, QuoteState, StrikeAmount, StrikeApi, StrikeInvoice, StrikePayment, StrikeQuote,
};
use crate::stripe::{StripeApi, StripePaymentIntent, StripePaymentMethod};

/// Sandbox BTC price in USD
pub const DEFAULT_BTC_PRICE: Decimal = dec!(97500);

fn sandbox_sats(btc: Decimal) -> Result<u64> {
    btc_to_sats(btc).ok_or_else(|| {
        ProviderError::from_status(ProviderKind::Strike, 400, &format!("amount {btc} BTC out of range"))
    })
}

fn short_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

// ============================================================================
// Fault injection
// ============================================================================

#[derive(Default)]
struct FaultState {
    planned: HashMap<&'static str, VecDeque<ProviderErrorKind>>,
    calls: HashMap<&'static str, usize>,
}

/// Scripted failures and call counts, keyed by operation name
#[derive(Default)]
pub struct Faults {
    state: Mutex<FaultState>,
}

impl Faults {
    /// Fail the next `times` calls of `operation`
    pub async fn fail_next(&self, operation: &'static str, times: usize, kind: ProviderErrorKind) {
        let mut state = self.state.lock().await;
        state
            .planned
            .entry(operation)
            .or_default()
            .extend(std::iter::repeat_n(kind, times));
    }

    /// Attempts made so far, including failed ones
    pub async fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    async fn check(&self, provider: ProviderKind, operation: &'static str) -> Result<()> {
        let mut state = self.state.lock().await;
        *state.calls.entry(operation).or_default() += 1;
        match state.planned.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(ProviderErrorKind::Transient) => Err(ProviderError::from_status(
                provider,
                500,
                &format!("sandbox fault in {operation}"),
            )),
            Some(ProviderErrorKind::Terminal) => Err(ProviderError::from_status(
                provider,
                400,
                &format!("sandbox fault in {operation}"),
            )),
            None => Ok(()),
        }
    }
}

/// Run one sandbox operation under the retry policy, consulting faults on every attempt
async fn attempt<T, F, Fut>(
    retry: &RetryPolicy,
    faults: &Faults,
    provider: ProviderKind,
    operation: &'static str,
    op: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry
        .run(operation, move || {
            let fut = op();
            async move {
                faults.check(provider, operation).await?;
                fut.await
            }
        })
        .await
}

// ============================================================================
// Simulated Lightning network
// ============================================================================

/// Who an invoice pays into
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payee {
    Node(String),
    Strike,
}

#[derive(Clone, Debug)]
pub struct SandboxInvoice {
    pub bolt11: String,
    pub payment_hash: String,
    pub amount_sats: u64,
    pub payee: Payee,
    pub paid: bool,
}

#[derive(Default)]
struct LightningState {
    invoices: HashMap<String, SandboxInvoice>,
    node_balances: HashMap<String, u64>,
    strike_sats: u64,
}

/// Shared ledger of node balances, the Strike BTC balance and open invoices
#[derive(Default)]
pub struct SandboxLightning {
    state: Mutex<LightningState>,
}

impl SandboxLightning {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn node_balance(&self, node_id: &str) -> u64 {
        self.state
            .lock()
            .await
            .node_balances
            .get(node_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn credit_node(&self, node_id: &str, sats: u64) {
        *self
            .state
            .lock()
            .await
            .node_balances
            .entry(node_id.to_string())
            .or_default() += sats;
    }

    pub async fn strike_balance(&self) -> u64 {
        self.state.lock().await.strike_sats
    }

    pub async fn invoice(&self, bolt11: &str) -> Option<SandboxInvoice> {
        self.state.lock().await.invoices.get(bolt11).cloned()
    }

    /// Find an invoice by its payment hash
    pub async fn invoice_by_hash(&self, payment_hash: &str) -> Option<SandboxInvoice> {
        self.state
            .lock()
            .await
            .invoices
            .values()
            .find(|i| i.payment_hash == payment_hash)
            .cloned()
    }

    async fn issue(&self, payee: Payee, amount_sats: u64) -> SandboxInvoice {
        let payment_hash = format!(
            "{}{}",
            Uuid::new_v4().simple(),
            Uuid::new_v4().simple()
        );
        let invoice = SandboxInvoice {
            bolt11: format!("lnbcrt{amount_sats}n1{}", &payment_hash[..24]),
            payment_hash,
            amount_sats,
            payee,
            paid: false,
        };
        self.state
            .lock()
            .await
            .invoices
            .insert(invoice.bolt11.clone(), invoice.clone());
        invoice
    }

    async fn settle(&self, payer: &Payee, bolt11: &str) -> std::result::Result<SandboxInvoice, String> {
        let mut state = self.state.lock().await;
        let invoice = state
            .invoices
            .get(bolt11)
            .cloned()
            .ok_or_else(|| "unknown invoice".to_string())?;
        if invoice.paid {
            return Err("invoice already paid".into());
        }
        if &invoice.payee == payer {
            return Err("cannot pay own invoice".into());
        }

        let available = match payer {
            Payee::Node(node) => state.node_balances.get(node).copied().unwrap_or(0),
            Payee::Strike => state.strike_sats,
        };
        if available < invoice.amount_sats {
            return Err(format!(
                "insufficient balance: {available} < {}",
                invoice.amount_sats
            ));
        }

        match payer {
            Payee::Node(node) => {
                state.node_balances.insert(node.clone(), available - invoice.amount_sats);
            }
            Payee::Strike => state.strike_sats = available - invoice.amount_sats,
        }
        match &invoice.payee {
            Payee::Node(node) => {
                *state.node_balances.entry(node.clone()).or_default() += invoice.amount_sats;
            }
            Payee::Strike => state.strike_sats += invoice.amount_sats,
        }

        let mut paid = invoice;
        paid.paid = true;
        state.invoices.insert(bolt11.to_string(), paid.clone());
        Ok(paid)
    }
}

// ============================================================================
// Plaid
// ============================================================================

/// Sandbox bank linking with one checking account per item
pub struct MockPlaid {
    store: Arc<dyn PaymentStore>,
    secrets: SecretBox,
    faults: Faults,
}

impl MockPlaid {
    pub fn new(store: Arc<dyn PaymentStore>, secrets: SecretBox) -> Self {
        Self {
            store,
            secrets,
            faults: Faults::default(),
        }
    }

    pub const fn faults(&self) -> &Faults {
        &self.faults
    }

    async fn load(&self, account_id: Uuid) -> Result<PlaidAccount> {
        self.store
            .plaid_account(account_id)
            .await?
            .ok_or_else(|| CoreError::not_found("plaid account", account_id).into())
    }
}

#[async_trait]
impl PlaidApi for MockPlaid {
    async fn create_link_token(&self, _user_id: Uuid, _company_id: Uuid) -> Result<LinkToken> {
        self.faults.check(ProviderKind::Plaid, "create_link_token").await?;
        Ok(LinkToken {
            link_token: short_id("link-sandbox"),
            expiration: Some((Utc::now() + ChronoDuration::hours(4)).to_rfc3339()),
        })
    }

    async fn exchange_public_token(
        &self,
        _public_token: &str,
        user_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<PlaidAccount>> {
        self.faults.check(ProviderKind::Plaid, "exchange_public_token").await?;
        let account = PlaidAccount {
            id: Uuid::new_v4(),
            company_id,
            user_id,
            item_id: short_id("item"),
            access_token: self.secrets.seal(&short_id("access-sandbox"))?,
            account_id: short_id("acc"),
            name: "Plaid Checking".into(),
            account_type: "depository".into(),
            account_subtype: Some("checking".into()),
            mask: Some("0000".into()),
            institution_id: Some("ins_109508".into()),
            institution_name: Some("First Platypus Bank".into()),
            status: PlaidAccountStatus::Active,
            created_at: Utc::now(),
        };
        self.store.insert_plaid_account(&account).await?;
        Ok(vec![account])
    }

    async fn get_auth(&self, account_id: Uuid) -> Result<AchNumbers> {
        let account = self.load(account_id).await?;
        self.secrets.open(&account.access_token)?;
        self.faults.check(ProviderKind::Plaid, "get_auth").await?;
        Ok(AchNumbers {
            account_id: account.account_id,
            account_number: "1111222233330000".into(),
            routing_number: "011401533".into(),
            wire_routing: Some("021000021".into()),
        })
    }

    async fn remove_account(&self, account_id: Uuid) -> Result<()> {
        let account = self.load(account_id).await?;
        self.faults.check(ProviderKind::Plaid, "remove_account").await?;
        for sibling in self.store.plaid_accounts_for_company(account.company_id).await? {
            if sibling.item_id == account.item_id {
                self.store.delete_plaid_account(sibling.id).await?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Stripe
// ============================================================================

/// How confirmed sandbox debits resolve when next retrieved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleMode {
    Succeed,
    Fail,
    Hold,
}

struct StripeState {
    intents: HashMap<String, StripePaymentIntent>,
    idempotency: HashMap<String, String>,
    mode: SettleMode,
}

/// Sandbox ACH debits
pub struct MockStripe {
    state: Mutex<StripeState>,
    faults: Faults,
}

impl Default for MockStripe {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStripe {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StripeState {
                intents: HashMap::new(),
                idempotency: HashMap::new(),
                mode: SettleMode::Succeed,
            }),
            faults: Faults::default(),
        }
    }

    pub const fn faults(&self) -> &Faults {
        &self.faults
    }

    pub async fn set_settle_mode(&self, mode: SettleMode) {
        self.state.lock().await.mode = mode;
    }

    pub async fn intent(&self, id: &str) -> Option<StripePaymentIntent> {
        self.state.lock().await.intents.get(id).cloned()
    }

    pub async fn intent_count(&self) -> usize {
        self.state.lock().await.intents.len()
    }

    fn not_found(id: &str) -> ProviderError {
        ProviderError::from_status(
            ProviderKind::Stripe,
            404,
            &format!("No such payment_intent: '{id}'"),
        )
    }
}

#[async_trait]
impl StripeApi for MockStripe {
    async fn create_payment_method_from_ach(
        &self,
        _holder_name: &str,
        _ach: &AchNumbers,
    ) -> Result<StripePaymentMethod> {
        self.faults
            .check(ProviderKind::Stripe, "create_payment_method")
            .await?;
        Ok(StripePaymentMethod {
            id: short_id("pm"),
            method_type: "us_bank_account".into(),
        })
    }

    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        payment_method_id: &str,
        metadata: &HashMap<String, String>,
        idempotency_key: &str,
    ) -> Result<StripePaymentIntent> {
        self.faults
            .check(ProviderKind::Stripe, "create_payment_intent")
            .await?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .idempotency
            .get(idempotency_key)
            .and_then(|id| state.intents.get(id))
        {
            return Ok(existing.clone());
        }

        let intent = StripePaymentIntent {
            id: short_id("pi"),
            amount: amount_cents,
            currency: "usd".into(),
            status: "requires_confirmation".into(),
            payment_method: Some(payment_method_id.to_string()),
            metadata: metadata.clone(),
            last_payment_error: None,
        };
        state
            .idempotency
            .insert(idempotency_key.to_string(), intent.id.clone());
        state.intents.insert(intent.id.clone(), intent.clone());
        Ok(intent)
    }

    async fn confirm_payment_intent(&self, id: &str) -> Result<StripePaymentIntent> {
        self.faults
            .check(ProviderKind::Stripe, "confirm_payment_intent")
            .await?;
        let mut state = self.state.lock().await;
        let intent = state.intents.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if intent.status == "requires_confirmation" {
            intent.status = "processing".into();
        }
        Ok(intent.clone())
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<StripePaymentIntent> {
        self.faults
            .check(ProviderKind::Stripe, "retrieve_payment_intent")
            .await?;
        let mut state = self.state.lock().await;
        let mode = state.mode;
        let intent = state.intents.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if intent.status == "processing" {
            match mode {
                SettleMode::Succeed => intent.status = "succeeded".into(),
                SettleMode::Fail => {
                    intent.status = "requires_payment_method".into();
                    intent.last_payment_error =
                        Some(json!({ "message": "ACH debit returned: R01 insufficient funds" }));
                }
                SettleMode::Hold => {}
            }
        }
        Ok(intent.clone())
    }
}

// ============================================================================
// Strike
// ============================================================================

/// Sandbox exchange at a fixed, adjustable price
pub struct MockStrike {
    lightning: Arc<SandboxLightning>,
    price: Mutex<Decimal>,
    quote_ttl: ChronoDuration,
    quotes: Mutex<HashMap<String, StrikeQuote>>,
    faults: Faults,
    retry: RetryPolicy,
}

impl MockStrike {
    pub fn new(lightning: Arc<SandboxLightning>) -> Self {
        Self {
            lightning,
            price: Mutex::new(DEFAULT_BTC_PRICE),
            quote_ttl: ChronoDuration::seconds(30),
            quotes: Mutex::new(HashMap::new()),
            faults: Faults::default(),
            retry: RetryPolicy::immediate(3),
        }
    }

    /// Quotes expire this long after creation; negative values issue expired quotes
    #[must_use]
    pub const fn with_quote_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.quote_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub const fn faults(&self) -> &Faults {
        &self.faults
    }

    pub async fn set_price(&self, usd_per_btc: Decimal) {
        *self.price.lock().await = usd_per_btc;
    }

    async fn new_quote(&self, source: StrikeAmount, target: StrikeAmount) -> StrikeQuote {
        let quote = StrikeQuote {
            id: short_id("quote"),
            valid_until: Utc::now() + self.quote_ttl,
            source,
            target,
            state: QuoteState::New,
        };
        self.quotes
            .lock()
            .await
            .insert(quote.id.clone(), quote.clone());
        quote
    }

    async fn quote_usd(&self, amount_usd: Decimal) -> Result<StrikeQuote> {
        let price = *self.price.lock().await;
        let btc = (amount_usd / price).round_dp(8);
        Ok(self
            .new_quote(StrikeAmount::usd(amount_usd), StrikeAmount::btc(btc))
            .await)
    }

    async fn quote_sats(&self, amount_sats: u64) -> Result<StrikeQuote> {
        let price = *self.price.lock().await;
        let btc = sats_to_btc(amount_sats);
        Ok(self
            .new_quote(StrikeAmount::btc(btc), StrikeAmount::usd((btc * price).round_dp(2)))
            .await)
    }

    async fn execute(&self, quote_id: &str) -> Result<StrikeQuote> {
        let mut quotes = self.quotes.lock().await;
        let quote = quotes.get_mut(quote_id).ok_or_else(|| {
            ProviderError::from_status(ProviderKind::Strike, 404, "quote not found")
        })?;
        if quote.state == QuoteState::Completed {
            return Ok(quote.clone());
        }

        let btc_sats = sandbox_sats(quote.btc_amount())?;
        let mut lightning = self.lightning.state.lock().await;
        if quote.source.currency == "BTC" {
            if lightning.strike_sats < btc_sats {
                return Err(ProviderError::from_status(
                    ProviderKind::Strike,
                    422,
                    "insufficient BTC balance",
                ));
            }
            lightning.strike_sats -= btc_sats;
        } else {
            lightning.strike_sats += btc_sats;
        }
        quote.state = QuoteState::Completed;
        Ok(quote.clone())
    }
}

#[async_trait]
impl StrikeApi for MockStrike {
    async fn create_quote(&self, amount_usd: Decimal) -> Result<StrikeQuote> {
        attempt(&self.retry, &self.faults, ProviderKind::Strike, "create_quote", || {
            self.quote_usd(amount_usd)
        })
        .await
    }

    async fn execute_quote(&self, quote: &StrikeQuote) -> Result<StrikeQuote> {
        if quote.is_expired_at(Utc::now()) {
            return Err(ProviderError::QuoteExpired {
                provider: ProviderKind::Strike,
                quote_id: quote.id.clone(),
            });
        }
        attempt(&self.retry, &self.faults, ProviderKind::Strike, "execute_quote", || {
            self.execute(&quote.id)
        })
        .await
    }

    async fn create_invoice(&self, amount_btc: Decimal, _description: &str) -> Result<StrikeInvoice> {
        attempt(&self.retry, &self.faults, ProviderKind::Strike, "create_invoice", || async move {
            let issued = self
                .lightning
                .issue(Payee::Strike, sandbox_sats(amount_btc)?)
                .await;
            Ok(StrikeInvoice {
                invoice_id: short_id("inv"),
                ln_invoice: issued.bolt11,
                amount: StrikeAmount::btc(amount_btc),
                expires_at: Utc::now() + ChronoDuration::minutes(10),
            })
        })
        .await
    }

    async fn pay_invoice(&self, ln_invoice: &str) -> Result<StrikePayment> {
        attempt(&self.retry, &self.faults, ProviderKind::Strike, "pay_invoice", || async move {
            self.lightning
                .settle(&Payee::Strike, ln_invoice)
                .await
                .map_err(|e| ProviderError::from_status(ProviderKind::Strike, 422, &e))?;
            Ok(StrikePayment {
                payment_id: short_id("pay"),
                state: PaymentState::Completed,
            })
        })
        .await
    }

    async fn swap_btc_to_usd(&self, amount_sats: u64) -> Result<StrikeQuote> {
        let quote = attempt(&self.retry, &self.faults, ProviderKind::Strike, "create_quote", || {
            self.quote_sats(amount_sats)
        })
        .await?;
        self.execute_quote(&quote).await
    }
}

// ============================================================================
// Breez
// ============================================================================

/// Sandbox Lightning wallets backed by [`SandboxLightning`]
pub struct MockBreez {
    lightning: Arc<SandboxLightning>,
    store: Arc<dyn PaymentStore>,
    secrets: SecretBox,
    faults: Faults,
    retry: RetryPolicy,
}

impl MockBreez {
    pub fn new(
        lightning: Arc<SandboxLightning>,
        store: Arc<dyn PaymentStore>,
        secrets: SecretBox,
    ) -> Self {
        Self {
            lightning,
            store,
            secrets,
            faults: Faults::default(),
            retry: RetryPolicy::immediate(3),
        }
    }

    pub const fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Credit a wallet's node out of band and resync it
    pub async fn fund_wallet(&self, wallet_id: Uuid, sats: u64) -> Result<NodeInfo> {
        let wallet = self.load(wallet_id).await?;
        self.lightning.credit_node(&wallet.node_id, sats).await;
        self.sync_wallet(wallet_id).await
    }

    async fn load(&self, wallet_id: Uuid) -> Result<BreezWallet> {
        self.store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| CoreError::not_found("wallet", wallet_id).into())
    }
}

#[async_trait]
impl BreezApi for MockBreez {
    async fn initialize_wallet(
        &self,
        company_id: Uuid,
        user_id: Option<Uuid>,
        wallet_type: WalletType,
    ) -> Result<BreezWallet> {
        if let Some(existing) = self.store.find_wallet(company_id, user_id, wallet_type).await? {
            return Ok(existing);
        }
        self.faults.check(ProviderKind::Breez, "initialize_wallet").await?;

        let node_id = short_id("node");
        let credentials = self.secrets.seal(&format!("sandbox-credentials-{node_id}"))?;
        let wallet = BreezWallet::new(company_id, user_id, wallet_type, node_id, credentials);
        wallet.validate()?;
        self.store.insert_wallet(&wallet).await?;
        self.sync_wallet(wallet.id).await?;
        self.load(wallet.id).await
    }

    async fn generate_invoice(
        &self,
        wallet_id: Uuid,
        amount_sats: u64,
        _description: &str,
    ) -> Result<BreezInvoice> {
        let amount_msat = sats_to_msat(amount_sats)?;
        let wallet = &self.load(wallet_id).await?;
        attempt(&self.retry, &self.faults, ProviderKind::Breez, "generate_invoice", move || async move {
            let issued = self
                .lightning
                .issue(Payee::Node(wallet.node_id.clone()), amount_sats)
                .await;
            Ok(BreezInvoice {
                bolt11: issued.bolt11,
                payment_hash: issued.payment_hash,
                amount_msat,
                expires_at: Utc::now() + ChronoDuration::minutes(10),
            })
        })
        .await
    }

    async fn pay_invoice(&self, wallet_id: Uuid, bolt11: &str) -> Result<BreezPayment> {
        let wallet = &self.load(wallet_id).await?;
        attempt(&self.retry, &self.faults, ProviderKind::Breez, "pay_invoice", move || async move {
            let paid = self
                .lightning
                .settle(&Payee::Node(wallet.node_id.clone()), bolt11)
                .await
                .map_err(|e| ProviderError::from_status(ProviderKind::Breez, 422, &e))?;
            Ok(BreezPayment {
                id: short_id("payment"),
                payment_hash: paid.payment_hash,
                amount_msat: paid.amount_sats.saturating_mul(1000),
                fee_msat: 0,
                status: BreezPaymentStatus::Complete,
            })
        })
        .await
    }

    async fn sync_wallet(&self, wallet_id: Uuid) -> Result<NodeInfo> {
        let mut wallet = self.load(wallet_id).await?;
        self.faults.check(ProviderKind::Breez, "sync_wallet").await?;

        let balance = self.lightning.node_balance(&wallet.node_id).await;
        wallet.balance_sats = balance;
        wallet.can_receive_invoices = true;
        wallet.status = WalletStatus::Active;
        wallet.last_sync_at = Some(Utc::now());
        self.store.update_wallet(&wallet).await?;

        Ok(NodeInfo {
            node_id: wallet.node_id,
            channels_balance_msat: balance.saturating_mul(1000),
            onchain_balance_msat: 0,
            max_receivable_msat: 10_000_000_000,
            block_height: 840_000,
        })
    }
}

// ============================================================================
// Bundle
// ============================================================================

/// Every sandbox provider wired to one simulated Lightning network
pub struct SandboxProviders {
    pub lightning: Arc<SandboxLightning>,
    pub plaid: Arc<MockPlaid>,
    pub stripe: Arc<MockStripe>,
    pub strike: Arc<MockStrike>,
    pub breez: Arc<MockBreez>,
}

impl SandboxProviders {
    pub fn new(store: Arc<dyn PaymentStore>, secrets: &SecretBox) -> Self {
        let lightning = SandboxLightning::new();
        Self {
            plaid: Arc::new(MockPlaid::new(store.clone(), secrets.clone())),
            stripe: Arc::new(MockStripe::new()),
            strike: Arc::new(MockStrike::new(lightning.clone())),
            breez: Arc::new(MockBreez::new(lightning.clone(), store, secrets.clone())),
            lightning,
        }
    }
}
