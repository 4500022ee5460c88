//! Breez Lightning Wallets
//!
//! One node per company wallet and per employee wallet. Node credentials are
//! sealed at rest and sent as `X-Node-Credentials` on every wallet call.
//! The node is the source of truth for balances; [`BreezApi::sync_wallet`]
//! refreshes the cached value on the wallet row.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paidin_core::{
    BreezWallet, CoreError, PaymentStore, ProviderKind, SecretBox, WalletStatus, WalletType,
};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{ProviderError, Result};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::retry::RetryPolicy;

const PROVIDER: ProviderKind = ProviderKind::Breez;

/// Breez credentials
#[derive(Clone)]
pub struct BreezConfig {
    pub base_url: String,
    pub api_key: String,
    pub retry: RetryPolicy,
}

impl fmt::Debug for BreezConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreezConfig")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl BreezConfig {
    /// Create from `BREEZ_API_KEY` and `BREEZ_BASE_URL`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BREEZ_API_KEY")
            .map_err(|_| ProviderError::Config("BREEZ_API_KEY not set".into()))?;
        let base_url = std::env::var("BREEZ_BASE_URL")
            .map_err(|_| ProviderError::Config("BREEZ_BASE_URL not set".into()))?;
        Ok(Self {
            base_url,
            api_key,
            retry: RetryPolicy::default(),
        })
    }
}

/// BOLT11 invoice issued by a wallet node
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreezInvoice {
    pub bolt11: String,
    pub payment_hash: String,
    pub amount_msat: u64,
    pub expires_at: DateTime<Utc>,
}

impl BreezInvoice {
    pub const fn amount_sats(&self) -> u64 {
        self.amount_msat / 1000
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreezPaymentStatus {
    Pending,
    Complete,
    Failed,
}

/// Outgoing Lightning payment from a wallet node
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreezPayment {
    pub id: String,
    pub payment_hash: String,
    pub amount_msat: u64,
    #[serde(default)]
    pub fee_msat: u64,
    pub status: BreezPaymentStatus,
}

/// Node state reported by Breez
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_id: String,
    pub channels_balance_msat: u64,
    #[serde(default)]
    pub onchain_balance_msat: u64,
    #[serde(default)]
    pub max_receivable_msat: u64,
    #[serde(default)]
    pub block_height: u32,
}

impl NodeInfo {
    pub const fn balance_sats(&self) -> u64 {
        self.channels_balance_msat.saturating_add(self.onchain_balance_msat) / 1000
    }
}

/// Millisatoshis for an invoice amount; terminal when it does not fit in `u64`
pub fn sats_to_msat(amount_sats: u64) -> Result<u64> {
    amount_sats.checked_mul(1000).ok_or_else(|| {
        ProviderError::terminal(
            ProviderKind::Breez,
            format!("invoice amount {amount_sats} sats is out of range"),
        )
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedNode {
    node_id: String,
    credentials: String,
}

/// Wallet node operations
#[async_trait]
pub trait BreezApi: Send + Sync {
    /// Create (or return the existing) wallet for `(company, user, wallet_type)`
    async fn initialize_wallet(
        &self,
        company_id: Uuid,
        user_id: Option<Uuid>,
        wallet_type: WalletType,
    ) -> Result<BreezWallet>;

    async fn generate_invoice(
        &self,
        wallet_id: Uuid,
        amount_sats: u64,
        description: &str,
    ) -> Result<BreezInvoice>;

    async fn pay_invoice(&self, wallet_id: Uuid, bolt11: &str) -> Result<BreezPayment>;

    /// Fetch node state and refresh the wallet's cached balance
    async fn sync_wallet(&self, wallet_id: Uuid) -> Result<NodeInfo>;
}

/// Breez REST client
pub struct BreezClient {
    api: ApiClient,
    api_key: String,
    retry: RetryPolicy,
    store: Arc<dyn PaymentStore>,
    secrets: SecretBox,
}

impl BreezClient {
    pub fn new(
        config: BreezConfig,
        store: Arc<dyn PaymentStore>,
        secrets: SecretBox,
    ) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(PROVIDER, &config.base_url, DEFAULT_TIMEOUT)?,
            api_key: config.api_key,
            retry: config.retry,
            store,
            secrets,
        })
    }

    async fn load_wallet(&self, wallet_id: Uuid) -> Result<BreezWallet> {
        self.store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| CoreError::not_found("wallet", wallet_id).into())
    }

    async fn call<T, B>(&self, operation: &str, build: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Fn() -> RequestBuilder,
    {
        let api = &self.api;
        let api_key = self.api_key.as_str();
        self.retry
            .run(operation, move || {
                let request = build().bearer_auth(api_key);
                async move { api.send_json(request).await }
            })
            .await
    }
}

#[async_trait]
impl BreezApi for BreezClient {
    async fn initialize_wallet(
        &self,
        company_id: Uuid,
        user_id: Option<Uuid>,
        wallet_type: WalletType,
    ) -> Result<BreezWallet> {
        if let Some(existing) = self.store.find_wallet(company_id, user_id, wallet_type).await? {
            return Ok(existing);
        }

        let body = json!({
            "companyId": company_id,
            "userId": user_id,
            "walletType": wallet_type.as_str(),
        });
        let node: CreatedNode = self
            .call("breez.create_node", || self.api.post("/v1/nodes").json(&body))
            .await?;

        let credentials = self.secrets.seal(&node.credentials)?;
        let wallet = BreezWallet::new(company_id, user_id, wallet_type, node.node_id, credentials);
        wallet.validate()?;
        self.store.insert_wallet(&wallet).await?;

        tracing::info!(
            wallet_id = %wallet.id,
            node_id = %wallet.node_id,
            wallet_type = wallet_type.as_str(),
            "Initialized Breez wallet"
        );

        if let Err(e) = self.sync_wallet(wallet.id).await {
            tracing::warn!(wallet_id = %wallet.id, error = %e, "Initial wallet sync failed");
        }
        self.load_wallet(wallet.id).await
    }

    async fn generate_invoice(
        &self,
        wallet_id: Uuid,
        amount_sats: u64,
        description: &str,
    ) -> Result<BreezInvoice> {
        let amount_msat = sats_to_msat(amount_sats)?;
        let wallet = self.load_wallet(wallet_id).await?;
        let credentials = self.secrets.open(&wallet.credentials)?;
        let path = format!("/v1/nodes/{}/invoices", wallet.node_id);
        let body = json!({ "amountMsat": amount_msat, "description": description });

        let invoice: BreezInvoice = self
            .call("breez.generate_invoice", || {
                self.api
                    .post(&path)
                    .header("X-Node-Credentials", &credentials)
                    .json(&body)
            })
            .await?;

        tracing::info!(%wallet_id, payment_hash = %invoice.payment_hash, amount_sats, "Generated invoice");
        Ok(invoice)
    }

    async fn pay_invoice(&self, wallet_id: Uuid, bolt11: &str) -> Result<BreezPayment> {
        let wallet = self.load_wallet(wallet_id).await?;
        let credentials = self.secrets.open(&wallet.credentials)?;
        let path = format!("/v1/nodes/{}/payments", wallet.node_id);
        let body = json!({ "bolt11": bolt11 });

        let payment: BreezPayment = self
            .call("breez.pay_invoice", || {
                self.api
                    .post(&path)
                    .header("X-Node-Credentials", &credentials)
                    .json(&body)
            })
            .await?;

        if payment.status == BreezPaymentStatus::Failed {
            return Err(ProviderError::terminal(
                PROVIDER,
                format!("payment {} failed", payment.payment_hash),
            ));
        }

        tracing::info!(
            %wallet_id,
            payment_hash = %payment.payment_hash,
            amount_msat = payment.amount_msat,
            fee_msat = payment.fee_msat,
            "Paid invoice"
        );
        Ok(payment)
    }

    async fn sync_wallet(&self, wallet_id: Uuid) -> Result<NodeInfo> {
        let mut wallet = self.load_wallet(wallet_id).await?;
        let credentials = self.secrets.open(&wallet.credentials)?;
        let path = format!("/v1/nodes/{}/info", wallet.node_id);

        let info: NodeInfo = match self
            .call("breez.node_info", || {
                self.api
                    .get(&path)
                    .header("X-Node-Credentials", &credentials)
            })
            .await
        {
            Ok(info) => info,
            Err(e) => {
                if !e.is_retryable() {
                    wallet.status = WalletStatus::Error;
                    self.store.update_wallet(&wallet).await?;
                }
                return Err(e);
            }
        };

        wallet.balance_sats = info.balance_sats();
        wallet.can_receive_invoices = info.max_receivable_msat > 0;
        wallet.status = WalletStatus::Active;
        wallet.last_sync_at = Some(Utc::now());
        self.store.update_wallet(&wallet).await?;

        tracing::debug!(%wallet_id, balance_sats = wallet.balance_sats, "Synced wallet");
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use paidin_core::MemoryPaymentStore;
    use wiremock::matchers::{header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer, store: Arc<dyn PaymentStore>) -> BreezClient {
        BreezClient::new(
            BreezConfig {
                base_url: server.uri(),
                api_key: "breez-key".into(),
                retry: RetryPolicy::immediate(3),
            },
            store,
            SecretBox::new("test-key").unwrap(),
        )
        .unwrap()
    }

    async fn mount_node(server: &MockServer, balance_msat: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "nodeId": "node_1",
                "credentials": "node-secret"
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/nodes/node_1/info"))
            .and(header("X-Node-Credentials", "node-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodeId": "node_1",
                "channelsBalanceMsat": balance_msat,
                "onchainBalanceMsat": 0,
                "maxReceivableMsat": 1_000_000_000u64,
                "blockHeight": 840_000
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_initialize_wallet_seals_credentials_and_syncs() {
        let server = MockServer::start().await;
        mount_node(&server, 250_000_000).await;

        let store: Arc<dyn PaymentStore> = Arc::new(MemoryPaymentStore::new());
        let breez = client(&server, store.clone());
        let company = Uuid::new_v4();

        let wallet = breez
            .initialize_wallet(company, None, WalletType::Company)
            .await
            .unwrap();

        assert_ne!(wallet.credentials.as_str(), "node-secret");
        assert_eq!(wallet.balance_sats, 250_000);
        assert_eq!(wallet.status, WalletStatus::Active);
        assert!(wallet.can_receive_invoices);

        let again = breez
            .initialize_wallet(company, None, WalletType::Company)
            .await
            .unwrap();
        assert_eq!(again.id, wallet.id);
    }

    #[tokio::test]
    async fn test_pay_invoice_retries_transient_failures() {
        let server = MockServer::start().await;
        mount_node(&server, 0).await;
        Mock::given(method("POST"))
            .and(path_regex("^/v1/nodes/node_1/payments$"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let store: Arc<dyn PaymentStore> = Arc::new(MemoryPaymentStore::new());
        let breez = client(&server, store);
        let wallet = breez
            .initialize_wallet(Uuid::new_v4(), Some(Uuid::new_v4()), WalletType::Employee)
            .await
            .unwrap();

        let err = breez.pay_invoice(wallet.id, "lnbc1").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_generate_invoice() {
        let server = MockServer::start().await;
        mount_node(&server, 0).await;
        Mock::given(method("POST"))
            .and(path("/v1/nodes/node_1/invoices"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "bolt11": "lnbc50u1example",
                "paymentHash": "hash_1",
                "amountMsat": 5_000_000,
                "expiresAt": Utc::now() + chrono::Duration::minutes(10)
            })))
            .mount(&server)
            .await;

        let store: Arc<dyn PaymentStore> = Arc::new(MemoryPaymentStore::new());
        let breez = client(&server, store);
        let wallet = breez
            .initialize_wallet(Uuid::new_v4(), None, WalletType::Company)
            .await
            .unwrap();

        let invoice = breez.generate_invoice(wallet.id, 5_000, "payout").await.unwrap();
        assert_eq!(invoice.amount_sats(), 5_000);
        assert_eq!(invoice.payment_hash, "hash_1");
    }

    #[tokio::test]
    async fn test_oversized_invoice_is_terminal_without_request() {
        let server = MockServer::start().await;
        mount_node(&server, 0).await;
        Mock::given(method("POST"))
            .and(path("/v1/nodes/node_1/invoices"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let store: Arc<dyn PaymentStore> = Arc::new(MemoryPaymentStore::new());
        let breez = client(&server, store);
        let wallet = breez
            .initialize_wallet(Uuid::new_v4(), None, WalletType::Company)
            .await
            .unwrap();

        let err = breez.generate_invoice(wallet.id, u64::MAX, "payout").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_node_balance_saturates() {
        let info = NodeInfo {
            node_id: "node_1".into(),
            channels_balance_msat: u64::MAX,
            onchain_balance_msat: 5_000,
            max_receivable_msat: 0,
            block_height: 0,
        };
        assert_eq!(info.balance_sats(), u64::MAX / 1000);
        assert_eq!(sats_to_msat(2_500).unwrap(), 2_500_000);
    }

    #[tokio::test]
    async fn test_unknown_wallet_is_not_found() {
        let server = MockServer::start().await;
        let breez = client(&server, Arc::new(MemoryPaymentStore::new()));
        let err = breez.sync_wallet(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Core(CoreError::NotFound { .. })));
    }
}
