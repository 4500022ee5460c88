//! Plaid Integration
//!
//! Links bank accounts and reads ACH numbers for debiting. Access tokens are
//! sealed before they are stored and opened only for the duration of a call.
//! Plaid calls are never retried.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use paidin_core::{
    CoreError, PaymentStore, PlaidAccount, PlaidAccountStatus, ProviderKind, SecretBox,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProviderError, Result};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};

const PROVIDER: ProviderKind = ProviderKind::Plaid;

/// Plaid credentials
#[derive(Clone)]
pub struct PlaidConfig {
    pub base_url: String,
    pub client_id: String,
    pub secret: String,
    pub client_name: String,
}

impl fmt::Debug for PlaidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaidConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_name", &self.client_name)
            .finish_non_exhaustive()
    }
}

impl PlaidConfig {
    /// Create from `PLAID_CLIENT_ID`, `PLAID_SECRET` (and optional `PLAID_BASE_URL`)
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("PLAID_CLIENT_ID")
            .map_err(|_| ProviderError::Config("PLAID_CLIENT_ID not set".into()))?;
        let secret = std::env::var("PLAID_SECRET")
            .map_err(|_| ProviderError::Config("PLAID_SECRET not set".into()))?;

        Ok(Self {
            base_url: std::env::var("PLAID_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.plaid.com".into()),
            client_id,
            secret,
            client_name: std::env::var("PLAID_CLIENT_NAME").unwrap_or_else(|_| "PaidIn".into()),
        })
    }
}

/// Short-lived token the frontend uses to open Plaid Link
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkToken {
    pub link_token: String,
    pub expiration: Option<String>,
}

/// ACH routing details for one linked account
#[derive(Clone)]
pub struct AchNumbers {
    pub account_id: String,
    pub account_number: String,
    pub routing_number: String,
    pub wire_routing: Option<String>,
}

impl AchNumbers {
    /// Last four digits of the account number
    pub fn last4(&self) -> &str {
        let len = self.account_number.len();
        self.account_number.get(len.saturating_sub(4)..).unwrap_or("")
    }
}

impl fmt::Debug for AchNumbers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AchNumbers")
            .field("account_id", &self.account_id)
            .field("account_number", &format_args!("****{}", self.last4()))
            .field("routing_number", &self.routing_number)
            .finish_non_exhaustive()
    }
}

/// Bank-linking operations
#[async_trait]
pub trait PlaidApi: Send + Sync {
    async fn create_link_token(&self, user_id: Uuid, company_id: Uuid) -> Result<LinkToken>;

    /// Exchange a Link public token and persist one row per returned account
    async fn exchange_public_token(
        &self,
        public_token: &str,
        user_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<PlaidAccount>>;

    async fn get_auth(&self, account_id: Uuid) -> Result<AchNumbers>;

    /// Revoke the item upstream and delete its local rows
    async fn remove_account(&self, account_id: Uuid) -> Result<()>;
}

// Wire types ------------------------------------------------------------------

#[derive(Serialize)]
struct Credentials<'a> {
    client_id: &'a str,
    secret: &'a str,
}

#[derive(Serialize)]
struct LinkTokenRequest<'a> {
    #[serde(flatten)]
    credentials: Credentials<'a>,
    client_name: &'a str,
    user: LinkUser,
    products: [&'static str; 1],
    country_codes: [&'static str; 1],
    language: &'static str,
}

#[derive(Serialize)]
struct LinkUser {
    client_user_id: String,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    #[serde(flatten)]
    credentials: Credentials<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    #[serde(flatten)]
    credentials: Credentials<'a>,
    access_token: &'a str,
    options: AuthOptions<'a>,
}

#[derive(Serialize)]
struct AuthOptions<'a> {
    account_ids: [&'a str; 1],
}

#[derive(Deserialize)]
struct ExchangeResponse {
    access_token: String,
    item_id: String,
}

#[derive(Deserialize)]
struct AccountsResponse {
    accounts: Vec<WireAccount>,
    item: WireItem,
}

#[derive(Deserialize)]
struct WireAccount {
    account_id: String,
    name: String,
    #[serde(rename = "type")]
    account_type: String,
    subtype: Option<String>,
    mask: Option<String>,
}

#[derive(Deserialize)]
struct WireItem {
    institution_id: Option<String>,
}

#[derive(Deserialize)]
struct AuthResponse {
    numbers: AuthNumbers,
}

#[derive(Deserialize)]
struct AuthNumbers {
    #[serde(default)]
    ach: Vec<WireAch>,
}

#[derive(Deserialize)]
struct WireAch {
    account_id: String,
    account: String,
    routing: String,
    wire_routing: Option<String>,
}

#[derive(Deserialize)]
struct InstitutionResponse {
    institution: WireInstitution,
}

#[derive(Deserialize)]
struct WireInstitution {
    name: String,
}

/// Plaid REST client
pub struct PlaidClient {
    api: ApiClient,
    config: PlaidConfig,
    store: Arc<dyn PaymentStore>,
    secrets: SecretBox,
}

impl PlaidClient {
    pub fn new(
        config: PlaidConfig,
        store: Arc<dyn PaymentStore>,
        secrets: SecretBox,
    ) -> Result<Self> {
        let api = ApiClient::new(PROVIDER, &config.base_url, DEFAULT_TIMEOUT)?;
        Ok(Self {
            api,
            config,
            store,
            secrets,
        })
    }

    fn credentials(&self) -> Credentials<'_> {
        Credentials {
            client_id: self.config.client_id.as_str(),
            secret: self.config.secret.as_str(),
        }
    }

    async fn post<B: Serialize + Sync, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.api
            .send_json(self.api.post(path).json(body))
            .await
            .map_err(ProviderError::into_terminal)
    }

    async fn load_account(&self, account_id: Uuid) -> Result<PlaidAccount> {
        self.store
            .plaid_account(account_id)
            .await?
            .ok_or_else(|| CoreError::not_found("plaid account", account_id).into())
    }

    async fn institution_name(&self, institution_id: &str) -> Option<String> {
        #[derive(Serialize)]
        struct Request<'a> {
            #[serde(flatten)]
            credentials: Credentials<'a>,
            institution_id: &'a str,
            country_codes: [&'static str; 1],
        }

        let request = Request {
            credentials: self.credentials(),
            institution_id,
            country_codes: ["US"],
        };
        match self
            .post::<_, InstitutionResponse>("/institutions/get_by_id", &request)
            .await
        {
            Ok(response) => Some(response.institution.name),
            Err(e) => {
                tracing::debug!(institution_id, error = %e, "Institution lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl PlaidApi for PlaidClient {
    async fn create_link_token(&self, user_id: Uuid, company_id: Uuid) -> Result<LinkToken> {
        let request = LinkTokenRequest {
            credentials: self.credentials(),
            client_name: &self.config.client_name,
            user: LinkUser {
                client_user_id: user_id.to_string(),
            },
            products: ["auth"],
            country_codes: ["US"],
            language: "en",
        };

        let token: LinkToken = self.post("/link/token/create", &request).await?;
        tracing::info!(%user_id, %company_id, "Created Plaid link token");
        Ok(token)
    }

    async fn exchange_public_token(
        &self,
        public_token: &str,
        user_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<PlaidAccount>> {
        let exchange: ExchangeResponse = self
            .post(
                "/item/public_token/exchange",
                &TokenRequest {
                    credentials: self.credentials(),
                    public_token: Some(public_token),
                    access_token: None,
                },
            )
            .await?;

        let accounts: AccountsResponse = self
            .post(
                "/accounts/get",
                &TokenRequest {
                    credentials: self.credentials(),
                    public_token: None,
                    access_token: Some(&exchange.access_token),
                },
            )
            .await?;

        let institution_name = match accounts.item.institution_id.as_deref() {
            Some(id) => self.institution_name(id).await,
            None => None,
        };

        let sealed = self.secrets.seal(&exchange.access_token)?;
        let mut linked = Vec::with_capacity(accounts.accounts.len());
        for account in accounts.accounts {
            let row = PlaidAccount {
                id: Uuid::new_v4(),
                company_id,
                user_id,
                item_id: exchange.item_id.clone(),
                access_token: sealed.clone(),
                account_id: account.account_id,
                name: account.name,
                account_type: account.account_type,
                account_subtype: account.subtype,
                mask: account.mask,
                institution_id: accounts.item.institution_id.clone(),
                institution_name: institution_name.clone(),
                status: PlaidAccountStatus::Active,
                created_at: Utc::now(),
            };
            self.store.insert_plaid_account(&row).await?;
            linked.push(row);
        }

        tracing::info!(
            %user_id,
            %company_id,
            item_id = %exchange.item_id,
            accounts = linked.len(),
            "Linked Plaid item"
        );
        Ok(linked)
    }

    async fn get_auth(&self, account_id: Uuid) -> Result<AchNumbers> {
        let account = self.load_account(account_id).await?;
        let access_token = self.secrets.open(&account.access_token)?;

        let auth: AuthResponse = self
            .post(
                "/auth/get",
                &AuthRequest {
                    credentials: self.credentials(),
                    access_token: &access_token,
                    options: AuthOptions {
                        account_ids: [account.account_id.as_str()],
                    },
                },
            )
            .await?;

        auth.numbers
            .ach
            .into_iter()
            .find(|ach| ach.account_id == account.account_id)
            .map(|ach| AchNumbers {
                account_id: ach.account_id,
                account_number: ach.account,
                routing_number: ach.routing,
                wire_routing: ach.wire_routing,
            })
            .ok_or_else(|| {
                ProviderError::terminal(PROVIDER, "no ACH numbers returned for account")
            })
    }

    async fn remove_account(&self, account_id: Uuid) -> Result<()> {
        let account = self.load_account(account_id).await?;
        let access_token = self.secrets.open(&account.access_token)?;

        let _: serde_json::Value = self
            .post(
                "/item/remove",
                &TokenRequest {
                    credentials: self.credentials(),
                    public_token: None,
                    access_token: Some(&access_token),
                },
            )
            .await?;

        // The access token is dead for every account of the item
        let siblings = self
            .store
            .plaid_accounts_for_company(account.company_id)
            .await?;
        for sibling in siblings.iter().filter(|a| a.item_id == account.item_id) {
            self.store.delete_plaid_account(sibling.id).await?;
        }

        tracing::info!(%account_id, item_id = %account.item_id, "Removed Plaid item");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use paidin_core::MemoryPaymentStore;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer, store: Arc<dyn PaymentStore>) -> PlaidClient {
        PlaidClient::new(
            PlaidConfig {
                base_url: server.uri(),
                client_id: "client".into(),
                secret: "secret".into(),
                client_name: "PaidIn".into(),
            },
            store,
            SecretBox::new("test-key").unwrap(),
        )
        .unwrap()
    }

    async fn mount_exchange(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/item/public_token/exchange"))
            .and(body_partial_json(json!({ "public_token": "public-sandbox-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-sandbox-1",
                "item_id": "item_1"
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/accounts/get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accounts": [
                    { "account_id": "acc_1", "name": "Checking", "type": "depository", "subtype": "checking", "mask": "0000" },
                    { "account_id": "acc_2", "name": "Savings", "type": "depository", "subtype": "savings", "mask": "1111" }
                ],
                "item": { "institution_id": null }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_exchange_persists_encrypted_accounts() {
        let server = MockServer::start().await;
        mount_exchange(&server).await;

        let store: Arc<dyn PaymentStore> = Arc::new(MemoryPaymentStore::new());
        let plaid = client(&server, store.clone());
        let (user, company) = (Uuid::new_v4(), Uuid::new_v4());

        let accounts = plaid
            .exchange_public_token("public-sandbox-1", user, company)
            .await
            .unwrap();

        assert_eq!(accounts.len(), 2);
        assert_ne!(accounts[0].access_token.as_str(), "access-sandbox-1");
        assert_eq!(store.plaid_accounts_for_company(company).await.unwrap().len(), 2);
        assert!(accounts[0].belongs_to(user, company));
    }

    #[tokio::test]
    async fn test_get_auth_returns_numbers_for_account() {
        let server = MockServer::start().await;
        mount_exchange(&server).await;
        Mock::given(method("POST"))
            .and(path("/auth/get"))
            .and(body_partial_json(json!({ "access_token": "access-sandbox-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "numbers": { "ach": [
                    { "account_id": "acc_1", "account": "1111222233330000", "routing": "011401533", "wire_routing": null }
                ]}
            })))
            .mount(&server)
            .await;

        let store: Arc<dyn PaymentStore> = Arc::new(MemoryPaymentStore::new());
        let plaid = client(&server, store);
        let accounts = plaid
            .exchange_public_token("public-sandbox-1", Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();

        let numbers = plaid.get_auth(accounts[0].id).await.unwrap();
        assert_eq!(numbers.routing_number, "011401533");
        assert_eq!(numbers.last4(), "0000");
        assert!(!format!("{numbers:?}").contains("1111222233330000"));
    }

    #[tokio::test]
    async fn test_server_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/link/token/create"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let plaid = client(&server, Arc::new(MemoryPaymentStore::new()));
        let err = plaid
            .create_link_token(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_remove_account_deletes_item_rows() {
        let server = MockServer::start().await;
        mount_exchange(&server).await;
        Mock::given(method("POST"))
            .and(path("/item/remove"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "request_id": "r" })))
            .expect(1)
            .mount(&server)
            .await;

        let store: Arc<dyn PaymentStore> = Arc::new(MemoryPaymentStore::new());
        let plaid = client(&server, store.clone());
        let company = Uuid::new_v4();
        let accounts = plaid
            .exchange_public_token("public-sandbox-1", Uuid::new_v4(), company)
            .await
            .unwrap();

        plaid.remove_account(accounts[0].id).await.unwrap();
        assert!(store.plaid_accounts_for_company(company).await.unwrap().is_empty());
    }
}
