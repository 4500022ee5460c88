//! Strike Exchange & Lightning
//!
//! USD/BTC quotes, quote execution, receiving invoices and Lightning
//! payments. Every call goes through the [`RetryPolicy`]; an expired quote
//! is rejected locally before any request is made.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use paidin_core::ProviderKind;
use paidin_core::model::sats_to_btc;
use reqwest::RequestBuilder;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{ProviderError, Result};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::retry::RetryPolicy;

const PROVIDER: ProviderKind = ProviderKind::Strike;

/// Strike credentials
#[derive(Clone)]
pub struct StrikeConfig {
    pub base_url: String,
    pub api_key: String,
    pub retry: RetryPolicy,
}

impl fmt::Debug for StrikeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrikeConfig")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl StrikeConfig {
    /// Create from `STRIKE_API_KEY` (and optional `STRIKE_BASE_URL`)
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("STRIKE_API_KEY")
            .map_err(|_| ProviderError::Config("STRIKE_API_KEY not set".into()))?;
        Ok(Self {
            base_url: std::env::var("STRIKE_BASE_URL")
                .unwrap_or_else(|_| "https://api.strike.me".into()),
            api_key,
            retry: RetryPolicy::default(),
        })
    }
}

/// Amount in a currency
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrikeAmount {
    pub amount: Decimal,
    pub currency: String,
}

impl StrikeAmount {
    pub fn usd(amount: Decimal) -> Self {
        Self {
            amount,
            currency: "USD".into(),
        }
    }

    pub fn btc(amount: Decimal) -> Self {
        Self {
            amount,
            currency: "BTC".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QuoteState {
    #[default]
    New,
    Pending,
    Completed,
    Failed,
}

/// Currency exchange quote
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikeQuote {
    pub id: String,
    pub valid_until: DateTime<Utc>,
    pub source: StrikeAmount,
    pub target: StrikeAmount,
    #[serde(default)]
    pub state: QuoteState,
}

impl StrikeQuote {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_until
    }

    fn side(&self, currency: &str) -> Decimal {
        [&self.source, &self.target]
            .into_iter()
            .find(|a| a.currency.eq_ignore_ascii_case(currency))
            .map_or(Decimal::ZERO, |a| a.amount)
    }

    pub fn usd_amount(&self) -> Decimal {
        self.side("USD")
    }

    pub fn btc_amount(&self) -> Decimal {
        self.side("BTC")
    }

    /// USD per BTC implied by the two sides, rounded to cents
    pub fn usd_per_btc(&self) -> Decimal {
        let btc = self.btc_amount();
        if btc.is_zero() {
            return Decimal::ZERO;
        }
        (self.usd_amount() / btc).round_dp(2)
    }
}

/// Receiving invoice with its Lightning payment request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrikeInvoice {
    pub invoice_id: String,
    pub ln_invoice: String,
    pub amount: StrikeAmount,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentState {
    Pending,
    Completed,
    Failed,
}

/// Outgoing Lightning payment
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikePayment {
    pub payment_id: String,
    pub state: PaymentState,
}

/// Exchange and Lightning operations
#[async_trait]
pub trait StrikeApi: Send + Sync {
    /// Quote selling `amount_usd` for BTC
    async fn create_quote(&self, amount_usd: Decimal) -> Result<StrikeQuote>;

    /// Execute a quote; fails with [`ProviderError::QuoteExpired`] past `valid_until`
    async fn execute_quote(&self, quote: &StrikeQuote) -> Result<StrikeQuote>;

    /// Invoice for receiving `amount_btc` over Lightning
    async fn create_invoice(
        &self,
        amount_btc: Decimal,
        description: &str,
    ) -> Result<StrikeInvoice>;

    /// Pay a BOLT11 invoice from the BTC balance
    async fn pay_invoice(&self, ln_invoice: &str) -> Result<StrikePayment>;

    /// Sell `amount_sats` for USD; returns the executed quote
    async fn swap_btc_to_usd(&self, amount_sats: u64) -> Result<StrikeQuote>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceCreated {
    invoice_id: String,
    amount: StrikeAmount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvoiceQuote {
    ln_invoice: String,
    expiration_in_sec: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentQuote {
    payment_quote_id: String,
}

/// Strike REST client
#[derive(Clone, Debug)]
pub struct StrikeClient {
    api: ApiClient,
    api_key: String,
    retry: RetryPolicy,
}

impl StrikeClient {
    pub fn new(config: StrikeConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(PROVIDER, &config.base_url, DEFAULT_TIMEOUT)?,
            api_key: config.api_key,
            retry: config.retry,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(StrikeConfig::from_env()?)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.api_key)
    }

    async fn call<T, B>(&self, operation: &str, build: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Fn() -> RequestBuilder,
    {
        let api = &self.api;
        self.retry
            .run(operation, move || {
                let request = build();
                async move { api.send_json(request).await }
            })
            .await
    }

    async fn call_empty<B>(&self, operation: &str, build: B) -> Result<()>
    where
        B: Fn() -> RequestBuilder,
    {
        let api = &self.api;
        self.retry
            .run(operation, move || {
                let request = build();
                async move { api.send_empty(request).await }
            })
            .await
    }

    async fn quote(&self, sell: &str, buy: &str, amount: StrikeAmount) -> Result<StrikeQuote> {
        let body = json!({ "sell": sell, "buy": buy, "amount": amount });
        let quote: StrikeQuote = self
            .call("strike.create_quote", || {
                self.authed(self.api.post("/v1/currency-exchange-quotes"))
                    .json(&body)
            })
            .await?;

        tracing::info!(
            quote_id = %quote.id,
            usd = %quote.usd_amount(),
            btc = %quote.btc_amount(),
            valid_until = %quote.valid_until,
            "Created Strike quote"
        );
        Ok(quote)
    }
}

/// Map an upstream "quote expired" rejection to the terminal variant
fn expired_or(err: ProviderError, quote_id: &str) -> ProviderError {
    match &err {
        ProviderError::Api {
            status: Some(400..=499),
            message,
            ..
        } if message.to_ascii_uppercase().contains("EXPIRED") => ProviderError::QuoteExpired {
            provider: PROVIDER,
            quote_id: quote_id.to_string(),
        },
        _ => err,
    }
}

#[async_trait]
impl StrikeApi for StrikeClient {
    async fn create_quote(&self, amount_usd: Decimal) -> Result<StrikeQuote> {
        self.quote("USD", "BTC", StrikeAmount::usd(amount_usd.round_dp(2)))
            .await
    }

    async fn execute_quote(&self, quote: &StrikeQuote) -> Result<StrikeQuote> {
        if quote.is_expired_at(Utc::now()) {
            tracing::warn!(quote_id = %quote.id, valid_until = %quote.valid_until, "Quote expired before execution");
            return Err(ProviderError::QuoteExpired {
                provider: PROVIDER,
                quote_id: quote.id.clone(),
            });
        }

        let path = format!("/v1/currency-exchange-quotes/{}/execute", quote.id);
        self.call_empty("strike.execute_quote", || self.authed(self.api.patch(&path)))
            .await
            .map_err(|e| expired_or(e, &quote.id))?;

        let path = format!("/v1/currency-exchange-quotes/{}", quote.id);
        let executed: StrikeQuote = self
            .call("strike.get_quote", || self.authed(self.api.get(&path)))
            .await?;

        if executed.state == QuoteState::Failed {
            return Err(ProviderError::terminal(
                PROVIDER,
                format!("quote {} failed to execute", quote.id),
            ));
        }

        tracing::info!(quote_id = %executed.id, state = ?executed.state, "Executed Strike quote");
        Ok(executed)
    }

    async fn create_invoice(
        &self,
        amount_btc: Decimal,
        description: &str,
    ) -> Result<StrikeInvoice> {
        let body = json!({
            "correlationId": Uuid::new_v4().to_string(),
            "description": description,
            "amount": StrikeAmount::btc(amount_btc),
        });
        let created: InvoiceCreated = self
            .call("strike.create_invoice", || {
                self.authed(self.api.post("/v1/invoices")).json(&body)
            })
            .await?;

        let path = format!("/v1/invoices/{}/quote", created.invoice_id);
        let quote: InvoiceQuote = self
            .call("strike.invoice_quote", || self.authed(self.api.post(&path)))
            .await?;

        tracing::info!(invoice_id = %created.invoice_id, btc = %amount_btc, "Created Strike invoice");
        Ok(StrikeInvoice {
            invoice_id: created.invoice_id,
            ln_invoice: quote.ln_invoice,
            amount: created.amount,
            expires_at: Utc::now() + ChronoDuration::seconds(quote.expiration_in_sec),
        })
    }

    async fn pay_invoice(&self, ln_invoice: &str) -> Result<StrikePayment> {
        let body = json!({ "lnInvoice": ln_invoice, "sourceCurrency": "BTC" });
        let quote: PaymentQuote = self
            .call("strike.payment_quote", || {
                self.authed(self.api.post("/v1/payment-quotes/lightning"))
                    .json(&body)
            })
            .await?;

        let path = format!("/v1/payment-quotes/{}/execute", quote.payment_quote_id);
        let payment: StrikePayment = self
            .call("strike.pay_invoice", || self.authed(self.api.patch(&path)))
            .await?;

        if payment.state == PaymentState::Failed {
            return Err(ProviderError::terminal(
                PROVIDER,
                format!("lightning payment {} failed", payment.payment_id),
            ));
        }

        tracing::info!(payment_id = %payment.payment_id, state = ?payment.state, "Paid invoice via Strike");
        Ok(payment)
    }

    async fn swap_btc_to_usd(&self, amount_sats: u64) -> Result<StrikeQuote> {
        let quote = self
            .quote("BTC", "USD", StrikeAmount::btc(sats_to_btc(amount_sats)))
            .await?;
        self.execute_quote(&quote).await
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> StrikeClient {
        StrikeClient::new(StrikeConfig {
            base_url: server.uri(),
            api_key: "strike-key".into(),
            retry: RetryPolicy::immediate(3),
        })
        .unwrap()
    }

    fn quote_body(valid_until: DateTime<Utc>, state: &str) -> serde_json::Value {
        json!({
            "id": "q_1",
            "validUntil": valid_until,
            "source": { "amount": "100.00", "currency": "USD" },
            "target": { "amount": "0.00102564", "currency": "BTC" },
            "state": state
        })
    }

    #[tokio::test]
    async fn test_create_quote() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/currency-exchange-quotes"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(quote_body(Utc::now() + ChronoDuration::seconds(30), "NEW")),
            )
            .mount(&server)
            .await;

        let quote = client(&server).create_quote(dec!(100)).await.unwrap();
        assert_eq!(quote.usd_amount(), dec!(100.00));
        assert_eq!(quote.btc_amount(), dec!(0.00102564));
        assert_eq!(quote.usd_per_btc(), dec!(97500.10));
    }

    #[tokio::test]
    async fn test_server_errors_retry_three_times() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/currency-exchange-quotes"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = client(&server).create_quote(dec!(100)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.provider(), Some(ProviderKind::Strike));
    }

    #[tokio::test]
    async fn test_expired_quote_rejected_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let quote: StrikeQuote =
            serde_json::from_value(quote_body(Utc::now() - ChronoDuration::seconds(1), "NEW"))
                .unwrap();
        let err = client(&server).execute_quote(&quote).await.unwrap_err();

        assert!(matches!(err, ProviderError::QuoteExpired { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_upstream_expiry_maps_to_quote_expired() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/currency-exchange-quotes/q_1/execute"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "data": { "code": "QUOTE_EXPIRED", "message": "Quote has expired" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let quote: StrikeQuote =
            serde_json::from_value(quote_body(Utc::now() + ChronoDuration::seconds(30), "NEW"))
                .unwrap();
        let err = client(&server).execute_quote(&quote).await.unwrap_err();
        assert!(matches!(err, ProviderError::QuoteExpired { .. }));
    }

    #[tokio::test]
    async fn test_execute_quote_fetches_final_state() {
        let server = MockServer::start().await;
        let valid_until = Utc::now() + ChronoDuration::seconds(30);
        Mock::given(method("PATCH"))
            .and(path("/v1/currency-exchange-quotes/q_1/execute"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/currency-exchange-quotes/q_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(quote_body(valid_until, "COMPLETED")))
            .mount(&server)
            .await;

        let quote: StrikeQuote = serde_json::from_value(quote_body(valid_until, "NEW")).unwrap();
        let executed = client(&server).execute_quote(&quote).await.unwrap();
        assert_eq!(executed.state, QuoteState::Completed);
    }

    #[tokio::test]
    async fn test_create_invoice_and_pay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/invoices"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "invoiceId": "inv_1",
                "state": "UNPAID",
                "amount": { "amount": "0.0005", "currency": "BTC" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/invoices/inv_1/quote"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "quoteId": "iq_1",
                "lnInvoice": "lnbc500u1example",
                "expirationInSec": 600
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/payment-quotes/lightning"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "paymentQuoteId": "pq_1" })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/v1/payment-quotes/pq_1/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "paymentId": "pay_1",
                "state": "COMPLETED"
            })))
            .mount(&server)
            .await;

        let strike = client(&server);
        let invoice = strike.create_invoice(dec!(0.0005), "swap").await.unwrap();
        assert_eq!(invoice.ln_invoice, "lnbc500u1example");
        assert!(invoice.expires_at > Utc::now());

        let payment = strike.pay_invoice(&invoice.ln_invoice).await.unwrap();
        assert_eq!(payment.payment_id, "pay_1");
    }
}
