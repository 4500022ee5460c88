//! BTCPay Server (Greenfield API)

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paidin_core::ProviderKind;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use super::{Invoice, InvoiceRequest, InvoiceStatus, PaymentService};
use crate::error::{ProviderError, Result};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};

const PROVIDER: ProviderKind = ProviderKind::BtcPay;

#[derive(Clone)]
pub struct BtcPayConfig {
    pub base_url: String,
    pub api_key: String,
    pub store_id: String,
}

impl fmt::Debug for BtcPayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BtcPayConfig")
            .field("base_url", &self.base_url)
            .field("store_id", &self.store_id)
            .finish_non_exhaustive()
    }
}

impl BtcPayConfig {
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| ProviderError::Config(format!("{name} not set")))
        };
        Ok(Self {
            base_url: var("BTCPAY_BASE_URL")?,
            api_key: var("BTCPAY_API_KEY")?,
            store_id: var("BTCPAY_STORE_ID")?,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GreenfieldInvoice {
    id: String,
    status: String,
    amount: Decimal,
    currency: String,
    checkout_link: Option<String>,
    expiration_time: Option<i64>,
}

fn map_status(status: &str) -> InvoiceStatus {
    match status {
        "Settled" => InvoiceStatus::Paid,
        "Expired" => InvoiceStatus::Expired,
        "Invalid" => InvoiceStatus::Invalid,
        _ => InvoiceStatus::Pending,
    }
}

pub struct BtcPayService {
    api: ApiClient,
    config: BtcPayConfig,
}

impl BtcPayService {
    pub fn new(config: BtcPayConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(PROVIDER, &config.base_url, DEFAULT_TIMEOUT)?,
            config,
        })
    }

    fn invoices_path(&self) -> String {
        format!("/api/v1/stores/{}/invoices", self.config.store_id)
    }

    fn authorization(&self) -> String {
        format!("token {}", self.config.api_key)
    }
}

#[async_trait]
impl PaymentService for BtcPayService {
    fn provider(&self) -> ProviderKind {
        PROVIDER
    }

    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice> {
        let body = json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "metadata": {
                "orderId": request.order_id,
                "itemDesc": request.description,
            },
        });
        let created: GreenfieldInvoice = self
            .api
            .send_json(
                self.api
                    .post(&self.invoices_path())
                    .header("Authorization", self.authorization())
                    .json(&body),
            )
            .await?;

        tracing::info!(invoice_id = %created.id, amount = %created.amount, "Created BTCPay invoice");
        Ok(Invoice {
            status: map_status(&created.status),
            expires_at: created
                .expiration_time
                .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
            id: created.id,
            provider: PROVIDER,
            amount: created.amount,
            currency: created.currency,
            payment_request: None,
            checkout_url: created.checkout_link,
        })
    }

    async fn get_invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus> {
        let invoice: GreenfieldInvoice = self
            .api
            .send_json(
                self.api
                    .get(&format!("{}/{invoice_id}", self.invoices_path()))
                    .header("Authorization", self.authorization()),
            )
            .await?;
        Ok(map_status(&invoice.status))
    }

    fn payment_url(&self, invoice: &Invoice) -> String {
        invoice
            .checkout_url
            .clone()
            .unwrap_or_else(|| format!("{}/i/{}", self.api.base_url(), invoice.id))
    }
}
