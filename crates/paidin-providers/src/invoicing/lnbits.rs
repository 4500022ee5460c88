//! LNbits wallet invoices

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paidin_core::ProviderKind;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Invoice, InvoiceRequest, InvoiceStatus, PaymentService};
use crate::error::{ProviderError, Result};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};

const PROVIDER: ProviderKind = ProviderKind::LnBits;

#[derive(Clone)]
pub struct LnBitsConfig {
    pub base_url: String,

    /// Wallet invoice/read key
    pub api_key: String,
}

impl fmt::Debug for LnBitsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LnBitsConfig")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl LnBitsConfig {
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| ProviderError::Config(format!("{name} not set")))
        };
        Ok(Self {
            base_url: var("LNBITS_BASE_URL")?,
            api_key: var("LNBITS_API_KEY")?,
        })
    }
}

#[derive(Deserialize)]
struct CreatedPayment {
    payment_hash: String,
    #[serde(alias = "bolt11")]
    payment_request: String,
}

#[derive(Deserialize)]
struct PaymentLookup {
    paid: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Value,
}

/// `details.expiry` is a unix timestamp on older servers and RFC 3339 on newer ones
fn expiry(details: &Value) -> Option<DateTime<Utc>> {
    match details.get("expiry")? {
        Value::Number(n) => n
            .as_f64()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

fn lookup_status(lookup: &PaymentLookup, now: DateTime<Utc>) -> InvoiceStatus {
    if lookup.paid {
        return InvoiceStatus::Paid;
    }
    if lookup.status.as_deref() == Some("failed") {
        return InvoiceStatus::Invalid;
    }
    match expiry(&lookup.details) {
        Some(expires_at) if expires_at <= now => InvoiceStatus::Expired,
        _ => InvoiceStatus::Pending,
    }
}

pub struct LnBitsService {
    api: ApiClient,
    api_key: String,
}

impl LnBitsService {
    pub fn new(config: LnBitsConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(PROVIDER, &config.base_url, DEFAULT_TIMEOUT)?,
            api_key: config.api_key,
        })
    }
}

#[async_trait]
impl PaymentService for LnBitsService {
    fn provider(&self) -> ProviderKind {
        PROVIDER
    }

    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice> {
        let unit = if request.currency.eq_ignore_ascii_case("sats") {
            "sat"
        } else {
            request.currency.as_str()
        };
        let body = json!({
            "out": false,
            "amount": request.amount,
            "unit": unit,
            "memo": request.description.clone().unwrap_or_default(),
            "extra": { "order_id": request.order_id },
        });

        let created: CreatedPayment = self
            .api
            .send_json(
                self.api
                    .post("/api/v1/payments")
                    .header("X-Api-Key", &self.api_key)
                    .json(&body),
            )
            .await?;

        tracing::info!(payment_hash = %created.payment_hash, "Created LNbits invoice");
        Ok(Invoice {
            id: created.payment_hash,
            provider: PROVIDER,
            amount: request.amount,
            currency: request.currency.to_uppercase(),
            status: InvoiceStatus::Pending,
            payment_request: Some(created.payment_request),
            checkout_url: None,
            expires_at: None,
        })
    }

    async fn get_invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus> {
        let lookup: PaymentLookup = self
            .api
            .send_json(
                self.api
                    .get(&format!("/api/v1/payments/{invoice_id}"))
                    .header("X-Api-Key", &self.api_key),
            )
            .await?;
        Ok(lookup_status(&lookup, Utc::now()))
    }

    fn payment_url(&self, invoice: &Invoice) -> String {
        match &invoice.payment_request {
            Some(bolt11) => format!("lightning:{bolt11}"),
            None => format!("{}/api/v1/payments/{}", self.api.base_url(), invoice.id),
        }
    }
}
