//! Hosted Invoicing
//!
//! A single [`PaymentService`] abstraction over BTCPay Server and LNbits for
//! issuing payable invoices outside the payroll flow. The backend is chosen
//! with `INVOICING_PROVIDER`.

mod btcpay;
mod lnbits;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paidin_core::ProviderKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};

pub use btcpay::{BtcPayConfig, BtcPayService};
pub use lnbits::{LnBitsConfig, LnBitsService};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Expired,
    Invalid,
}

/// Invoice to issue
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub amount: Decimal,

    /// `USD` or `SATS`
    pub currency: String,

    pub description: Option<String>,
    pub order_id: Option<String>,
}

/// Issued invoice
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub provider: ProviderKind,
    pub amount: Decimal,
    pub currency: String,
    pub status: InvoiceStatus,

    /// BOLT11 payment request, when the backend returns one
    pub payment_request: Option<String>,

    /// Hosted checkout page, when the backend has one
    pub checkout_url: Option<String>,

    pub expires_at: Option<DateTime<Utc>>,
}

/// Invoice backend
#[async_trait]
pub trait PaymentService: Send + Sync {
    fn provider(&self) -> ProviderKind;

    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice>;

    async fn get_invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus>;

    async fn is_invoice_paid(&self, invoice_id: &str) -> Result<bool> {
        Ok(self.get_invoice_status(invoice_id).await? == InvoiceStatus::Paid)
    }

    async fn is_invoice_expired(&self, invoice_id: &str) -> Result<bool> {
        Ok(self.get_invoice_status(invoice_id).await? == InvoiceStatus::Expired)
    }

    async fn is_invoice_pending(&self, invoice_id: &str) -> Result<bool> {
        Ok(self.get_invoice_status(invoice_id).await? == InvoiceStatus::Pending)
    }

    /// Where a payer should be sent to settle `invoice`
    fn payment_url(&self, invoice: &Invoice) -> String;
}

/// Selected invoicing backend
#[derive(Clone, Debug)]
pub enum InvoicingBackend {
    BtcPay(BtcPayConfig),
    LnBits(LnBitsConfig),
}

impl InvoicingBackend {
    /// Read `INVOICING_PROVIDER`; `None` when unset
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(provider) = std::env::var("INVOICING_PROVIDER") else {
            return Ok(None);
        };
        match provider.to_lowercase().as_str() {
            "btcpay" => Ok(Some(Self::BtcPay(BtcPayConfig::from_env()?))),
            "lnbits" => Ok(Some(Self::LnBits(LnBitsConfig::from_env()?))),
            "" | "none" => Ok(None),
            other => Err(ProviderError::Config(format!(
                "unknown INVOICING_PROVIDER '{other}'"
            ))),
        }
    }

    pub fn build(self) -> Result<Arc<dyn PaymentService>> {
        Ok(match self {
            Self::BtcPay(config) => Arc::new(BtcPayService::new(config)?),
            Self::LnBits(config) => Arc::new(LnBitsService::new(config)?),
        })
    }
}
