//! Stripe ACH Debits
//!
//! Creates a `us_bank_account` payment method from Plaid ACH numbers and
//! debits it through a payment intent. Requests are form-encoded against a
//! configurable base URL; intent creation carries an `Idempotency-Key`.
//! Stripe calls are not retried here: settlement is asynchronous and is
//! picked up by the funding job or the `payment_intent.*` webhook.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use paidin_core::{PaymentIntentStatus, ProviderKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProviderError, Result};
use crate::http::{ApiClient, DEFAULT_TIMEOUT};
use crate::plaid::AchNumbers;

const PROVIDER: ProviderKind = ProviderKind::Stripe;

/// Stripe credentials
#[derive(Clone)]
pub struct StripeConfig {
    pub base_url: String,
    pub secret_key: String,
}

impl fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeConfig")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl StripeConfig {
    /// Create from `STRIPE_SECRET_KEY` (and optional `STRIPE_BASE_URL`)
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| ProviderError::Config("STRIPE_SECRET_KEY not set".into()))?;
        Ok(Self {
            base_url: std::env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".into()),
            secret_key,
        })
    }
}

/// Stripe payment method
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StripePaymentMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
}

/// Stripe payment intent
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,

    /// Amount in cents
    pub amount: i64,

    pub currency: String,
    pub status: String,

    #[serde(default)]
    pub payment_method: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default)]
    pub last_payment_error: Option<Value>,
}

/// Where a confirmed debit stands
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    Settled,
    Pending,
    Failed(String),
}

impl StripePaymentIntent {
    pub fn status(&self) -> PaymentIntentStatus {
        PaymentIntentStatus::from_provider(&self.status)
    }

    /// ACH failures come back as `requires_payment_method` with a
    /// `last_payment_error`; they count as failed here.
    pub fn settlement(&self) -> Settlement {
        match self.status() {
            PaymentIntentStatus::Succeeded => Settlement::Settled,
            PaymentIntentStatus::Failed | PaymentIntentStatus::Canceled => Settlement::Failed(
                self.failure_message()
                    .unwrap_or_else(|| format!("payment intent {}", self.status)),
            ),
            PaymentIntentStatus::RequiresPaymentMethod if self.last_payment_error.is_some() => {
                Settlement::Failed(
                    self.failure_message()
                        .unwrap_or_else(|| "payment method failed".to_string()),
                )
            }
            _ => Settlement::Pending,
        }
    }

    /// Status as it should be stored locally
    pub fn local_status(&self) -> PaymentIntentStatus {
        match self.settlement() {
            Settlement::Failed(_) => PaymentIntentStatus::Failed,
            _ => self.status(),
        }
    }

    /// Decline reason reported by Stripe, if any
    pub fn failure_message(&self) -> Option<String> {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Bank-debit operations
#[async_trait]
pub trait StripeApi: Send + Sync {
    async fn create_payment_method_from_ach(
        &self,
        holder_name: &str,
        ach: &AchNumbers,
    ) -> Result<StripePaymentMethod>;

    /// Create an unconfirmed intent; `idempotency_key` deduplicates retries upstream
    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        payment_method_id: &str,
        metadata: &HashMap<String, String>,
        idempotency_key: &str,
    ) -> Result<StripePaymentIntent>;

    async fn confirm_payment_intent(&self, id: &str) -> Result<StripePaymentIntent>;

    async fn retrieve_payment_intent(&self, id: &str) -> Result<StripePaymentIntent>;
}

/// Stripe REST client
#[derive(Clone, Debug)]
pub struct StripeClient {
    api: ApiClient,
    secret_key: String,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(PROVIDER, &config.base_url, DEFAULT_TIMEOUT)?,
            secret_key: config.secret_key,
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T> {
        let mut request = self
            .api
            .post(path)
            .bearer_auth(&self.secret_key)
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }
        self.api.send_json(request).await
    }
}

fn field(name: &str, value: impl ToString) -> (String, String) {
    (name.to_string(), value.to_string())
}

#[async_trait]
impl StripeApi for StripeClient {
    async fn create_payment_method_from_ach(
        &self,
        holder_name: &str,
        ach: &AchNumbers,
    ) -> Result<StripePaymentMethod> {
        let form = [
            field("type", "us_bank_account"),
            field("us_bank_account[account_holder_type]", "company"),
            field("us_bank_account[account_type]", "checking"),
            field("us_bank_account[account_number]", &ach.account_number),
            field("us_bank_account[routing_number]", &ach.routing_number),
            field("billing_details[name]", holder_name),
        ];
        let method: StripePaymentMethod = self.post_form("/v1/payment_methods", &form, None).await?;
        tracing::debug!(payment_method = %method.id, last4 = ach.last4(), "Created ACH payment method");
        Ok(method)
    }

    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        payment_method_id: &str,
        metadata: &HashMap<String, String>,
        idempotency_key: &str,
    ) -> Result<StripePaymentIntent> {
        let mut form = vec![
            field("amount", amount_cents),
            field("currency", "usd"),
            field("payment_method", payment_method_id),
            field("payment_method_types[]", "us_bank_account"),
        ];
        let mut keys: Vec<_> = metadata.keys().collect();
        keys.sort();
        for key in keys {
            form.push(field(&format!("metadata[{key}]"), &metadata[key]));
        }

        let intent: StripePaymentIntent = self
            .post_form("/v1/payment_intents", &form, Some(idempotency_key))
            .await?;
        tracing::info!(payment_intent = %intent.id, amount_cents, "Created Stripe payment intent");
        Ok(intent)
    }

    async fn confirm_payment_intent(&self, id: &str) -> Result<StripePaymentIntent> {
        let form = [field("mandate_data[customer_acceptance][type]", "offline")];
        let intent: StripePaymentIntent = self
            .post_form(&format!("/v1/payment_intents/{id}/confirm"), &form, None)
            .await?;
        tracing::info!(payment_intent = %intent.id, status = %intent.status, "Confirmed Stripe payment intent");
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<StripePaymentIntent> {
        let request = self
            .api
            .get(&format!("/v1/payment_intents/{id}"))
            .bearer_auth(&self.secret_key);
        self.api.send_json(request).await
    }
}
