//! Webhook Signature Verification
//!
//! Every inbound callback is authenticated with an HMAC-SHA256 over the raw
//! body before anything else reads it. Stripe signs `"{timestamp}.{body}"`
//! and bounds the timestamp; the other providers sign the body directly.
//! Unknown providers and providers without a configured secret fail closed.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use paidin_core::ProviderKind;
use serde_json::Value;
use sha2::Sha256;

use crate::error::{ProviderError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a Stripe signature timestamp
pub const STRIPE_TOLERANCE: Duration = Duration::from_secs(300);

/// Header carrying each provider's signature
pub const fn signature_header(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Stripe => "stripe-signature",
        ProviderKind::Strike => "x-webhook-signature",
        ProviderKind::Breez => "x-breez-signature",
        ProviderKind::BtcPay => "btcpay-sig",
        ProviderKind::LnBits => "x-lnbits-signature",
        ProviderKind::Plaid => "plaid-verification",
    }
}

/// Hex HMAC-SHA256 of `payload`
pub fn sign_hex(payload: &[u8], secret: &str) -> String {
    let mut mac = new_mac(secret);
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Build a `stripe-signature` header value for `payload`
pub fn stripe_signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = new_mac(secret);
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex HMAC-SHA256 signature
pub fn verify_hex_signature(payload: &[u8], signature: &str, secret: &str) -> Result<()> {
    let expected = hex::decode(signature.trim())
        .map_err(|_| ProviderError::WebhookSignature("signature is not hex".into()))?;
    let mut mac = new_mac(secret);
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| ProviderError::WebhookSignature("signature mismatch".into()))
}

/// Check a `stripe-signature` header (`t=...,v1=...`)
pub fn verify_stripe_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ProviderError::WebhookSignature("missing timestamp".into()))?;
    let age = now.timestamp().abs_diff(timestamp);
    if age > tolerance.as_secs() {
        return Err(ProviderError::WebhookSignature(format!(
            "timestamp outside tolerance ({age}s)"
        )));
    }

    let mut signed = Vec::with_capacity(payload.len() + 16);
    signed.extend_from_slice(timestamp.to_string().as_bytes());
    signed.push(b'.');
    signed.extend_from_slice(payload);

    if candidates
        .iter()
        .any(|candidate| verify_hex_signature(&signed, candidate, secret).is_ok())
    {
        Ok(())
    } else {
        Err(ProviderError::WebhookSignature("no matching v1 signature".into()))
    }
}

fn new_mac(secret: &str) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"))
}

/// Authenticated callback, ready to be recorded
#[derive(Clone, Debug)]
pub struct InboundWebhook {
    pub provider: ProviderKind,
    pub event_id: String,
    pub event_type: String,
    pub payload: Value,
}

/// Verifies signatures for every configured provider
#[derive(Clone, Default)]
pub struct WebhookVerifier {
    secrets: HashMap<ProviderKind, String>,
    stripe_tolerance: Option<Duration>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("providers", &self.secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_secret(mut self, provider: ProviderKind, secret: impl Into<String>) -> Self {
        self.secrets.insert(provider, secret.into());
        self
    }

    #[must_use]
    pub const fn with_stripe_tolerance(mut self, tolerance: Duration) -> Self {
        self.stripe_tolerance = Some(tolerance);
        self
    }

    /// Load `*_WEBHOOK_SECRET` variables for every provider that has one
    pub fn from_env() -> Self {
        let mut verifier = Self::new();
        for (provider, var) in [
            (ProviderKind::Stripe, "STRIPE_WEBHOOK_SECRET"),
            (ProviderKind::Strike, "STRIKE_WEBHOOK_SECRET"),
            (ProviderKind::Breez, "BREEZ_WEBHOOK_SECRET"),
            (ProviderKind::BtcPay, "BTCPAY_WEBHOOK_SECRET"),
            (ProviderKind::LnBits, "LNBITS_WEBHOOK_SECRET"),
        ] {
            if let Ok(secret) = std::env::var(var) {
                if !secret.is_empty() {
                    verifier.secrets.insert(provider, secret);
                }
            }
        }
        verifier
    }

    pub fn configured(&self, provider: ProviderKind) -> bool {
        self.secrets.contains_key(&provider)
    }

    /// Authenticate `body` and extract the event envelope
    pub fn verify(
        &self,
        provider: ProviderKind,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<InboundWebhook> {
        self.verify_at(provider, signature, body, Utc::now())
    }

    pub fn verify_at(
        &self,
        provider: ProviderKind,
        signature: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<InboundWebhook> {
        let secret = self.secrets.get(&provider).ok_or_else(|| {
            ProviderError::WebhookSignature(format!("no webhook secret configured for {provider}"))
        })?;
        let signature = signature.ok_or_else(|| {
            ProviderError::WebhookSignature(format!(
                "missing {} header",
                signature_header(provider)
            ))
        })?;

        match provider {
            ProviderKind::Stripe => verify_stripe_signature(
                body,
                signature,
                secret,
                self.stripe_tolerance.unwrap_or(STRIPE_TOLERANCE),
                now,
            )?,
            ProviderKind::BtcPay => {
                let hex_sig = signature.strip_prefix("sha256=").unwrap_or(signature);
                verify_hex_signature(body, hex_sig, secret)?;
            }
            ProviderKind::Strike | ProviderKind::Breez | ProviderKind::LnBits => {
                verify_hex_signature(body, signature, secret)?;
            }
            ProviderKind::Plaid => {
                return Err(ProviderError::WebhookSignature(
                    "plaid webhooks are not accepted".into(),
                ));
            }
        }

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| ProviderError::WebhookParse(e.to_string()))?;
        let (event_id, event_type) = envelope(provider, &payload)?;

        tracing::debug!(%provider, %event_id, %event_type, "Webhook signature verified");

        Ok(InboundWebhook {
            provider,
            event_id,
            event_type,
            payload,
        })
    }
}

/// Pull `(event_id, event_type)` from a provider payload
fn envelope(provider: ProviderKind, payload: &Value) -> Result<(String, String)> {
    let field = |name: &str| payload.get(name).and_then(Value::as_str).map(str::to_string);
    let missing = |name: &str| ProviderError::WebhookParse(format!("{provider} payload missing '{name}'"));

    match provider {
        ProviderKind::Strike => Ok((
            field("id").ok_or_else(|| missing("id"))?,
            field("eventType").ok_or_else(|| missing("eventType"))?,
        )),
        ProviderKind::BtcPay => Ok((
            field("deliveryId").ok_or_else(|| missing("deliveryId"))?,
            field("type").ok_or_else(|| missing("type"))?,
        )),
        ProviderKind::LnBits => Ok((
            field("payment_hash").ok_or_else(|| missing("payment_hash"))?,
            field("type").unwrap_or_else(|| "payment.received".to_string()),
        )),
        ProviderKind::Stripe | ProviderKind::Breez | ProviderKind::Plaid => Ok((
            field("id").ok_or_else(|| missing("id"))?,
            field("type").ok_or_else(|| missing("type"))?,
        )),
    }
}
