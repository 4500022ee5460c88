//! Typed Provider Events
//!
//! Inbound payloads are decoded exactly once, at dispatch, into a
//! [`ProviderEvent`]. Handlers match on variants instead of probing JSON.

use paidin_core::ProviderKind;
use paidin_providers::InvoiceStatus;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PipelineError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StripeEvent {
    PaymentSucceeded { payment_intent: String },
    PaymentFailed { payment_intent: String, reason: String },
    PaymentProcessing { payment_intent: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BreezEvent {
    /// An invoice issued by one of our nodes was paid
    InvoicePaid {
        payment_hash: String,
        node_id: Option<String>,
    },

    /// An outgoing payment from one of our nodes failed
    PaymentFailed { payment_hash: String, reason: String },

    /// Channel or balance change on a node
    NodeUpdated { node_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderEvent {
    Stripe(StripeEvent),
    Breez(BreezEvent),

    /// Strike account notification; `entity_id` names the changed invoice, quote or payment
    Strike { event_type: String, entity_id: String },

    /// Hosted invoice state change from BTCPay or LNbits
    Invoice {
        provider: ProviderKind,
        invoice_id: String,
        status: InvoiceStatus,
    },

    /// Recognized provider, event type we take no action on
    Ignored {
        provider: ProviderKind,
        event_type: String,
    },
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Deserialize)]
struct StripeEnvelope {
    data: StripeData,
}

#[derive(Deserialize)]
struct StripeData {
    object: StripeObject,
}

#[derive(Deserialize)]
struct StripeObject {
    id: String,
    #[serde(default)]
    last_payment_error: Option<StripeLastError>,
}

#[derive(Deserialize)]
struct StripeLastError {
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BreezData {
    #[serde(default)]
    payment_hash: Option<String>,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StrikeData {
    entity_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BtcPayBody {
    invoice_id: String,
}

fn decode<T: for<'de> Deserialize<'de>>(
    provider: ProviderKind,
    event_type: &str,
    value: &Value,
) -> Result<T> {
    T::deserialize(value).map_err(|e| {
        PipelineError::Validation(format!("malformed {provider} {event_type} payload: {e}"))
    })
}

fn missing(provider: ProviderKind, event_type: &str, field: &str) -> PipelineError {
    PipelineError::Validation(format!("{provider} {event_type} payload missing '{field}'"))
}

impl ProviderEvent {
    /// Decode a stored payload for `(provider, event_type)`
    pub fn decode(provider: ProviderKind, event_type: &str, payload: &Value) -> Result<Self> {
        match provider {
            ProviderKind::Stripe => Self::decode_stripe(event_type, payload),
            ProviderKind::Breez => Self::decode_breez(event_type, payload),
            ProviderKind::Strike => {
                let data: StrikeData = decode(
                    provider,
                    event_type,
                    payload.get("data").unwrap_or(&Value::Null),
                )?;
                Ok(Self::Strike {
                    event_type: event_type.to_string(),
                    entity_id: data.entity_id,
                })
            }
            ProviderKind::BtcPay => {
                let status = match event_type {
                    "InvoiceSettled" | "InvoicePaymentSettled" => InvoiceStatus::Paid,
                    "InvoiceExpired" => InvoiceStatus::Expired,
                    "InvoiceInvalid" => InvoiceStatus::Invalid,
                    "InvoiceCreated" | "InvoiceProcessing" | "InvoiceReceivedPayment" => {
                        InvoiceStatus::Pending
                    }
                    _ => return Ok(Self::ignored(provider, event_type)),
                };
                let body: BtcPayBody = decode(provider, event_type, payload)?;
                Ok(Self::Invoice {
                    provider,
                    invoice_id: body.invoice_id,
                    status,
                })
            }
            ProviderKind::LnBits => {
                let invoice_id = payload
                    .get("payment_hash")
                    .and_then(Value::as_str)
                    .ok_or_else(|| missing(provider, event_type, "payment_hash"))?;
                Ok(Self::Invoice {
                    provider,
                    invoice_id: invoice_id.to_string(),
                    status: InvoiceStatus::Paid,
                })
            }
            ProviderKind::Plaid => Ok(Self::ignored(provider, event_type)),
        }
    }

    fn ignored(provider: ProviderKind, event_type: &str) -> Self {
        Self::Ignored {
            provider,
            event_type: event_type.to_string(),
        }
    }

    fn decode_stripe(event_type: &str, payload: &Value) -> Result<Self> {
        let provider = ProviderKind::Stripe;
        let handled = matches!(
            event_type,
            "payment_intent.succeeded"
                | "payment_intent.payment_failed"
                | "payment_intent.canceled"
                | "payment_intent.processing"
        );
        if !handled {
            return Ok(Self::ignored(provider, event_type));
        }

        let envelope: StripeEnvelope = decode(provider, event_type, payload)?;
        let object = envelope.data.object;
        let event = match event_type {
            "payment_intent.succeeded" => StripeEvent::PaymentSucceeded {
                payment_intent: object.id,
            },
            "payment_intent.processing" => StripeEvent::PaymentProcessing {
                payment_intent: object.id,
            },
            _ => StripeEvent::PaymentFailed {
                reason: object
                    .last_payment_error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| event_type.trim_start_matches("payment_intent.").to_string()),
                payment_intent: object.id,
            },
        };
        Ok(Self::Stripe(event))
    }

    fn decode_breez(event_type: &str, payload: &Value) -> Result<Self> {
        let provider = ProviderKind::Breez;
        let handled = matches!(event_type, "invoice.paid" | "payment.failed" | "node.updated");
        if !handled {
            return Ok(Self::ignored(provider, event_type));
        }

        let data: BreezData = decode(
            provider,
            event_type,
            payload.get("data").unwrap_or(payload),
        )?;
        let event = match event_type {
            "invoice.paid" => BreezEvent::InvoicePaid {
                payment_hash: data
                    .payment_hash
                    .ok_or_else(|| missing(provider, event_type, "paymentHash"))?,
                node_id: data.node_id,
            },
            "payment.failed" => BreezEvent::PaymentFailed {
                payment_hash: data
                    .payment_hash
                    .ok_or_else(|| missing(provider, event_type, "paymentHash"))?,
                reason: data.reason.unwrap_or_else(|| "payment failed".to_string()),
            },
            _ => BreezEvent::NodeUpdated {
                node_id: data
                    .node_id
                    .ok_or_else(|| missing(provider, event_type, "nodeId"))?,
            },
        };
        Ok(Self::Breez(event))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_stripe_succeeded() {
        let payload = json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": { "id": "pi_123", "status": "succeeded" } }
        });
        let event =
            ProviderEvent::decode(ProviderKind::Stripe, "payment_intent.succeeded", &payload)
                .unwrap();
        assert_eq!(
            event,
            ProviderEvent::Stripe(StripeEvent::PaymentSucceeded {
                payment_intent: "pi_123".into()
            })
        );
    }

    #[test]
    fn test_stripe_failure_carries_reason() {
        let payload = json!({
            "data": { "object": {
                "id": "pi_9",
                "last_payment_error": { "message": "R01 insufficient funds" }
            } }
        });
        let event = ProviderEvent::decode(
            ProviderKind::Stripe,
            "payment_intent.payment_failed",
            &payload,
        )
        .unwrap();
        assert_eq!(
            event,
            ProviderEvent::Stripe(StripeEvent::PaymentFailed {
                payment_intent: "pi_9".into(),
                reason: "R01 insufficient funds".into()
            })
        );
    }

    #[test]
    fn test_breez_invoice_paid_requires_hash() {
        let ok = json!({ "id": "b1", "type": "invoice.paid", "data": { "paymentHash": "abc", "nodeId": "node_1" } });
        assert!(matches!(
            ProviderEvent::decode(ProviderKind::Breez, "invoice.paid", &ok).unwrap(),
            ProviderEvent::Breez(BreezEvent::InvoicePaid { payment_hash, .. }) if payment_hash == "abc"
        ));

        let bad = json!({ "id": "b2", "type": "invoice.paid", "data": {} });
        let err = ProviderEvent::decode(ProviderKind::Breez, "invoice.paid", &bad).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_unknown_types_are_ignored() {
        let event = ProviderEvent::decode(ProviderKind::Stripe, "charge.refunded", &json!({})).unwrap();
        assert!(matches!(event, ProviderEvent::Ignored { .. }));
    }

    #[test]
    fn test_btcpay_settled_invoice() {
        let payload = json!({ "deliveryId": "d1", "type": "InvoiceSettled", "invoiceId": "inv_7" });
        assert_eq!(
            ProviderEvent::decode(ProviderKind::BtcPay, "InvoiceSettled", &payload).unwrap(),
            ProviderEvent::Invoice {
                provider: ProviderKind::BtcPay,
                invoice_id: "inv_7".into(),
                status: InvoiceStatus::Paid
            }
        );
    }
}
