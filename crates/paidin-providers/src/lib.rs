//! # paidin-providers
//!
//! Adapters for the external services the PaidIn pipeline moves money through.
//!
//! ```text
//!   bank ──ACH──▶ Stripe ──USD──▶ Strike ──Lightning──▶ Breez wallets
//!     ▲                                                     │
//!   Plaid (account linking)              BTCPay / LNbits invoices
//! ```
//!
//! Each provider sits behind a trait ([`PlaidApi`], [`StripeApi`],
//! [`StrikeApi`], [`BreezApi`], [`PaymentService`]) with a REST client and a
//! sandbox implementation in [`mock`]. Failures are classified once, in
//! [`ProviderError`], as transient or terminal; only transient ones are
//! retried by [`RetryPolicy`].

pub mod breez;
pub mod error;
pub mod http;
pub mod invoicing;
pub mod mock;
pub mod plaid;
pub mod retry;
pub mod strike;
pub mod stripe;
pub mod webhook;

pub use breez::{BreezApi, BreezClient, BreezConfig, BreezInvoice, BreezPayment, NodeInfo};
pub use error::{ProviderError, ProviderErrorKind, Result};
pub use invoicing::{
    Invoice, InvoiceRequest, InvoiceStatus, InvoicingBackend, PaymentService,
};
pub use mock::SandboxProviders;
pub use plaid::{AchNumbers, LinkToken, PlaidApi, PlaidClient, PlaidConfig};
pub use retry::RetryPolicy;
pub use strike::{StrikeApi, StrikeClient, StrikeConfig, StrikeInvoice, StrikeQuote};
pub use stripe::{Settlement, StripeApi, StripeClient, StripeConfig, StripePaymentIntent};
pub use webhook::{InboundWebhook, WebhookVerifier};
