//! # paidin-core
//!
//! Domain records, ledger rules and the persistence contract shared by the
//! PaidIn payment pipeline.
//!
//! ## Records
//!
//! ```text
//! ┌───────────────┐   funds   ┌─────────────┐  converts  ┌─────────────┐
//! │ PlaidAccount  │──────────▶│PaymentIntent│───────────▶│ Conversion  │
//! └───────────────┘           └─────────────┘            └─────────────┘
//!                                    │                          │
//!                                    ▼                          ▼
//!                            ┌───────────────────┐      ┌─────────────┐
//!                            │ WalletTransaction │◀─────│ BreezWallet │
//!                            │  (append-only)    │      └─────────────┘
//!                            └───────────────────┘
//! ```
//!
//! Every money movement leaves exactly one [`WalletTransaction`] per attempt.
//! Entries are never rewritten; they only move from `pending` to a terminal
//! status (see [`TransactionStatus`]).

pub mod crypto;
pub mod error;
pub mod memory;
pub mod model;
pub mod store;

pub use crypto::{EncryptedSecret, SecretBox};
pub use error::{CoreError, Result};
pub use memory::MemoryPaymentStore;
pub use model::{
    BreezWallet, CompanyMember, Conversion, ConversionStatus, LedgerCurrency, LedgerKey,
    MemberRole, PaymentIntent, PaymentIntentStatus, PlaidAccount, PlaidAccountStatus,
    ProviderKind, TransactionStatus, TransactionType, WalletStatus, WalletTransaction,
    WalletType, WebhookEvent,
};
pub use store::{PaymentStore, WebhookFilter, WebhookRecord};
