//! In-memory Payment Store
//!
//! Implements [`PaymentStore`] over `tokio::sync::RwLock`-guarded tables.
//! Used by the sandbox server and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{
    BreezWallet, CompanyMember, Conversion, LedgerKey, MemberRole, PaymentIntent, PlaidAccount,
    ProviderKind, TransactionStatus, TransactionType, WalletTransaction, WalletType, WebhookEvent,
};
use crate::store::{PaymentStore, WebhookFilter, WebhookRecord};

#[derive(Default)]
struct Tables {
    members: HashMap<(Uuid, Uuid), MemberRole>,
    payment_intents: Vec<PaymentIntent>,
    conversions: Vec<Conversion>,
    wallets: Vec<BreezWallet>,
    ledger: Vec<WalletTransaction>,
    webhook_events: Vec<WebhookEvent>,
    plaid_accounts: Vec<PlaidAccount>,
}

/// In-memory store (for development and tests)
#[derive(Default)]
pub struct MemoryPaymentStore {
    tables: RwLock<Tables>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T: Clone>(rows: impl DoubleEndedIterator<Item = T>, limit: usize) -> Vec<T> {
    rows.rev().take(limit).collect()
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn upsert_member(&self, member: CompanyMember) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .members
            .insert((member.company_id, member.user_id), member.role);
        Ok(())
    }

    async fn member_role(&self, company_id: Uuid, user_id: Uuid) -> Result<Option<MemberRole>> {
        let tables = self.tables.read().await;
        Ok(tables.members.get(&(company_id, user_id)).copied())
    }

    async fn insert_payment_intent(&self, intent: &PaymentIntent) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .payment_intents
            .iter()
            .any(|p| p.id == intent.id || p.provider_ref == intent.provider_ref)
        {
            return Err(CoreError::Duplicate(format!(
                "payment intent {}",
                intent.provider_ref
            )));
        }
        tables.payment_intents.push(intent.clone());
        Ok(())
    }

    async fn payment_intent(&self, id: Uuid) -> Result<Option<PaymentIntent>> {
        let tables = self.tables.read().await;
        Ok(tables.payment_intents.iter().find(|p| p.id == id).cloned())
    }

    async fn payment_intent_by_ref(&self, provider_ref: &str) -> Result<Option<PaymentIntent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payment_intents
            .iter()
            .find(|p| p.provider_ref == provider_ref)
            .cloned())
    }

    async fn update_payment_intent(&self, intent: &PaymentIntent) -> Result<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .payment_intents
            .iter_mut()
            .find(|p| p.id == intent.id)
            .ok_or_else(|| CoreError::not_found("payment intent", intent.id))?;
        *slot = intent.clone();
        Ok(())
    }

    async fn payment_intents_for_company(&self, company_id: Uuid) -> Result<Vec<PaymentIntent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payment_intents
            .iter()
            .filter(|p| p.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn insert_conversion(&self, conversion: &Conversion) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.conversions.push(conversion.clone());
        Ok(())
    }

    async fn conversion(&self, id: Uuid) -> Result<Option<Conversion>> {
        let tables = self.tables.read().await;
        Ok(tables.conversions.iter().find(|c| c.id == id).cloned())
    }

    async fn conversions_for_company(&self, company_id: Uuid) -> Result<Vec<Conversion>> {
        let tables = self.tables.read().await;
        Ok(tables
            .conversions
            .iter()
            .filter(|c| c.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn insert_wallet(&self, wallet: &BreezWallet) -> Result<()> {
        wallet.validate()?;
        let mut tables = self.tables.write().await;
        if tables.wallets.iter().any(|w| {
            w.company_id == wallet.company_id
                && w.user_id == wallet.user_id
                && w.wallet_type == wallet.wallet_type
        }) {
            return Err(CoreError::Duplicate(format!(
                "{} wallet for company {}",
                wallet.wallet_type.as_str(),
                wallet.company_id
            )));
        }
        tables.wallets.push(wallet.clone());
        Ok(())
    }

    async fn wallet(&self, id: Uuid) -> Result<Option<BreezWallet>> {
        let tables = self.tables.read().await;
        Ok(tables.wallets.iter().find(|w| w.id == id).cloned())
    }

    async fn find_wallet(
        &self,
        company_id: Uuid,
        user_id: Option<Uuid>,
        wallet_type: WalletType,
    ) -> Result<Option<BreezWallet>> {
        let tables = self.tables.read().await;
        Ok(tables
            .wallets
            .iter()
            .find(|w| {
                w.company_id == company_id && w.user_id == user_id && w.wallet_type == wallet_type
            })
            .cloned())
    }

    async fn wallet_by_node(&self, node_id: &str) -> Result<Option<BreezWallet>> {
        let tables = self.tables.read().await;
        Ok(tables.wallets.iter().find(|w| w.node_id == node_id).cloned())
    }

    async fn update_wallet(&self, wallet: &BreezWallet) -> Result<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .wallets
            .iter_mut()
            .find(|w| w.id == wallet.id)
            .ok_or_else(|| CoreError::not_found("wallet", wallet.id))?;
        *slot = wallet.clone();
        Ok(())
    }

    async fn wallets_for_company(&self, company_id: Uuid) -> Result<Vec<BreezWallet>> {
        let tables = self.tables.read().await;
        Ok(tables
            .wallets
            .iter()
            .filter(|w| w.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn append_transaction(&self, tx: &WalletTransaction) -> Result<()> {
        tx.validate()?;
        let mut tables = self.tables.write().await;

        if tx.status != TransactionStatus::Failed {
            let key = tx.key();
            if tables
                .ledger
                .iter()
                .any(|t| t.status != TransactionStatus::Failed && t.key() == key)
            {
                tracing::warn!(
                    %key,
                    transaction_id = %tx.id,
                    status = tx.status.as_str(),
                    "Rejected duplicate ledger entry"
                );
                return Err(CoreError::DuplicateLedgerEntry(key.to_string()));
            }
        }

        tables.ledger.push(tx.clone());
        Ok(())
    }

    async fn transaction(&self, id: Uuid) -> Result<Option<WalletTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables.ledger.iter().find(|t| t.id == id).cloned())
    }

    async fn active_transaction(&self, key: &LedgerKey) -> Result<Option<WalletTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ledger
            .iter()
            .find(|t| t.status != TransactionStatus::Failed && t.key() == *key)
            .cloned())
    }

    async fn transactions_for_key(&self, key: &LedgerKey) -> Result<Vec<WalletTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ledger
            .iter()
            .filter(|t| t.key() == *key)
            .cloned()
            .collect())
    }

    async fn find_transaction_by_meta(
        &self,
        transaction_type: TransactionType,
        field: &str,
        value: &str,
    ) -> Result<Option<WalletTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ledger
            .iter()
            .find(|t| {
                t.transaction_type == transaction_type
                    && t.status != TransactionStatus::Failed
                    && t.meta_str(field) == Some(value)
            })
            .cloned())
    }

    async fn transition_transaction(
        &self,
        id: Uuid,
        next: TransactionStatus,
        metadata: Option<Value>,
    ) -> Result<WalletTransaction> {
        let mut tables = self.tables.write().await;
        let tx = tables
            .ledger
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| CoreError::not_found("transaction", id))?;
        if let Err(e) = tx.transition(next, metadata) {
            tracing::warn!(transaction_id = %id, error = %e, "Rejected ledger transition");
            return Err(e);
        }
        Ok(tx.clone())
    }

    async fn transactions_for_user(
        &self,
        company_id: Uuid,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>> {
        let tables = self.tables.read().await;
        let rows = tables
            .ledger
            .iter()
            .filter(|t| t.company_id == company_id && t.user_id == Some(user_id))
            .cloned()
            .collect::<Vec<_>>();
        Ok(newest_first(rows.into_iter(), limit))
    }

    async fn transactions_for_company(
        &self,
        company_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WalletTransaction>> {
        let tables = self.tables.read().await;
        let rows = tables
            .ledger
            .iter()
            .filter(|t| t.company_id == company_id)
            .cloned()
            .collect::<Vec<_>>();
        Ok(newest_first(rows.into_iter(), limit))
    }

    async fn record_webhook_event(&self, event: WebhookEvent) -> Result<WebhookRecord> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .webhook_events
            .iter()
            .find(|e| e.provider == event.provider && e.event_id == event.event_id)
        {
            return Ok(WebhookRecord::Existing(existing.clone()));
        }
        tables.webhook_events.push(event.clone());
        Ok(WebhookRecord::Inserted(event))
    }

    async fn webhook_event(
        &self,
        provider: ProviderKind,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .webhook_events
            .iter()
            .find(|e| e.provider == provider && e.event_id == event_id)
            .cloned())
    }

    async fn webhook_event_by_id(&self, id: Uuid) -> Result<Option<WebhookEvent>> {
        let tables = self.tables.read().await;
        Ok(tables.webhook_events.iter().find(|e| e.id == id).cloned())
    }

    async fn finish_webhook_event(&self, id: Uuid, error: Option<String>) -> Result<WebhookEvent> {
        let mut tables = self.tables.write().await;
        let event = tables
            .webhook_events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| CoreError::not_found("webhook event", id))?;

        event.attempts += 1;
        if error.is_none() {
            event.processed = true;
            event.processed_at = Some(Utc::now());
        }
        event.error = error;
        Ok(event.clone())
    }

    async fn list_webhook_events(&self, filter: &WebhookFilter) -> Result<Vec<WebhookEvent>> {
        let tables = self.tables.read().await;
        let rows = tables
            .webhook_events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect::<Vec<_>>();
        Ok(newest_first(rows.into_iter(), filter.limit.unwrap_or(usize::MAX)))
    }

    async fn insert_plaid_account(&self, account: &PlaidAccount) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .plaid_accounts
            .iter()
            .any(|a| a.account_id == account.account_id && a.company_id == account.company_id)
        {
            return Err(CoreError::Duplicate(format!(
                "bank account {}",
                account.account_id
            )));
        }
        tables.plaid_accounts.push(account.clone());
        Ok(())
    }

    async fn plaid_account(&self, id: Uuid) -> Result<Option<PlaidAccount>> {
        let tables = self.tables.read().await;
        Ok(tables.plaid_accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn plaid_accounts_for_company(&self, company_id: Uuid) -> Result<Vec<PlaidAccount>> {
        let tables = self.tables.read().await;
        Ok(tables
            .plaid_accounts
            .iter()
            .filter(|a| a.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn delete_plaid_account(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.plaid_accounts.len();
        tables.plaid_accounts.retain(|a| a.id != id);
        Ok(tables.plaid_accounts.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LedgerCurrency, WebhookEvent};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn funding(source_id: &str, status: TransactionStatus) -> WalletTransaction {
        WalletTransaction::new(
            LedgerKey::new(TransactionType::Funding, ProviderKind::Stripe, source_id),
            Uuid::nil(),
            dec!(100),
            LedgerCurrency::Usd,
            status,
        )
    }

    #[tokio::test]
    async fn test_non_failed_key_is_unique() {
        let store = MemoryPaymentStore::new();
        store
            .append_transaction(&funding("pi_1", TransactionStatus::Pending))
            .await
            .unwrap();

        let err = store
            .append_transaction(&funding("pi_1", TransactionStatus::Completed))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateLedgerEntry(_)));

        let key = LedgerKey::new(TransactionType::Funding, ProviderKind::Stripe, "pi_1");
        let rows = store.transactions_for_key(&key).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_failed_attempts_do_not_block_key() {
        let store = MemoryPaymentStore::new();
        store
            .append_transaction(&funding("pi_1", TransactionStatus::Failed))
            .await
            .unwrap();
        store
            .append_transaction(&funding("pi_1", TransactionStatus::Failed))
            .await
            .unwrap();
        store
            .append_transaction(&funding("pi_1", TransactionStatus::Pending))
            .await
            .unwrap();

        let key = LedgerKey::new(TransactionType::Funding, ProviderKind::Stripe, "pi_1");
        assert_eq!(store.transactions_for_key(&key).await.unwrap().len(), 3);
        assert_eq!(
            store.active_transaction(&key).await.unwrap().unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_transition_frees_key_when_failed() {
        let store = MemoryPaymentStore::new();
        let claim = funding("pi_2", TransactionStatus::Pending);
        store.append_transaction(&claim).await.unwrap();

        let failed = store
            .transition_transaction(claim.id, TransactionStatus::Failed, Some(json!({"error": "x"})))
            .await
            .unwrap();
        assert_eq!(failed.meta_str("error"), Some("x"));

        store
            .append_transaction(&funding("pi_2", TransactionStatus::Pending))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_event_dedup() {
        let store = MemoryPaymentStore::new();
        let first = WebhookEvent::new(ProviderKind::Stripe, "payment_intent.succeeded", "evt_1", json!({}));
        let again = WebhookEvent::new(ProviderKind::Stripe, "payment_intent.succeeded", "evt_1", json!({}));

        assert!(matches!(
            store.record_webhook_event(first.clone()).await.unwrap(),
            WebhookRecord::Inserted(_)
        ));
        match store.record_webhook_event(again).await.unwrap() {
            WebhookRecord::Existing(existing) => assert_eq!(existing.id, first.id),
            WebhookRecord::Inserted(_) => panic!("duplicate event inserted"),
        }
    }

    #[tokio::test]
    async fn test_failed_replay_keeps_processed_flag() {
        let store = MemoryPaymentStore::new();
        let event = WebhookEvent::new(ProviderKind::Breez, "invoice.paid", "evt_9", json!({}));
        store.record_webhook_event(event.clone()).await.unwrap();

        store.finish_webhook_event(event.id, None).await.unwrap();
        let after = store
            .finish_webhook_event(event.id, Some("boom".into()))
            .await
            .unwrap();

        assert!(after.processed);
        assert_eq!(after.attempts, 2);
        assert_eq!(after.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let store = MemoryPaymentStore::new();
        let company = Uuid::new_v4();
        let user = Uuid::new_v4();
        for n in 0..3 {
            let tx = WalletTransaction::new(
                LedgerKey::new(TransactionType::Payout, ProviderKind::Breez, format!("po_{n}")),
                company,
                dec!(1000),
                LedgerCurrency::Sats,
                TransactionStatus::Pending,
            )
            .for_user(user);
            store.append_transaction(&tx).await.unwrap();
        }

        let history = store.transactions_for_user(company, user, 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].source_id, "po_2");
        assert_eq!(history[1].source_id, "po_1");
    }
}
