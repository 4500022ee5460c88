//! Shared sandbox harness for pipeline integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use paidin_core::{
    CompanyMember, MemberRole, MemoryPaymentStore, PaymentStore, ProviderKind, SecretBox,
    TransactionStatus, TransactionType, WalletTransaction, WalletType,
};
use paidin_pipeline::{
    FundWalletRequest, FundWalletResponse, JobQueue, Lane, MemoryBroker, Pipeline, Providers,
    WorkerConfig, WorkerPool,
};
use paidin_providers::{PlaidApi, SandboxProviders, WebhookVerifier};
use rust_decimal::Decimal;
use uuid::Uuid;

pub const STRIPE_SECRET: &str = "whsec_stripe_test";
pub const BREEZ_SECRET: &str = "whsec_breez_test";

pub struct Harness {
    pub store: Arc<MemoryPaymentStore>,
    pub sandbox: SandboxProviders,
    pub pipeline: Pipeline,
    pub workers: Option<WorkerPool>,
    pub company_id: Uuid,
    pub admin_id: Uuid,
    pub employee_id: Uuid,
}

impl Harness {
    /// Pipeline over an in-memory broker with no funding delay
    pub async fn queued() -> Self {
        let queue = JobQueue::new(Arc::new(MemoryBroker::new())).with_funding_delay(Duration::ZERO);
        Self::build(queue).await
    }

    /// Degraded mode: every enqueue is dropped
    pub async fn unqueued() -> Self {
        Self::build(JobQueue::disabled()).await
    }

    async fn build(queue: JobQueue) -> Self {
        let store = Arc::new(MemoryPaymentStore::new());
        let secrets = SecretBox::new("pipeline-integration").unwrap();
        let sandbox = SandboxProviders::new(store.clone(), &secrets);
        let verifier = WebhookVerifier::new()
            .with_secret(ProviderKind::Stripe, STRIPE_SECRET)
            .with_secret(ProviderKind::Breez, BREEZ_SECRET);

        let pipeline = Pipeline::new(store.clone(), Providers::sandbox(&sandbox), queue, verifier);
        let workers = pipeline.workers(WorkerConfig {
            poll_interval: Duration::from_millis(10),
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            visibility_timeout: Duration::from_secs(600),
        });

        let company_id = Uuid::new_v4();
        let admin_id = Uuid::new_v4();
        let employee_id = Uuid::new_v4();
        for (user_id, role) in [(admin_id, MemberRole::Admin), (employee_id, MemberRole::Employee)] {
            store
                .upsert_member(CompanyMember {
                    company_id,
                    user_id,
                    role,
                })
                .await
                .unwrap();
        }

        Self {
            store,
            sandbox,
            pipeline,
            workers,
            company_id,
            admin_id,
            employee_id,
        }
    }

    /// Link the sandbox checking account for the admin
    pub async fn link_account(&self) -> Uuid {
        let accounts = self
            .sandbox
            .plaid
            .exchange_public_token("public-sandbox-token", self.admin_id, self.company_id)
            .await
            .unwrap();
        accounts[0].id
    }

    pub async fn fund(&self, amount_usd: Decimal) -> FundWalletResponse {
        let account = self.link_account().await;
        self.pipeline
            .orchestrator
            .fund_company_wallet(FundWalletRequest {
                requested_by: self.admin_id,
                company_id: self.company_id,
                plaid_account_id: account,
                amount_usd,
            })
            .await
            .unwrap()
    }

    /// Run due jobs on a lane until it is empty
    pub async fn drain(&self, lane: Lane) -> usize {
        self.workers
            .as_ref()
            .expect("harness built without a queue")
            .drain(lane)
            .await
            .unwrap()
    }

    pub async fn ledger(&self) -> Vec<WalletTransaction> {
        self.store
            .transactions_for_company(self.company_id, 1000)
            .await
            .unwrap()
    }

    pub async fn count(&self, kind: TransactionType, status: TransactionStatus) -> usize {
        self.ledger()
            .await
            .iter()
            .filter(|t| t.transaction_type == kind && t.status == status)
            .count()
    }

    /// Create the employee wallet and credit it out of band
    pub async fn fund_employee(&self, sats: u64) -> Uuid {
        let wallet = paidin_providers::BreezApi::initialize_wallet(
            self.sandbox.breez.as_ref(),
            self.company_id,
            Some(self.employee_id),
            WalletType::Employee,
        )
        .await
        .unwrap();
        self.sandbox.breez.fund_wallet(wallet.id, sats).await.unwrap();
        wallet.id
    }

    pub async fn balance(&self, user_id: Uuid, wallet_type: WalletType) -> u64 {
        self.pipeline
            .orchestrator
            .get_wallet_balance(user_id, self.company_id, wallet_type)
            .await
            .unwrap()
    }
}
