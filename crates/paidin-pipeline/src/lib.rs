//! # paidin-pipeline
//!
//! Coordinates money movement across Plaid, Stripe, Strike and Breez.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────────┐     ┌───────────────────┐
//! │ HTTP routes  │────▶│ PaymentOrchestrator  │────▶│ Provider adapters │
//! └──────────────┘     └──────────────────────┘     └───────────────────┘
//!        │                  ▲          │
//!        │                  │          ▼
//!        │           ┌────────────┐ ┌──────────┐    ┌──────────────┐
//!        │           │ WorkerPool │◀│ JobQueue │    │ PaymentStore │
//!        │           └────────────┘ └──────────┘    │  (ledger)    │
//!        ▼                  │          ▲            └──────────────┘
//! ┌──────────────────┐      │          │
//! │ WebhookDispatcher│◀─────┘──────────┘
//! └──────────────────┘
//! ```
//!
//! [`Pipeline`] wires the pieces together once at startup.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
pub mod jobs;
pub mod orchestrator;

use std::sync::Arc;

use paidin_core::PaymentStore;
use paidin_providers::WebhookVerifier;

pub use dispatcher::{WebhookDispatcher, WebhookReceipt};
pub use error::{PipelineError, Result};
pub use events::{BreezEvent, ProviderEvent, StripeEvent};
pub use handler::PipelineJobs;
pub use jobs::{
    Broker, FundingJob, Job, JobHandle, JobHandler, JobPayload, JobQueue, Lane, MemoryBroker,
    WebhookJob, WorkerConfig, WorkerHandle, WorkerPool,
};
#[cfg(feature = "redis")]
pub use jobs::RedisBroker;
pub use orchestrator::{
    FundWalletRequest, FundWalletResponse, PaymentDetails, PaymentOrchestrator, PaymentStatus,
    PayoutRequest, PayoutResponse, Providers, RequestStatus, SwapDirection, SwapRequest,
    SwapResponse,
};

/// Orchestrator, dispatcher and queue sharing one store
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<dyn PaymentStore>,
    pub queue: JobQueue,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub dispatcher: Arc<WebhookDispatcher>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        providers: Providers,
        queue: JobQueue,
        verifier: WebhookVerifier,
    ) -> Self {
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            store.clone(),
            providers,
            queue.clone(),
        ));
        let dispatcher = Arc::new(WebhookDispatcher::new(
            store.clone(),
            orchestrator.clone(),
            verifier,
            queue.clone(),
        ));
        Self {
            store,
            queue,
            orchestrator,
            dispatcher,
        }
    }

    pub fn job_handler(&self) -> Arc<PipelineJobs> {
        Arc::new(PipelineJobs::new(
            self.orchestrator.clone(),
            self.dispatcher.clone(),
        ))
    }

    /// Worker pool over the queue's broker; `None` in degraded mode
    pub fn workers(&self, config: WorkerConfig) -> Option<WorkerPool> {
        let broker = self.queue.broker()?;
        Some(WorkerPool::new(broker, self.job_handler()).with_config(config))
    }
}
