//! Routes queued jobs to the orchestrator and dispatcher

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::dispatcher::WebhookDispatcher;
use crate::error::Result;
use crate::jobs::{Job, JobHandler, JobPayload};
use crate::orchestrator::PaymentOrchestrator;

pub struct PipelineJobs {
    orchestrator: Arc<PaymentOrchestrator>,
    dispatcher: Arc<WebhookDispatcher>,
}

impl PipelineJobs {
    pub const fn new(orchestrator: Arc<PaymentOrchestrator>, dispatcher: Arc<WebhookDispatcher>) -> Self {
        Self {
            orchestrator,
            dispatcher,
        }
    }
}

#[async_trait]
impl JobHandler for PipelineJobs {
    async fn handle(&self, job: &Job) -> Result<()> {
        match &job.payload {
            JobPayload::Funding(funding) => {
                let entry = self
                    .orchestrator
                    .process_funding_completion(funding.payment_intent_id)
                    .await?;
                info!(job_id = %job.id, status = entry.status.as_str(), "Funding job finished");
                Ok(())
            }
            JobPayload::Conversion(request) => {
                self.orchestrator.process_queued_swap(job.id, request).await?;
                Ok(())
            }
            JobPayload::Payout(request) => {
                self.orchestrator.process_payout(job.id, request).await?;
                Ok(())
            }
            JobPayload::Webhook(webhook) => self.dispatcher.process_event(webhook.webhook_event_id).await,
        }
    }
}
