//! Application State

use std::sync::Arc;

use paidin_pipeline::Pipeline;
use paidin_providers::{PaymentService, PlaidApi};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator, dispatcher and job queue
    pub pipeline: Pipeline,

    /// Bank linking
    pub plaid: Arc<dyn PlaidApi>,

    /// Invoicing backend (optional - None if not configured)
    pub invoicing: Option<Arc<dyn PaymentService>>,

    /// Token required on `/admin` routes; admin routes are closed without one
    pub admin_token: Option<Arc<str>>,
}
