//! Feature modules
//!
//! Each feature bundles its route table, its namespaced error codes, its
//! language strings and, optionally, the background queues it runs.

pub mod account;
pub mod agent;
pub mod closer;
pub mod credit_wallet;
pub mod lender;
pub mod plaid_account;
pub mod program;
pub mod resource;
pub mod session;

use async_trait::async_trait;
use axum::Router;

use crate::api::AppState;
use crate::error::ErrorCode;
use crate::queue::{Queue, QueueError};
use crate::workers::WorkerContext;

#[async_trait]
pub trait Feature: Send + Sync {
    /// Display name used in logs
    fn name(&self) -> &'static str;

    /// URL segment under `/v1`
    fn path(&self) -> &'static str;

    /// Namespace of every error key this feature registers
    fn error_prefix(&self) -> &'static str;

    fn routes(&self) -> Router<AppState>;

    fn errors(&self) -> &'static [ErrorCode];

    fn strings(&self) -> &'static [(&'static str, &'static str)];

    /// Open the queues this feature processes. Returned handles are owned by
    /// the caller, which closes them on shutdown.
    async fn register_background_work(
        &self,
        _ctx: &WorkerContext,
    ) -> Result<Vec<Queue>, QueueError> {
        Ok(Vec::new())
    }
}

/// Every feature served by the API
pub fn all_features() -> Vec<Box<dyn Feature>> {
    vec![
        Box::new(account::Accounts),
        Box::new(agent::Agents),
        Box::new(closer::Closers),
        Box::new(credit_wallet::CreditWallets),
        Box::new(lender::Lenders),
        Box::new(plaid_account::PlaidAccounts),
        Box::new(program::Programs),
        Box::new(resource::Resources),
        Box::new(session::Sessions),
    ]
}
