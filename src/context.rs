//! Collaborators shared by every workflow
use super::config::WalletConfig;
use super::engine::{BalanceEngine, RetryPolicy};
use super::notify::{self, EventType, NotificationEmitter, Payload};
use super::store::{LedgerStore, ReportStore, UserDirectory};
use std::sync::Arc;

#[derive(Clone)]
pub struct WalletContext {
    pub users: Arc<dyn UserDirectory>,
    pub ledger: Arc<dyn LedgerStore>,
    pub reports: Arc<dyn ReportStore>,
    pub engine: Arc<BalanceEngine>,
    pub config: Arc<WalletConfig>,
    pub emitter: Arc<dyn NotificationEmitter>,
}

impl WalletContext {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        ledger: Arc<dyn LedgerStore>,
        reports: Arc<dyn ReportStore>,
        config: WalletConfig,
        emitter: Arc<dyn NotificationEmitter>,
    ) -> Self {
        let engine = BalanceEngine::new(
            users.clone(),
            ledger.clone(),
            RetryPolicy::from_config(&config),
        );

        Self {
            users,
            ledger,
            reports,
            engine: Arc::new(engine),
            config: Arc::new(config),
            emitter,
        }
    }

    pub(crate) fn notify(&self, user_id: &str, event: EventType, payload: Payload) {
        notify::emit_best_effort(self.emitter.as_ref(), user_id, event, payload);
    }
}
