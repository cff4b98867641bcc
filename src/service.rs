//! Service layer API over the wallet workflows
use super::account::{Role, UserAccount};
use super::config::WalletConfig;
use super::context::WalletContext;
use super::deposit::DepositWorkflow;
use super::dispute::DisputeWorkflow;
use super::engine::BalanceEngine;
use super::error::{EntityKind, WalletError, WalletResult};
use super::ledger::LedgerEntry;
use super::notify::NotificationEmitter;
use super::posts::PostPayments;
use super::role::RoleWorkflow;
use super::store::{LedgerStore, MemoryStore, ReportStore, SledStore, UserDirectory};
use super::utils;
use std::sync::Arc;

pub struct WalletService {
    ctx: WalletContext,
    deposits: DepositWorkflow,
    roles: RoleWorkflow,
    disputes: DisputeWorkflow,
    posts: PostPayments,
}

impl WalletService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        ledger: Arc<dyn LedgerStore>,
        reports: Arc<dyn ReportStore>,
        config: WalletConfig,
        emitter: Arc<dyn NotificationEmitter>,
    ) -> Self {
        let ctx = WalletContext::new(users, ledger, reports, config, emitter);

        Self {
            deposits: DepositWorkflow::new(ctx.clone()),
            roles: RoleWorkflow::new(ctx.clone()),
            disputes: DisputeWorkflow::new(ctx.clone()),
            posts: PostPayments::new(ctx.clone()),
            ctx,
        }
    }

    /// Backed by the local in-memory store.
    pub fn in_memory(config: WalletConfig, emitter: Arc<dyn NotificationEmitter>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store.clone(), store, config, emitter)
    }

    /// Backed by sled; users, ledger and reports each get their own tree.
    pub fn open_sled(
        instance: Arc<sled::Db>,
        config: WalletConfig,
        emitter: Arc<dyn NotificationEmitter>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(SledStore::open(&instance)?);
        Ok(Self::new(store.clone(), store.clone(), store, config, emitter))
    }

    /// Creates a normal account with the configured signup bonus and free
    /// post allowance.
    pub fn register_user(&self, display_name: &str, city_id: &str) -> WalletResult<UserAccount> {
        let id = utils::new_user_id()
            .map_err(|e| WalletError::StoreUnavailable(format!("could not mint user id: {e}")))?;
        let account = UserAccount::new(
            id,
            display_name.to_string(),
            city_id.to_string(),
            self.ctx.config.signup_bonus,
            self.ctx.config.initial_free_posts,
        );
        let account = self.insert_account(account)?;

        tracing::info!(user_id = %account.id, city_id, "user registered");
        Ok(account)
    }

    /// Seeds a leader account. Leaders are administrative and cannot be
    /// reached through the role workflow.
    pub fn register_leader(&self, display_name: &str, city_id: &str) -> WalletResult<UserAccount> {
        let id = utils::new_user_id()
            .map_err(|e| WalletError::StoreUnavailable(format!("could not mint user id: {e}")))?;
        let mut account = UserAccount::new(
            id,
            display_name.to_string(),
            city_id.to_string(),
            Default::default(),
            self.ctx.config.initial_free_posts,
        );
        account.role = Role::Leader;
        let account = self.insert_account(account)?;

        tracing::info!(user_id = %account.id, city_id, "leader registered");
        Ok(account)
    }

    /// Imports an existing account as-is, e.g. when migrating users from
    /// another backend.
    pub fn import_account(&self, account: UserAccount) -> WalletResult<UserAccount> {
        if account.wallet_balance.is_negative() {
            return Err(WalletError::InvalidAmount(account.wallet_balance));
        }
        self.insert_account(account)
    }

    pub fn account(&self, user_id: &str) -> WalletResult<UserAccount> {
        self.ctx.engine.load_user(user_id)
    }

    pub fn engine(&self) -> &BalanceEngine {
        &self.ctx.engine
    }

    pub fn deposits(&self) -> &DepositWorkflow {
        &self.deposits
    }

    pub fn roles(&self) -> &RoleWorkflow {
        &self.roles
    }

    pub fn disputes(&self) -> &DisputeWorkflow {
        &self.disputes
    }

    pub fn posts(&self) -> &PostPayments {
        &self.posts
    }

    pub fn config(&self) -> &WalletConfig {
        &self.ctx.config
    }

    /// Logs the ledger of `user_id` in order, each entry with the head of its
    /// content hash, and returns it.
    pub fn view_history(&self, user_id: &str) -> WalletResult<Vec<LedgerEntry>> {
        let history = self.ctx.engine.history(user_id)?;

        for (idx, entry) in history.iter().enumerate() {
            let (hash, _) = entry.build()?;
            tracing::info!(
                "{}: {} {} {} {} [{} -> {}] {}",
                idx,
                &hash[..12],
                entry.created_at,
                entry.entry_type,
                entry.amount,
                entry.balance_before,
                entry.balance_after,
                entry.status
            );
        }
        Ok(history)
    }

    fn insert_account(&self, account: UserAccount) -> WalletResult<UserAccount> {
        self.ctx
            .engine
            .with_retry("insert_user", || self.ctx.users.insert(account.clone()))
            .map_err(|e| WalletError::from_store(e, EntityKind::User))
    }
}
