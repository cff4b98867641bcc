//! Role promotion workflow
//!
//! ```text
//! normal ──promote (leader, balance >= member_min_balance)──▶ member
//! normal ──activate (pays activation cost)─────────────────▶ ex_member
//! member | ex_member ──demote (leader)─────────────────────▶ normal
//! ex_member ──renewal fails (monthly fee unaffordable)─────▶ normal
//! ```
//!
//! Leaders are seeded administratively and never assigned here.
use super::account::{Role, UserAccount, UserUpdate};
use super::context::WalletContext;
use super::error::{EntityKind, WalletError, WalletResult};
use super::ledger::{EntryType, LedgerEntry};
use super::notify::{EventType, Payload};
use super::types::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// The account is not an ex_member, nothing to renew
    NotSubscribed,
    NotDue { due: TimeStamp<Utc> },
    Renewed {
        entry: LedgerEntry,
        next_due: TimeStamp<Utc>,
    },
    /// The fee was unaffordable and the account went back to normal
    Expired,
}

/// Summary of one renewal sweep.
#[derive(Debug, Default)]
pub struct RenewalReport {
    pub renewed: Vec<String>,
    pub expired: Vec<String>,
    pub not_due: usize,
    pub failed: Vec<(String, WalletError)>,
}

pub struct RoleWorkflow {
    ctx: WalletContext,
}

impl RoleWorkflow {
    pub fn new(ctx: WalletContext) -> Self {
        Self { ctx }
    }

    /// Grants the member role. Nothing is debited; the user only needs to
    /// hold `member_min_balance`.
    pub fn promote_to_member(&self, actor_id: &str, user_id: &str) -> WalletResult<UserAccount> {
        self.require_leader(actor_id, "promote members")?;

        let promoted = self.ctx.engine.with_user_lock(user_id, || -> WalletResult<UserAccount> {
            let account = self.ctx.engine.load_user(user_id)?;
            ensure_transition(&account, Role::Normal, Role::Member)?;

            let min_balance = self.ctx.config.member_min_balance;
            if account.wallet_balance < min_balance {
                return Err(WalletError::InsufficientBalance {
                    user_id: user_id.to_string(),
                    required: min_balance,
                    available: account.wallet_balance,
                });
            }

            let update = UserUpdate::new()
                .expect_balance(account.wallet_balance)
                .set_role(Role::Member);
            self.write_user(user_id, &update)
        })?;

        tracing::info!(user_id, actor_id, "promoted to member");
        self.ctx.notify(
            user_id,
            EventType::MemberPromoted,
            Payload::new().with("promoted_by", actor_id),
        );
        Ok(promoted)
    }

    /// Self-service ex_member subscription; debits the activation cost.
    pub fn activate_ex_member(&self, user_id: &str) -> WalletResult<LedgerEntry> {
        self.activate(user_id, None)
    }

    /// A leader subscribes `user_id`; the user still pays the activation cost.
    pub fn grant_ex_member(&self, actor_id: &str, user_id: &str) -> WalletResult<LedgerEntry> {
        self.require_leader(actor_id, "grant the ex_member role")?;
        self.activate(user_id, Some(actor_id))
    }

    /// Returns a member or ex_member to normal. No balance change.
    pub fn demote_to_normal(
        &self,
        actor_id: &str,
        user_id: &str,
        reason: &str,
    ) -> WalletResult<UserAccount> {
        self.require_leader(actor_id, "demote users")?;

        let (previous, demoted) = self.ctx.engine.with_user_lock(user_id, || {
            let account = self.ctx.engine.load_user(user_id)?;
            if !matches!(account.role, Role::Member | Role::ExMember) {
                return Err(WalletError::InvalidTransition {
                    user_id: user_id.to_string(),
                    from: account.role,
                    to: Role::Normal,
                });
            }

            let update = UserUpdate::new()
                .set_role(Role::Normal)
                .set_next_payment_due(None);
            Ok::<_, WalletError>((account.role, self.write_user(user_id, &update)?))
        })?;

        tracing::info!(user_id, actor_id, from = %previous, reason, "demoted to normal");
        self.ctx.notify(
            user_id,
            EventType::RoleDemoted,
            Payload::new()
                .with("from", previous)
                .with("demoted_by", actor_id)
                .with("reason", reason),
        );
        Ok(demoted)
    }

    /// Charges the monthly fee if the subscription is due at `now`.
    ///
    /// The due check, the debit and the due date advance happen under the
    /// user's lock and in one guarded write, so running this twice for the
    /// same due date charges once.
    pub fn renew_ex_member(&self, user_id: &str, now: &TimeStamp<Utc>) -> WalletResult<RenewalOutcome> {
        let outcome = self.ctx.engine.with_user_lock(user_id, || -> WalletResult<RenewalOutcome> {
            let account = self.ctx.engine.load_user(user_id)?;
            if account.role != Role::ExMember {
                return Ok(RenewalOutcome::NotSubscribed);
            }

            // an ex_member without a due date is treated as due
            let due = account
                .ex_member_next_payment_due
                .clone()
                .unwrap_or_else(|| now.clone());
            if due > *now {
                return Ok(RenewalOutcome::NotDue { due });
            }

            let next_due = due.plus_one_month();
            let advance = UserUpdate::new().set_next_payment_due(Some(next_due.clone()));
            match self.ctx.engine.debit_locked(
                user_id,
                self.ctx.config.ex_member_monthly_fee,
                EntryType::ExMemberSubscription,
                None,
                advance,
            ) {
                Ok(entry) => Ok(RenewalOutcome::Renewed { entry, next_due }),
                Err(WalletError::InsufficientBalance { available, .. }) => {
                    let lapse = UserUpdate::new()
                        .expect_balance(available)
                        .set_role(Role::Normal)
                        .set_next_payment_due(None);
                    self.write_user(user_id, &lapse)?;
                    Ok(RenewalOutcome::Expired)
                }
                Err(err) => Err(err),
            }
        })?;

        match &outcome {
            RenewalOutcome::Renewed { entry, next_due } => {
                tracing::info!(user_id, entry_id = %entry.id, next_due = %next_due, "subscription renewed");
                self.ctx.notify(
                    user_id,
                    EventType::SubscriptionRenewed,
                    Payload::new()
                        .with_amount("fee", self.ctx.config.ex_member_monthly_fee)
                        .with("next_due", next_due),
                );
            }
            RenewalOutcome::Expired => {
                tracing::info!(user_id, "subscription expired, back to normal");
                self.ctx.notify(
                    user_id,
                    EventType::SubscriptionExpired,
                    Payload::new().with_amount("fee", self.ctx.config.ex_member_monthly_fee),
                );
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Runs [`renew_ex_member`](Self::renew_ex_member) for every ex_member.
    /// Meant to be triggered by an external periodic job.
    pub fn run_due_renewals(&self, now: &TimeStamp<Utc>) -> WalletResult<RenewalReport> {
        let subscribers = self
            .ctx
            .engine
            .with_retry("find_ex_members", || self.ctx.users.find_by_role(Role::ExMember))
            .map_err(WalletError::from)?;

        let mut report = RenewalReport::default();
        for account in subscribers {
            match self.renew_ex_member(&account.id, now) {
                Ok(RenewalOutcome::Renewed { .. }) => report.renewed.push(account.id),
                Ok(RenewalOutcome::Expired) => report.expired.push(account.id),
                Ok(_) => report.not_due += 1,
                Err(err) => {
                    tracing::warn!(user_id = %account.id, error = %err, "renewal failed");
                    report.failed.push((account.id, err));
                }
            }
        }
        Ok(report)
    }

    fn activate(&self, user_id: &str, granted_by: Option<&str>) -> WalletResult<LedgerEntry> {
        let cost = self.ctx.config.ex_member_activation_cost;

        let (entry, due) = self.ctx.engine.with_user_lock(user_id, || {
            let account = self.ctx.engine.load_user(user_id)?;
            ensure_transition(&account, Role::Normal, Role::ExMember)?;

            let due = TimeStamp::new().plus_one_month();
            let subscribe = UserUpdate::new()
                .set_role(Role::ExMember)
                .set_next_payment_due(Some(due.clone()));
            let entry = self.ctx.engine.debit_locked(
                user_id,
                cost,
                EntryType::ExMemberSubscription,
                None,
                subscribe,
            )?;
            Ok::<_, WalletError>((entry, due))
        })?;

        tracing::info!(user_id, entry_id = %entry.id, next_due = %due, "ex_member activated");
        let mut payload = Payload::new()
            .with_amount("cost", cost)
            .with("next_due", &due);
        if let Some(actor) = granted_by {
            payload = payload.with("granted_by", actor);
        }
        self.ctx.notify(user_id, EventType::ExMemberActivated, payload);
        Ok(entry)
    }

    fn require_leader(&self, actor_id: &str, action: &str) -> WalletResult<()> {
        let actor = self.ctx.engine.load_user(actor_id)?;
        if !actor.is_leader() {
            return Err(WalletError::unauthorized(actor_id, action));
        }
        Ok(())
    }

    fn write_user(&self, user_id: &str, update: &UserUpdate) -> WalletResult<UserAccount> {
        self.ctx
            .engine
            .with_retry("update_user", || self.ctx.users.update(user_id, update))
            .map_err(|e| WalletError::from_store(e, EntityKind::User))
    }
}

fn ensure_transition(account: &UserAccount, from: Role, to: Role) -> WalletResult<()> {
    if account.role != from {
        return Err(WalletError::InvalidTransition {
            user_id: account.id.clone(),
            from: account.role,
            to,
        });
    }
    Ok(())
}
