//! Deposit approval workflow
//!
//! A top-up request is a `deposit` ledger entry that stays open until a
//! reviewer resolves it:
//!
//! ```text
//! submit ──▶ pending (member assigned) ──▶ approved | rejected
//!        └─▶ assigned_to_leader        ──▶ approved | rejected
//! ```
//!
//! The reviewing member is picked at submission time and keeps that
//! authority until the entry is resolved, even if their balance later drops
//! below the review threshold.
use super::account::{Role, UserAccount};
use super::context::WalletContext;
use super::error::{EntityKind, StoreError, WalletError, WalletResult};
use super::ledger::{EntryStatus, EntryType, LedgerEntry, LedgerUpdate};
use super::notify::{EventType, Payload};
use super::types::Money;
use super::utils;

/// Outcome of looking for a member to review a deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewerLookup {
    Assigned(UserAccount),
    NoEligibleReviewer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositApproval {
    pub deposit: LedgerEntry,
    /// Reward credited to the reviewing member; leaders are not rewarded.
    pub reward: Option<LedgerEntry>,
}

pub struct DepositWorkflow {
    ctx: WalletContext,
}

impl DepositWorkflow {
    pub fn new(ctx: WalletContext) -> Self {
        Self { ctx }
    }

    /// Records a top-up request and routes it to a member of the
    /// requester's city, or to the leaders when no member qualifies.
    pub fn submit(
        &self,
        requester_id: &str,
        amount: Money,
        payment_proof_ref: &str,
    ) -> WalletResult<LedgerEntry> {
        if !amount.is_positive() {
            return Err(WalletError::InvalidAmount(amount));
        }
        let requester = self.ctx.engine.load_user(requester_id)?;

        let id = utils::new_entry_id()
            .map_err(|e| WalletError::StoreUnavailable(format!("could not mint entry id: {e}")))?;
        let mut entry = LedgerEntry::pending(
            id,
            requester.id.clone(),
            EntryType::Deposit,
            amount,
            requester.wallet_balance,
            None,
        );
        entry.city_id = Some(requester.city_id.clone());
        entry.payment_proof_ref = Some(payment_proof_ref.to_string());

        let lookup = self.find_reviewer(&requester)?;
        match &lookup {
            ReviewerLookup::Assigned(member) => {
                entry.assigned_member_id = Some(member.id.clone());
            }
            ReviewerLookup::NoEligibleReviewer => {
                entry.status = EntryStatus::AssignedToLeader;
            }
        }

        let entry = self
            .ctx
            .engine
            .with_retry("insert_deposit", || self.ctx.ledger.insert(entry.clone()))
            .map_err(|e| WalletError::from_store(e, EntityKind::Deposit))?;

        tracing::info!(
            entry_id = %entry.id,
            requester_id,
            amount = %amount,
            status = entry.status.as_str(),
            reviewer = entry.assigned_member_id.as_deref().unwrap_or("leaders"),
            "deposit submitted"
        );

        let payload = Payload::new()
            .with("entry_id", &entry.id)
            .with_amount("amount", amount);
        self.ctx
            .notify(requester_id, EventType::DepositSubmitted, payload.clone());

        match lookup {
            ReviewerLookup::Assigned(member) => {
                self.ctx.notify(
                    &member.id,
                    EventType::DepositAssigned,
                    payload.with("requester_id", requester_id),
                );
            }
            ReviewerLookup::NoEligibleReviewer => {
                self.notify_leaders(&requester.city_id, payload.with("requester_id", requester_id));
            }
        }

        Ok(entry)
    }

    /// Picks the richest qualifying member of the requester's city, ties
    /// broken by id so the choice is stable.
    pub fn find_reviewer(&self, requester: &UserAccount) -> WalletResult<ReviewerLookup> {
        let members = self
            .ctx
            .engine
            .with_retry("find_members", || {
                self.ctx
                    .users
                    .find_by_city_and_role(&requester.city_id, Role::Member)
            })
            .map_err(WalletError::from)?;

        let min_balance = self.ctx.config.member_min_balance;
        let reviewer = members
            .into_iter()
            .filter(|m| m.id != requester.id && m.wallet_balance >= min_balance)
            .max_by(|a, b| {
                a.wallet_balance
                    .cmp(&b.wallet_balance)
                    .then_with(|| b.id.cmp(&a.id))
            });

        Ok(match reviewer {
            Some(member) => ReviewerLookup::Assigned(member),
            None => ReviewerLookup::NoEligibleReviewer,
        })
    }

    /// Credits the requester. A member reviewer also receives the approval
    /// reward as a separate credit.
    pub fn approve(&self, entry_id: &str, reviewer_id: &str) -> WalletResult<DepositApproval> {
        self.ctx.engine.with_entity_lock(entry_id, || {
            let entry = self.load_open_deposit(entry_id)?;
            self.authorize(&entry, reviewer_id)?;

            let deposit = self.ctx.engine.settle_credit(&entry, reviewer_id)?;
            tracing::info!(entry_id, reviewer_id, "deposit approved");
            self.ctx.notify(
                &deposit.user_id,
                EventType::DepositApproved,
                Payload::new()
                    .with("entry_id", entry_id)
                    .with_amount("amount", deposit.amount)
                    .with_amount("balance", deposit.balance_after),
            );

            let reward = match entry.status {
                EntryStatus::Pending => self.reward_member(&deposit, reviewer_id),
                _ => None,
            };

            Ok(DepositApproval { deposit, reward })
        })
    }

    /// Closes the request without touching any balance.
    pub fn reject(&self, entry_id: &str, reviewer_id: &str, reason: &str) -> WalletResult<LedgerEntry> {
        self.ctx.engine.with_entity_lock(entry_id, || {
            let entry = self.load_open_deposit(entry_id)?;
            self.authorize(&entry, reviewer_id)?;
            // the credit already reached the wallet; approving again finishes it
            if self.ctx.engine.has_unsettled(&entry.user_id, entry_id)? {
                return Err(WalletError::already_resolved(EntityKind::Deposit, entry_id));
            }

            let update = LedgerUpdate::new()
                .expect_status(entry.status)
                .set_status(EntryStatus::Rejected)
                .set_reviewer(reviewer_id)
                .set_note(reason);

            let rejected = self
                .ctx
                .engine
                .with_retry("reject_deposit", || self.ctx.ledger.update(entry_id, &update))
                .map_err(|err| match err {
                    StoreError::Conflict(id) => WalletError::already_resolved(EntityKind::Deposit, id),
                    other => WalletError::from_store(other, EntityKind::Deposit),
                })?;

            tracing::info!(entry_id, reviewer_id, reason, "deposit rejected");
            self.ctx.notify(
                &rejected.user_id,
                EventType::DepositRejected,
                Payload::new()
                    .with("entry_id", entry_id)
                    .with_amount("amount", rejected.amount)
                    .with("reason", reason),
            );

            Ok(rejected)
        })
    }

    /// Open deposits `reviewer_id` may resolve: the ones assigned to a
    /// member, or the escalated ones of a leader's city.
    pub fn pending_for_reviewer(&self, reviewer_id: &str) -> WalletResult<Vec<LedgerEntry>> {
        let reviewer = self.ctx.engine.load_user(reviewer_id)?;
        let open = self
            .ctx
            .engine
            .with_retry("find_pending_deposits", || {
                self.ctx
                    .ledger
                    .find_pending_by_city(&reviewer.city_id, EntryType::Deposit)
            })
            .map_err(WalletError::from)?;

        match reviewer.role {
            Role::Member => Ok(open
                .into_iter()
                .filter(|e| {
                    e.status == EntryStatus::Pending
                        && e.assigned_member_id.as_deref() == Some(reviewer_id)
                })
                .collect()),
            Role::Leader => Ok(open
                .into_iter()
                .filter(|e| e.status == EntryStatus::AssignedToLeader)
                .collect()),
            _ => Err(WalletError::unauthorized(reviewer_id, "review deposits")),
        }
    }

    fn load_open_deposit(&self, entry_id: &str) -> WalletResult<LedgerEntry> {
        let entry = self
            .ctx
            .engine
            .load_entry(entry_id)
            .map_err(|err| match err {
                WalletError::NotFound { .. } => WalletError::not_found(EntityKind::Deposit, entry_id),
                other => other,
            })?;

        if entry.entry_type != EntryType::Deposit {
            return Err(WalletError::not_found(EntityKind::Deposit, entry_id));
        }
        if !entry.is_open() {
            return Err(WalletError::already_resolved(EntityKind::Deposit, entry_id));
        }
        Ok(entry)
    }

    // pending entries belong to their assigned member, escalated ones to any leader
    fn authorize(&self, entry: &LedgerEntry, reviewer_id: &str) -> WalletResult<()> {
        match entry.status {
            EntryStatus::Pending => {
                if entry.assigned_member_id.as_deref() != Some(reviewer_id) {
                    return Err(WalletError::unauthorized(reviewer_id, "review this deposit"));
                }
                Ok(())
            }
            EntryStatus::AssignedToLeader => {
                if entry.user_id == reviewer_id {
                    return Err(WalletError::unauthorized(reviewer_id, "review their own deposit"));
                }
                let reviewer = self.ctx.engine.load_user(reviewer_id)?;
                if !reviewer.is_leader() {
                    return Err(WalletError::unauthorized(reviewer_id, "review escalated deposits"));
                }
                Ok(())
            }
            _ => Err(WalletError::already_resolved(EntityKind::Deposit, entry.id.clone())),
        }
    }

    // the deposit is already approved at this point, so a failed reward is
    // logged for reconciliation rather than failing the approval
    fn reward_member(&self, deposit: &LedgerEntry, member_id: &str) -> Option<LedgerEntry> {
        let reward_amount = self.ctx.config.member_approval_reward;

        match self.ctx.engine.apply_credit(
            member_id,
            reward_amount,
            EntryType::ApprovalReward,
            Some(deposit.id.clone()),
        ) {
            Ok(reward) => {
                self.ctx.notify(
                    member_id,
                    EventType::ApprovalRewarded,
                    Payload::new()
                        .with("entry_id", &deposit.id)
                        .with_amount("reward", reward_amount),
                );
                Some(reward)
            }
            Err(err) => {
                tracing::error!(
                    entry_id = %deposit.id,
                    member_id,
                    error = %err,
                    "approval reward could not be credited"
                );
                None
            }
        }
    }

    fn notify_leaders(&self, city_id: &str, payload: Payload) {
        let leaders = match self.ctx.users.find_by_city_and_role(city_id, Role::Leader) {
            Ok(leaders) => leaders,
            Err(err) => {
                tracing::warn!(city_id, error = %err, "could not look up leaders to notify");
                return;
            }
        };
        if leaders.is_empty() {
            tracing::warn!(city_id, "deposit escalated but the city has no leader");
        }
        for leader in leaders {
            self.ctx
                .notify(&leader.id, EventType::DepositEscalated, payload.clone());
        }
    }
}
