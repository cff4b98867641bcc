//! Balance engine: the only code path that changes a wallet balance
//!
//! Every credit or debit is committed in three steps:
//!
//! 1. the ledger entry is written `pending` (or an already open deposit entry
//!    is reused),
//! 2. the user record is updated with a balance guard (compare-and-swap on
//!    the balance that was read),
//! 3. the entry is flipped to `approved` with the final before/after pair.
//!
//! Step 2 also records the entry id on the user record. A retried commit of
//! the same open entry finds it there and only repeats step 3, so a failure
//! after the balance moved never moves it twice. If step 2 itself fails on a
//! store outage the entry stays `pending` for reconciliation. Debits against the same user are serialised by a per-user
//! lock, and the balance guard stops writers outside this process from
//! overdrawing as well.
use super::account::{UnsettledEntry, UserAccount, UserUpdate};
use super::config::WalletConfig;
use super::error::{EntityKind, StoreError, WalletError, WalletResult};
use super::ledger::{EntryStatus, EntryType, LedgerEntry, LedgerUpdate};
use super::store::{LedgerStore, StoreResult, UserDirectory};
use super::types::Money;
use super::utils;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// balance guard conflicts are retried this many times before giving up
const MAX_CONFLICT_RETRIES: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affordability {
    pub can_afford: bool,
    pub shortfall: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

/// Table of per-key mutexes. Slots are created on demand and dropped once
/// nobody holds or waits on them.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Credit,
    Debit,
}

struct Mutation<'a> {
    user_id: &'a str,
    direction: Direction,
    amount: Money,
    entry_type: EntryType,
    related_entity_id: Option<String>,
    extra: UserUpdate,
    open_entry: Option<LedgerEntry>,
    reviewer_id: Option<&'a str>,
}

pub struct BalanceEngine {
    users: Arc<dyn UserDirectory>,
    ledger: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
    locks: KeyedLocks,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(key.to_string()).or_default().clone()
        };

        let result = {
            let _guard = slot.lock();
            f()
        };

        let mut slots = self.slots.lock();
        // one reference in the table, one here: nobody else is waiting
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
        result
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RetryPolicy {
    pub fn from_config(config: &WalletConfig) -> Self {
        Self {
            attempts: config.store_retry_attempts,
            backoff: config.retry_backoff(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WalletConfig::default())
    }
}

impl<'a> Mutation<'a> {
    fn new(user_id: &'a str, direction: Direction, amount: Money, entry_type: EntryType) -> Self {
        Self {
            user_id,
            direction,
            amount,
            entry_type,
            related_entity_id: None,
            extra: UserUpdate::new(),
            open_entry: None,
            reviewer_id: None,
        }
    }

    /// Signed movement against `balance`; penalties are clamped so the
    /// balance never goes below zero.
    fn movement(&self, balance: Money) -> WalletResult<Money> {
        match self.direction {
            Direction::Credit => Ok(self.amount),
            Direction::Debit if self.entry_type == EntryType::ReportPenalty => {
                let collected = if balance < self.amount {
                    balance
                } else {
                    self.amount
                };
                Ok(-collected)
            }
            Direction::Debit => {
                if balance < self.amount {
                    return Err(WalletError::InsufficientBalance {
                        user_id: self.user_id.to_string(),
                        required: self.amount,
                        available: balance,
                    });
                }
                Ok(-self.amount)
            }
        }
    }
}

impl BalanceEngine {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        ledger: Arc<dyn LedgerStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            users,
            ledger,
            retry,
            locks: KeyedLocks::new(),
        }
    }

    /// Read only check of whether `user_id` can pay `amount` right now.
    pub fn check_affordability(&self, user_id: &str, amount: Money) -> WalletResult<Affordability> {
        let account = self.load_user(user_id)?;
        let balance = account.wallet_balance;

        Ok(Affordability {
            can_afford: balance >= amount,
            shortfall: amount.saturating_sub(balance),
        })
    }

    /// Credits `amount` and records one approved ledger entry. Credits are
    /// never refused for lack of funds.
    pub fn apply_credit(
        &self,
        user_id: &str,
        amount: Money,
        entry_type: EntryType,
        related_entity_id: Option<String>,
    ) -> WalletResult<LedgerEntry> {
        self.with_user_lock(user_id, || {
            self.credit_locked(user_id, amount, entry_type, related_entity_id)
        })
    }

    /// Credit for callers that already hold `user_id`'s lock.
    pub(crate) fn credit_locked(
        &self,
        user_id: &str,
        amount: Money,
        entry_type: EntryType,
        related_entity_id: Option<String>,
    ) -> WalletResult<LedgerEntry> {
        ensure_positive(amount)?;
        let mut mutation = Mutation::new(user_id, Direction::Credit, amount, entry_type);
        mutation.related_entity_id = related_entity_id;

        self.commit(mutation)
    }

    /// Debits `amount`, failing with `InsufficientBalance` when the balance
    /// does not cover it. `report_penalty` debits are clamped instead.
    pub fn apply_debit(
        &self,
        user_id: &str,
        amount: Money,
        entry_type: EntryType,
        related_entity_id: Option<String>,
    ) -> WalletResult<LedgerEntry> {
        self.apply_debit_with(user_id, amount, entry_type, related_entity_id, UserUpdate::new())
    }

    /// Same as [`apply_debit`](Self::apply_debit), committing `extra` user
    /// fields in the same guarded write as the new balance.
    pub fn apply_debit_with(
        &self,
        user_id: &str,
        amount: Money,
        entry_type: EntryType,
        related_entity_id: Option<String>,
        extra: UserUpdate,
    ) -> WalletResult<LedgerEntry> {
        self.with_user_lock(user_id, || {
            self.debit_locked(user_id, amount, entry_type, related_entity_id, extra)
        })
    }

    /// Debit for callers that already hold `user_id`'s lock through
    /// [`with_user_lock`](Self::with_user_lock).
    pub(crate) fn debit_locked(
        &self,
        user_id: &str,
        amount: Money,
        entry_type: EntryType,
        related_entity_id: Option<String>,
        extra: UserUpdate,
    ) -> WalletResult<LedgerEntry> {
        ensure_positive(amount)?;
        let mut mutation = Mutation::new(user_id, Direction::Debit, amount, entry_type);
        mutation.related_entity_id = related_entity_id;
        mutation.extra = extra;

        self.commit(mutation)
    }

    /// Debit keyed by `related_entity_id`. An earlier approved entry of the
    /// same type for that entity is returned as is, and one left pending by a
    /// failed attempt is finished, so retrying never debits twice.
    pub fn apply_debit_once(
        &self,
        user_id: &str,
        amount: Money,
        entry_type: EntryType,
        related_entity_id: &str,
    ) -> WalletResult<LedgerEntry> {
        ensure_positive(amount)?;

        self.with_user_lock(user_id, || {
            let previous = self.history(user_id)?.into_iter().find(|e| {
                e.entry_type == entry_type
                    && e.related_entity_id.as_deref() == Some(related_entity_id)
                    && e.status != EntryStatus::Rejected
            });

            let mut mutation = Mutation::new(user_id, Direction::Debit, amount, entry_type);
            mutation.related_entity_id = Some(related_entity_id.to_string());
            match previous {
                Some(entry) if entry.status == EntryStatus::Approved => {
                    tracing::info!(user_id, entry_id = %entry.id, related_entity_id, "debit already recorded");
                    Ok(entry)
                }
                Some(entry) => {
                    mutation.open_entry = Some(entry);
                    self.commit(mutation)
                }
                None => self.commit(mutation),
            }
        })
    }

    /// Whether a balance movement for `entry_id` is written on the user
    /// record but its ledger entry is not approved yet.
    pub fn has_unsettled(&self, user_id: &str, entry_id: &str) -> WalletResult<bool> {
        Ok(self.load_user(user_id)?.unsettled_for(entry_id).is_some())
    }

    /// Credits the owner of an open entry by its amount and flips that entry
    /// to approved instead of inserting a new one. Used for deposits.
    pub fn settle_credit(&self, entry: &LedgerEntry, reviewer_id: &str) -> WalletResult<LedgerEntry> {
        if !entry.is_open() {
            return Err(WalletError::already_resolved(
                EntityKind::LedgerEntry,
                entry.id.clone(),
            ));
        }
        ensure_positive(entry.amount)?;

        let mut mutation =
            Mutation::new(&entry.user_id, Direction::Credit, entry.amount, entry.entry_type);
        mutation.related_entity_id = entry.related_entity_id.clone();
        mutation.open_entry = Some(entry.clone());
        mutation.reviewer_id = Some(reviewer_id);

        self.with_user_lock(&entry.user_id, || self.commit(mutation))
    }

    /// Every ledger entry of `user_id`, oldest first.
    pub fn history(&self, user_id: &str) -> WalletResult<Vec<LedgerEntry>> {
        self.with_retry("find_by_user", || self.ledger.find_by_user(user_id))
            .map_err(|e| WalletError::from_store(e, EntityKind::User))
    }

    pub fn with_user_lock<R>(&self, user_id: &str, f: impl FnOnce() -> R) -> R {
        self.locks.with(user_id, f)
    }

    /// Serialises resolutions of one deposit or report.
    pub(crate) fn with_entity_lock<R>(&self, entity_id: &str, f: impl FnOnce() -> R) -> R {
        self.locks.with(entity_id, f)
    }

    pub(crate) fn load_user(&self, user_id: &str) -> WalletResult<UserAccount> {
        self.with_retry("get_user", || self.users.get(user_id))
            .map_err(|e| WalletError::from_store(e, EntityKind::User))
    }

    pub(crate) fn load_entry(&self, entry_id: &str) -> WalletResult<LedgerEntry> {
        self.with_retry("get_entry", || self.ledger.get(entry_id))
            .map_err(|e| WalletError::from_store(e, EntityKind::LedgerEntry))
    }

    /// Retries transient store outages with a linear backoff.
    pub(crate) fn with_retry<T>(
        &self,
        operation: &str,
        mut op: impl FnMut() -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(StoreError::Unavailable(reason)) if attempt < self.retry.attempts => {
                    attempt += 1;
                    tracing::warn!(operation, attempt, %reason, "store unavailable, retrying");
                    std::thread::sleep(self.retry.backoff * attempt);
                }
                other => return other,
            }
        }
    }

    fn commit(&self, mutation: Mutation<'_>) -> WalletResult<LedgerEntry> {
        let mut account = self.load_user(mutation.user_id)?;

        // a previous attempt already moved the balance for this entry
        if let Some(open) = &mutation.open_entry {
            if let Some(done) = account.unsettled_for(&open.id) {
                tracing::warn!(
                    user_id = mutation.user_id,
                    entry_id = %open.id,
                    "balance already committed, finishing ledger entry"
                );
                let (before, after) = (done.balance_before, done.balance_after);
                return self.settle(&mutation, open, before, after);
            }
        }

        let movement = mutation.movement(account.wallet_balance)?;
        let mut after = resulting_balance(&mutation, account.wallet_balance, movement)?;

        let intent = match &mutation.open_entry {
            Some(open) => open.clone(),
            None => self.record_intent(&mutation, movement, account.wallet_balance)?,
        };

        let mut conflicts = 0;
        let (before, after) = loop {
            let before = account.wallet_balance;
            let update = mutation
                .extra
                .clone()
                .expect_balance(before)
                .set_balance(after)
                .record_unsettled(UnsettledEntry {
                    entry_id: intent.id.clone(),
                    balance_before: before,
                    balance_after: after,
                });

            match self.with_retry("update_balance", || self.users.update(mutation.user_id, &update)) {
                Ok(_) => break (before, after),
                Err(StoreError::Conflict(_)) if conflicts < MAX_CONFLICT_RETRIES => {
                    conflicts += 1;
                    tracing::debug!(user_id = mutation.user_id, conflicts, "balance changed, re-reading");
                    account = self.load_user(mutation.user_id)?;

                    // a write reported as failed may still have landed
                    if let Some(done) = account.unsettled_for(&intent.id) {
                        break (done.balance_before, done.balance_after);
                    }
                    let retried = mutation
                        .movement(account.wallet_balance)
                        .and_then(|m| resulting_balance(&mutation, account.wallet_balance, m));
                    match retried {
                        Ok(a) => after = a,
                        Err(err) => {
                            self.abandon_intent(&mutation, &intent);
                            return Err(err);
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(
                        user_id = mutation.user_id,
                        entry_id = %intent.id,
                        error = %err,
                        "balance update failed, ledger entry left open for reconciliation"
                    );
                    return Err(WalletError::from_store(err, EntityKind::User));
                }
            }
        };

        self.settle(&mutation, &intent, before, after)
    }

    /// Flips `intent` to approved with the committed before/after pair, then
    /// drops the unsettled marker from the user record.
    fn settle(
        &self,
        mutation: &Mutation<'_>,
        intent: &LedgerEntry,
        before: Money,
        after: Money,
    ) -> WalletResult<LedgerEntry> {
        let mut flip = LedgerUpdate::new()
            .expect_status(intent.status)
            .set_status(EntryStatus::Approved)
            .set_amount(after - before)
            .set_balances(before, after);
        if let Some(reviewer) = mutation.reviewer_id {
            flip = flip.set_reviewer(reviewer);
        }

        let approved = self
            .with_retry("approve_entry", || self.ledger.update(&intent.id, &flip))
            .map_err(|err| {
                tracing::error!(
                    user_id = mutation.user_id,
                    entry_id = %intent.id,
                    error = %err,
                    "balance committed but ledger entry could not be approved"
                );
                WalletError::from_store(err, EntityKind::LedgerEntry)
            })?;

        let clear = UserUpdate::new().clear_unsettled(intent.id.clone());
        if let Err(err) = self.with_retry("clear_unsettled", || self.users.update(mutation.user_id, &clear)) {
            tracing::warn!(entry_id = %intent.id, error = %err, "could not clear unsettled marker");
        }

        tracing::info!(
            user_id = mutation.user_id,
            entry_id = %approved.id,
            entry_type = approved.entry_type.as_str(),
            amount = %approved.amount,
            balance = %approved.balance_after,
            "balance updated"
        );
        Ok(approved)
    }

    fn record_intent(
        &self,
        mutation: &Mutation<'_>,
        movement: Money,
        balance: Money,
    ) -> WalletResult<LedgerEntry> {
        let id = utils::new_entry_id()
            .map_err(|e| WalletError::StoreUnavailable(format!("could not mint entry id: {e}")))?;
        let entry = LedgerEntry::pending(
            id,
            mutation.user_id.to_string(),
            mutation.entry_type,
            movement,
            balance,
            mutation.related_entity_id.clone(),
        );

        self.with_retry("insert_entry", || self.ledger.insert(entry.clone()))
            .map_err(|e| WalletError::from_store(e, EntityKind::LedgerEntry))
    }

    // a fresh intent whose debit turned unaffordable on retry is rejected;
    // reused open entries are left untouched for their workflow
    fn abandon_intent(&self, mutation: &Mutation<'_>, intent: &LedgerEntry) {
        if mutation.open_entry.is_some() {
            return;
        }
        let reject = LedgerUpdate::new()
            .expect_status(EntryStatus::Pending)
            .set_status(EntryStatus::Rejected)
            .set_note("insufficient balance");
        if let Err(err) = self.ledger.update(&intent.id, &reject) {
            tracing::warn!(entry_id = %intent.id, error = %err, "could not reject abandoned entry");
        }
    }
}

// checked before any store write, so an overflow leaves nothing behind
fn resulting_balance(mutation: &Mutation<'_>, balance: Money, movement: Money) -> WalletResult<Money> {
    balance
        .checked_add(movement)
        .ok_or(WalletError::InvalidAmount(mutation.amount))
}

fn ensure_positive(amount: Money) -> WalletResult<()> {
    if !amount.is_positive() {
        return Err(WalletError::InvalidAmount(amount));
    }
    Ok(())
}
