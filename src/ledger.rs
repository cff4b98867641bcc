//! Wallet transactions recorded in the ledger store
use super::error::StoreError;
use super::types::{Money, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    #[n(0)]
    Deposit,
    #[n(1)]
    PostPayment,
    #[n(2)]
    ApprovalReward,
    #[n(3)]
    ReportPenalty,
    #[n(4)]
    ExMemberSubscription,
    #[n(5)]
    Refund,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    AssignedToLeader,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    #[n(0)]
    pub id: String, // bech32 "ltx_" id, also the idempotency key
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub entry_type: EntryType,
    #[n(3)]
    pub amount: Money, // positive = credit, negative = debit
    #[n(4)]
    pub balance_before: Money,
    #[n(5)]
    pub balance_after: Money, // equals balance_before until approved
    #[n(6)]
    pub status: EntryStatus,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub related_entity_id: Option<String>,
    #[n(9)]
    pub city_id: Option<String>,
    #[n(10)]
    pub assigned_member_id: Option<String>,
    #[n(11)]
    pub payment_proof_ref: Option<String>,
    #[n(12)]
    pub reviewed_by: Option<String>,
    #[n(13)]
    pub reviewed_at: Option<TimeStamp<Utc>>,
    #[n(14)]
    pub note: Option<String>,
}

/// Partial update of a [`LedgerEntry`], guarded by the status it was read in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerUpdate {
    pub expected_status: Option<EntryStatus>,
    pub status: Option<EntryStatus>,
    pub amount: Option<Money>,
    pub balance_before: Option<Money>,
    pub balance_after: Option<Money>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<TimeStamp<Utc>>,
    pub note: Option<String>,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Deposit => "deposit",
            EntryType::PostPayment => "post_payment",
            EntryType::ApprovalReward => "approval_reward",
            EntryType::ReportPenalty => "report_penalty",
            EntryType::ExMemberSubscription => "ex_member_subscription",
            EntryType::Refund => "refund",
        }
    }
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Approved => "approved",
            EntryStatus::Rejected => "rejected",
            EntryStatus::AssignedToLeader => "assigned_to_leader",
        }
    }
    /// Approved and rejected entries are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Approved | EntryStatus::Rejected)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LedgerEntry {
    /// A pending entry whose `balance_after` is a placeholder equal to
    /// `balance_before`.
    pub fn pending(
        id: String,
        user_id: String,
        entry_type: EntryType,
        amount: Money,
        balance_before: Money,
        related_entity_id: Option<String>,
    ) -> Self {
        Self {
            id,
            user_id,
            entry_type,
            amount,
            balance_before,
            balance_after: balance_before,
            status: EntryStatus::Pending,
            created_at: TimeStamp::new(),
            related_entity_id,
            city_id: None,
            assigned_member_id: None,
            payment_proof_ref: None,
            reviewed_by: None,
            reviewed_at: None,
            note: None,
        }
    }
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
    pub fn is_credit(&self) -> bool {
        self.amount.is_positive()
    }
    /// `balance_after == balance_before + amount` for approved entries,
    /// `balance_after == balance_before` otherwise.
    pub fn is_balanced(&self) -> bool {
        match self.status {
            EntryStatus::Approved => self.balance_after == self.balance_before + self.amount,
            _ => self.balance_after == self.balance_before,
        }
    }
    // returns a hash of the entry and its contents serialised into cbor
    pub fn build(&self) -> Result<(String, Vec<u8>), StoreError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

impl LedgerUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn expect_status(mut self, status: EntryStatus) -> Self {
        self.expected_status = Some(status);
        self
    }
    pub fn set_status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn set_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }
    pub fn set_balances(mut self, before: Money, after: Money) -> Self {
        self.balance_before = Some(before);
        self.balance_after = Some(after);
        self
    }
    pub fn set_reviewer(mut self, reviewer_id: &str) -> Self {
        self.reviewed_by = Some(reviewer_id.to_string());
        self.reviewed_at = Some(TimeStamp::new());
        self
    }
    pub fn set_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
    /// Checks the status guard against `entry` and returns the updated copy.
    /// Terminal entries never change.
    pub fn apply_to(&self, entry: &LedgerEntry) -> Option<LedgerEntry> {
        if entry.status.is_terminal() {
            return None;
        }
        if let Some(expected) = self.expected_status {
            if entry.status != expected {
                return None;
            }
        }

        let mut updated = entry.clone();
        if let Some(status) = self.status {
            updated.status = status;
        }
        if let Some(amount) = self.amount {
            updated.amount = amount;
        }
        if let Some(before) = self.balance_before {
            updated.balance_before = before;
        }
        if let Some(after) = self.balance_after {
            updated.balance_after = after;
        }
        if let Some(reviewer) = &self.reviewed_by {
            updated.reviewed_by = Some(reviewer.clone());
        }
        if let Some(at) = &self.reviewed_at {
            updated.reviewed_at = Some(at.clone());
        }
        if let Some(note) = &self.note {
            updated.note = Some(note.clone());
        }
        Some(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_entries_refuse_updates() {
        let mut entry = LedgerEntry::pending(
            "ltx_1".into(),
            "user_1".into(),
            EntryType::Deposit,
            Money::mru(100),
            Money::ZERO,
            None,
        );
        entry.status = EntryStatus::Rejected;

        let update = LedgerUpdate::new().set_status(EntryStatus::Approved);
        assert!(update.apply_to(&entry).is_none());
    }

    #[test]
    fn status_guard_must_match() {
        let entry = LedgerEntry::pending(
            "ltx_2".into(),
            "user_1".into(),
            EntryType::Deposit,
            Money::mru(100),
            Money::ZERO,
            None,
        );

        let stale = LedgerUpdate::new()
            .expect_status(EntryStatus::AssignedToLeader)
            .set_status(EntryStatus::Approved);
        assert!(stale.apply_to(&entry).is_none());

        let fresh = LedgerUpdate::new()
            .expect_status(EntryStatus::Pending)
            .set_status(EntryStatus::Approved)
            .set_balances(Money::ZERO, Money::mru(100));
        let approved = fresh.apply_to(&entry).unwrap();
        assert!(approved.is_balanced());
    }

    #[test]
    fn hash_follows_content() {
        let entry = LedgerEntry::pending(
            "ltx_3".into(),
            "user_1".into(),
            EntryType::PostPayment,
            -Money::mru(50),
            Money::mru(80),
            Some("post_1".into()),
        );
        let (hash, cbor) = entry.build().unwrap();
        assert_eq!(hash.len(), 64);
        assert!(!cbor.is_empty());

        let mut rejected = entry.clone();
        rejected.status = EntryStatus::Rejected;
        assert_ne!(rejected.build().unwrap().0, hash);
    }
}
