//! User accounts as kept by the user directory
use super::types::{Money, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    #[n(0)]
    Normal,
    #[n(1)]
    Member,
    #[n(2)]
    ExMember,
    #[n(3)]
    Leader,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    #[n(0)]
    pub id: String, // bech32 "user_" id, immutable
    #[n(1)]
    pub display_name: String,
    #[n(2)]
    pub role: Role,
    #[n(3)]
    pub wallet_balance: Money,
    #[n(4)]
    pub free_posts_remaining: u32,
    #[n(5)]
    pub city_id: String,
    #[n(6)]
    pub ex_member_next_payment_due: Option<TimeStamp<Utc>>, // only while role is ExMember
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    /// Balance movements already written here whose ledger entry is not yet
    /// approved. Written together with the balance, so a retried commit of
    /// the same entry finishes the entry instead of moving money twice.
    #[n(8)]
    pub unsettled: Vec<UnsettledEntry>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct UnsettledEntry {
    #[n(0)]
    pub entry_id: String,
    #[n(1)]
    pub balance_before: Money,
    #[n(2)]
    pub balance_after: Money,
}

/// Partial update of a [`UserAccount`].
///
/// When `expected_balance` is set the store only applies the update if the
/// stored balance still equals it, otherwise it reports a conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub expected_balance: Option<Money>,
    pub wallet_balance: Option<Money>,
    pub role: Option<Role>,
    pub free_posts_remaining: Option<u32>,
    // Some(None) clears the due date
    pub ex_member_next_payment_due: Option<Option<TimeStamp<Utc>>>,
    pub record_unsettled: Option<UnsettledEntry>,
    pub clear_unsettled: Option<String>,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Normal => "normal",
            Role::Member => "member",
            Role::ExMember => "ex_member",
            Role::Leader => "leader",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UserAccount {
    /// A freshly registered account: role normal, seeded balance and
    /// free post allowance.
    pub fn new(
        id: String,
        display_name: String,
        city_id: String,
        signup_bonus: Money,
        free_posts: u32,
    ) -> Self {
        Self {
            id,
            display_name,
            role: Role::Normal,
            wallet_balance: signup_bonus,
            free_posts_remaining: free_posts,
            city_id,
            ex_member_next_payment_due: None,
            created_at: TimeStamp::new(),
            unsettled: Vec::new(),
        }
    }
    pub fn unsettled_for(&self, entry_id: &str) -> Option<&UnsettledEntry> {
        self.unsettled.iter().find(|u| u.entry_id == entry_id)
    }
    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
}

impl UserUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn expect_balance(mut self, balance: Money) -> Self {
        self.expected_balance = Some(balance);
        self
    }
    pub fn set_balance(mut self, balance: Money) -> Self {
        self.wallet_balance = Some(balance);
        self
    }
    pub fn set_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
    pub fn set_free_posts(mut self, remaining: u32) -> Self {
        self.free_posts_remaining = Some(remaining);
        self
    }
    pub fn set_next_payment_due(mut self, due: Option<TimeStamp<Utc>>) -> Self {
        self.ex_member_next_payment_due = Some(due);
        self
    }
    pub fn record_unsettled(mut self, unsettled: UnsettledEntry) -> Self {
        self.record_unsettled = Some(unsettled);
        self
    }
    pub fn clear_unsettled(mut self, entry_id: impl Into<String>) -> Self {
        self.clear_unsettled = Some(entry_id.into());
        self
    }
    /// Checks the guard against `account` and returns the updated copy.
    pub fn apply_to(&self, account: &UserAccount) -> Option<UserAccount> {
        if let Some(expected) = self.expected_balance {
            if account.wallet_balance != expected {
                return None;
            }
        }

        let mut updated = account.clone();
        if let Some(balance) = self.wallet_balance {
            updated.wallet_balance = balance;
        }
        if let Some(role) = self.role {
            updated.role = role;
        }
        if let Some(remaining) = self.free_posts_remaining {
            updated.free_posts_remaining = remaining;
        }
        if let Some(due) = &self.ex_member_next_payment_due {
            updated.ex_member_next_payment_due = due.clone();
        }
        if let Some(entry_id) = &self.clear_unsettled {
            updated.unsettled.retain(|u| &u.entry_id != entry_id);
        }
        if let Some(unsettled) = &self.record_unsettled {
            updated.unsettled.retain(|u| u.entry_id != unsettled.entry_id);
            updated.unsettled.push(unsettled.clone());
        }
        Some(updated)
    }
}
