//! Storage collaborators consumed by the engine
//!
//! The engine never talks to a database directly. It goes through these
//! three traits, which are implemented by [`memory::MemoryStore`] (local,
//! in-process) and [`sled_store::SledStore`] (durable). Both enforce the same
//! guards: a balance guard on user updates and a status guard on ledger and
//! report updates, so a stale writer gets [`StoreError::Conflict`] instead of
//! silently overwriting a newer record.
use super::account::{Role, UserAccount, UserUpdate};
use super::error::StoreError;
use super::ledger::{EntryType, LedgerEntry, LedgerUpdate};
use super::report::{MemberReport, ReportStatus, ReportUpdate};

pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

pub type StoreResult<T> = Result<T, StoreError>;

pub trait UserDirectory: Send + Sync {
    fn get(&self, user_id: &str) -> StoreResult<UserAccount>;
    fn insert(&self, account: UserAccount) -> StoreResult<UserAccount>;
    /// Applies `update`; fails with `Conflict` if its balance guard no
    /// longer matches.
    fn update(&self, user_id: &str, update: &UserUpdate) -> StoreResult<UserAccount>;
    fn find_by_city_and_role(&self, city_id: &str, role: Role) -> StoreResult<Vec<UserAccount>>;
    fn find_by_role(&self, role: Role) -> StoreResult<Vec<UserAccount>>;
}

pub trait LedgerStore: Send + Sync {
    /// Inserting an id that already exists replaces nothing and returns the
    /// stored entry, so resubmitting the same entry is safe.
    fn insert(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry>;
    fn get(&self, entry_id: &str) -> StoreResult<LedgerEntry>;
    /// Applies `update`; fails with `Conflict` if the entry is terminal or
    /// its status guard no longer matches.
    fn update(&self, entry_id: &str, update: &LedgerUpdate) -> StoreResult<LedgerEntry>;
    /// Open (pending or escalated) entries of `entry_type` in `city_id`.
    fn find_pending_by_city(
        &self,
        city_id: &str,
        entry_type: EntryType,
    ) -> StoreResult<Vec<LedgerEntry>>;
    /// Every entry of `user_id`, oldest first.
    fn find_by_user(&self, user_id: &str) -> StoreResult<Vec<LedgerEntry>>;
}

pub trait ReportStore: Send + Sync {
    fn insert(&self, report: MemberReport) -> StoreResult<MemberReport>;
    fn get(&self, report_id: &str) -> StoreResult<MemberReport>;
    /// Resolves a pending report; `Conflict` once it is terminal.
    fn update(&self, report_id: &str, update: &ReportUpdate) -> StoreResult<MemberReport>;
    fn find_by_status(&self, status: ReportStatus) -> StoreResult<Vec<MemberReport>>;
    fn find_by_reported(&self, member_id: &str) -> StoreResult<Vec<MemberReport>>;
}

pub(crate) fn sort_entries(entries: &mut [LedgerEntry]) {
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

pub(crate) fn sort_reports(reports: &mut [MemberReport]) {
    reports.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
