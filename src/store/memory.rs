//! In-process store backend, used for local runs and tests
use super::{LedgerStore, ReportStore, StoreResult, UserDirectory, sort_entries, sort_reports};
use crate::account::{Role, UserAccount, UserUpdate};
use crate::error::StoreError;
use crate::ledger::{EntryType, LedgerEntry, LedgerUpdate};
use crate::report::{MemberReport, ReportStatus, ReportUpdate};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<String, UserAccount>>,
    ledger: Mutex<HashMap<String, LedgerEntry>>,
    reports: Mutex<HashMap<String, MemberReport>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserDirectory for MemoryStore {
    fn get(&self, user_id: &str) -> StoreResult<UserAccount> {
        self.users
            .lock()
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))
    }

    fn insert(&self, account: UserAccount) -> StoreResult<UserAccount> {
        let mut users = self.users.lock();
        let stored = users
            .entry(account.id.clone())
            .or_insert_with(|| account.clone());
        Ok(stored.clone())
    }

    fn update(&self, user_id: &str, update: &UserUpdate) -> StoreResult<UserAccount> {
        let mut users = self.users.lock();
        let current = users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;

        let updated = update
            .apply_to(current)
            .ok_or_else(|| StoreError::Conflict(user_id.to_string()))?;
        *current = updated.clone();
        Ok(updated)
    }

    fn find_by_city_and_role(&self, city_id: &str, role: Role) -> StoreResult<Vec<UserAccount>> {
        Ok(self
            .users
            .lock()
            .values()
            .filter(|u| u.city_id == city_id && u.role == role)
            .cloned()
            .collect())
    }

    fn find_by_role(&self, role: Role) -> StoreResult<Vec<UserAccount>> {
        Ok(self
            .users
            .lock()
            .values()
            .filter(|u| u.role == role)
            .cloned()
            .collect())
    }
}

impl LedgerStore for MemoryStore {
    fn insert(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry> {
        let mut ledger = self.ledger.lock();
        let stored = ledger.entry(entry.id.clone()).or_insert_with(|| entry.clone());
        Ok(stored.clone())
    }

    fn get(&self, entry_id: &str) -> StoreResult<LedgerEntry> {
        self.ledger
            .lock()
            .get(entry_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))
    }

    fn update(&self, entry_id: &str, update: &LedgerUpdate) -> StoreResult<LedgerEntry> {
        let mut ledger = self.ledger.lock();
        let current = ledger
            .get_mut(entry_id)
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))?;

        let updated = update
            .apply_to(current)
            .ok_or_else(|| StoreError::Conflict(entry_id.to_string()))?;
        *current = updated.clone();
        Ok(updated)
    }

    fn find_pending_by_city(
        &self,
        city_id: &str,
        entry_type: EntryType,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .ledger
            .lock()
            .values()
            .filter(|e| {
                e.is_open() && e.entry_type == entry_type && e.city_id.as_deref() == Some(city_id)
            })
            .cloned()
            .collect();
        sort_entries(&mut entries);
        Ok(entries)
    }

    fn find_by_user(&self, user_id: &str) -> StoreResult<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .ledger
            .lock()
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        sort_entries(&mut entries);
        Ok(entries)
    }
}

impl ReportStore for MemoryStore {
    fn insert(&self, report: MemberReport) -> StoreResult<MemberReport> {
        let mut reports = self.reports.lock();
        let stored = reports
            .entry(report.id.clone())
            .or_insert_with(|| report.clone());
        Ok(stored.clone())
    }

    fn get(&self, report_id: &str) -> StoreResult<MemberReport> {
        self.reports
            .lock()
            .get(report_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(report_id.to_string()))
    }

    fn update(&self, report_id: &str, update: &ReportUpdate) -> StoreResult<MemberReport> {
        let mut reports = self.reports.lock();
        let current = reports
            .get_mut(report_id)
            .ok_or_else(|| StoreError::NotFound(report_id.to_string()))?;

        let updated = update
            .apply_to(current)
            .ok_or_else(|| StoreError::Conflict(report_id.to_string()))?;
        *current = updated.clone();
        Ok(updated)
    }

    fn find_by_status(&self, status: ReportStatus) -> StoreResult<Vec<MemberReport>> {
        let mut found: Vec<MemberReport> = self
            .reports
            .lock()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        sort_reports(&mut found);
        Ok(found)
    }

    fn find_by_reported(&self, member_id: &str) -> StoreResult<Vec<MemberReport>> {
        let mut found: Vec<MemberReport> = self
            .reports
            .lock()
            .values()
            .filter(|r| r.reported_member_id == member_id)
            .cloned()
            .collect();
        sort_reports(&mut found);
        Ok(found)
    }
}
