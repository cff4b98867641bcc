//! Durable store backend on sled
//!
//! Records are CBOR encoded with minicbor and keyed by their bech32 id, one
//! tree per record kind. Guarded updates read the current bytes, apply the
//! update in memory and write back with `compare_and_swap` against the bytes
//! that were read, so a concurrent writer (in this or another process) turns
//! into a `Conflict` rather than a lost update.
use super::{LedgerStore, ReportStore, StoreResult, UserDirectory, sort_entries, sort_reports};
use crate::account::{Role, UserAccount, UserUpdate};
use crate::error::StoreError;
use crate::ledger::{EntryType, LedgerEntry, LedgerUpdate};
use crate::report::{MemberReport, ReportStatus, ReportUpdate};
use sled::{Db, Tree};

const USERS_TREE: &str = "users";
const LEDGER_TREE: &str = "ledger";
const REPORTS_TREE: &str = "reports";

pub struct SledStore {
    users: Tree,
    ledger: Tree,
    reports: Tree,
}

impl SledStore {
    pub fn open(db: &Db) -> StoreResult<Self> {
        Ok(Self {
            users: db.open_tree(USERS_TREE)?,
            ledger: db.open_tree(LEDGER_TREE)?,
            reports: db.open_tree(REPORTS_TREE)?,
        })
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.users.flush()?;
        self.ledger.flush()?;
        self.reports.flush()?;
        Ok(())
    }
}

fn decode<T>(bytes: &[u8]) -> StoreResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

fn get_record<T>(tree: &Tree, key: &str) -> StoreResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key.as_bytes())? {
        Some(bytes) => decode(&bytes),
        None => Err(StoreError::NotFound(key.to_string())),
    }
}

// insert if absent, otherwise hand back what is already stored
fn insert_record<T>(tree: &Tree, key: &str, record: T) -> StoreResult<T>
where
    T: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()>,
{
    let cbor = minicbor::to_vec(&record)?;

    match tree.compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(cbor))? {
        Ok(()) => Ok(record),
        Err(existing) => match existing.current {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::Conflict(key.to_string())),
        },
    }
}

fn guarded_update<T, F>(tree: &Tree, key: &str, apply: F) -> StoreResult<T>
where
    T: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()>,
    F: FnOnce(&T) -> Option<T>,
{
    let current_bytes = tree
        .get(key.as_bytes())?
        .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
    let current: T = decode(&current_bytes)?;

    let updated = apply(&current).ok_or_else(|| StoreError::Conflict(key.to_string()))?;
    let cbor = minicbor::to_vec(&updated)?;

    match tree.compare_and_swap(key.as_bytes(), Some(current_bytes), Some(cbor))? {
        Ok(()) => Ok(updated),
        Err(_) => Err(StoreError::Conflict(key.to_string())),
    }
}

fn scan<T, P>(tree: &Tree, keep: P) -> StoreResult<Vec<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
    P: Fn(&T) -> bool,
{
    let mut found = Vec::new();
    for item in tree.iter() {
        let (_, bytes) = item?;
        let record: T = decode(&bytes)?;
        if keep(&record) {
            found.push(record);
        }
    }
    Ok(found)
}

impl UserDirectory for SledStore {
    fn get(&self, user_id: &str) -> StoreResult<UserAccount> {
        get_record(&self.users, user_id)
    }

    fn insert(&self, account: UserAccount) -> StoreResult<UserAccount> {
        let key = account.id.clone();
        insert_record(&self.users, &key, account)
    }

    fn update(&self, user_id: &str, update: &UserUpdate) -> StoreResult<UserAccount> {
        guarded_update(&self.users, user_id, |current: &UserAccount| {
            update.apply_to(current)
        })
    }

    fn find_by_city_and_role(&self, city_id: &str, role: Role) -> StoreResult<Vec<UserAccount>> {
        scan(&self.users, |u: &UserAccount| {
            u.city_id == city_id && u.role == role
        })
    }

    fn find_by_role(&self, role: Role) -> StoreResult<Vec<UserAccount>> {
        scan(&self.users, |u: &UserAccount| u.role == role)
    }
}

impl LedgerStore for SledStore {
    fn insert(&self, entry: LedgerEntry) -> StoreResult<LedgerEntry> {
        let key = entry.id.clone();
        insert_record(&self.ledger, &key, entry)
    }

    fn get(&self, entry_id: &str) -> StoreResult<LedgerEntry> {
        get_record(&self.ledger, entry_id)
    }

    fn update(&self, entry_id: &str, update: &LedgerUpdate) -> StoreResult<LedgerEntry> {
        guarded_update(&self.ledger, entry_id, |current: &LedgerEntry| {
            update.apply_to(current)
        })
    }

    fn find_pending_by_city(
        &self,
        city_id: &str,
        entry_type: EntryType,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let mut entries = scan(&self.ledger, |e: &LedgerEntry| {
            e.is_open() && e.entry_type == entry_type && e.city_id.as_deref() == Some(city_id)
        })?;
        sort_entries(&mut entries);
        Ok(entries)
    }

    fn find_by_user(&self, user_id: &str) -> StoreResult<Vec<LedgerEntry>> {
        let mut entries = scan(&self.ledger, |e: &LedgerEntry| e.user_id == user_id)?;
        sort_entries(&mut entries);
        Ok(entries)
    }
}

impl ReportStore for SledStore {
    fn insert(&self, report: MemberReport) -> StoreResult<MemberReport> {
        let key = report.id.clone();
        insert_record(&self.reports, &key, report)
    }

    fn get(&self, report_id: &str) -> StoreResult<MemberReport> {
        get_record(&self.reports, report_id)
    }

    fn update(&self, report_id: &str, update: &ReportUpdate) -> StoreResult<MemberReport> {
        guarded_update(&self.reports, report_id, |current: &MemberReport| {
            update.apply_to(current)
        })
    }

    fn find_by_status(&self, status: ReportStatus) -> StoreResult<Vec<MemberReport>> {
        let mut found = scan(&self.reports, |r: &MemberReport| r.status == status)?;
        sort_reports(&mut found);
        Ok(found)
    }

    fn find_by_reported(&self, member_id: &str) -> StoreResult<Vec<MemberReport>> {
        let mut found = scan(&self.reports, |r: &MemberReport| {
            r.reported_member_id == member_id
        })?;
        sort_reports(&mut found);
        Ok(found)
    }
}
