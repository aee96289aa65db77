//! In-process [`CertificateStore`] with fault injection.
//!
//! A transaction reads a copy of the table taken at `begin` and records its own writes.
//! `commit` applies only those writes to the shared table; `rollback` or drop discards
//! them. Like the Postgres partial unique index, at most one live latest row may exist per
//! (user, certificate): an insert or commit that would add a second one because another
//! transaction committed first fails with [`latest_conflict`]. Faults registered with
//! [`InMemoryCertificateStore::fail_once`] or [`InMemoryCertificateStore::fail_always`]
//! fire at the named step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use database::{StoreError, UnitOfWork};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

use crate::models::{NewUserCertificate, UserCertificate};
use crate::store::{CertificateStore, UNIQUE_VIOLATION, latest_conflict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    FindRecorded,
    ClearLatest,
    Insert,
    Commit,
}

struct Fault {
    error: StoreError,
    remaining: Option<u32>,
}

pub struct MemoryTransaction {
    /// Rows committed at `begin` with this transaction's writes applied.
    view: Vec<UserCertificate>,
    cleared: Vec<(Uuid, DateTime<Utc>)>,
    inserted: Vec<UserCertificate>,
}

impl MemoryTransaction {
    fn clears(&self, user_certificate_guid: Uuid) -> bool {
        self.cleared.iter().any(|(id, _)| *id == user_certificate_guid)
    }

    /// Whether adding `row` as latest would leave two live latest rows, counting rows
    /// committed by other transactions that this one has not cleared.
    fn latest_taken(&self, committed: &[UserCertificate], row: &UserCertificate) -> bool {
        let live = |r: &UserCertificate| is_live_latest(r, row.user_guid, row.certificate_guid);
        self.view.iter().any(live)
            || committed
                .iter()
                .any(|r| live(r) && !self.clears(r.user_certificate_guid))
    }
}

#[derive(Default)]
pub struct InMemoryCertificateStore {
    rows: Mutex<Vec<UserCertificate>>,
    faults: Mutex<HashMap<FaultPoint, Fault>>,
    begins: AtomicU32,
    commits: AtomicU32,
    rollbacks: AtomicU32,
}

impl InMemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call at `point` with `error`.
    pub fn fail_once(&self, point: FaultPoint, error: StoreError) {
        self.set_fault(point, error, Some(1));
    }

    /// Fail every call at `point` with `error` until [`Self::clear_faults`].
    pub fn fail_always(&self, point: FaultPoint, error: StoreError) {
        self.set_fault(point, error, None);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Committed rows.
    pub fn rows(&self) -> Vec<UserCertificate> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Committed rows currently marked latest.
    pub fn latest_rows(&self) -> Vec<UserCertificate> {
        self.rows()
            .into_iter()
            .filter(|row| row.is_latest && row.deleted_date.is_none())
            .collect()
    }

    pub fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u32 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn set_fault(&self, point: FaultPoint, error: StoreError, remaining: Option<u32>) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(point, Fault { error, remaining });
    }

    fn check(&self, point: FaultPoint) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        let Some(fault) = faults.get_mut(&point) else {
            return Ok(());
        };
        let error = fault.error.clone();
        let exhausted = match fault.remaining.as_mut() {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => false,
        };
        if exhausted {
            faults.remove(&point);
        }
        Err(error)
    }
}

fn is_live_latest(row: &UserCertificate, user_guid: Uuid, certificate_guid: Uuid) -> bool {
    row.user_guid == user_guid
        && row.certificate_guid == certificate_guid
        && row.is_latest
        && row.deleted_date.is_none()
}

#[async_trait]
impl UnitOfWork for InMemoryCertificateStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        self.check(FaultPoint::Begin)?;
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTransaction {
            view: self.rows(),
            cleared: Vec::new(),
            inserted: Vec::new(),
        })
    }

    async fn commit(&self, tx: MemoryTransaction) -> Result<(), StoreError> {
        self.check(FaultPoint::Commit)?;
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(row) = tx.inserted.iter().find(|row| {
            row.is_latest
                && rows.iter().any(|r| {
                    is_live_latest(r, row.user_guid, row.certificate_guid)
                        && !tx.clears(r.user_certificate_guid)
                })
        }) {
            return Err(latest_conflict(row.user_guid, row.certificate_guid));
        }

        for (id, at) in &tx.cleared {
            if let Some(row) = rows.iter_mut().find(|r| r.user_certificate_guid == *id) {
                row.is_latest = false;
                row.last_updated_date = *at;
            }
        }
        rows.extend(tx.inserted);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, _tx: MemoryTransaction) -> Result<(), StoreError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl CertificateStore for InMemoryCertificateStore {
    async fn find_recorded(
        &self,
        tx: &mut MemoryTransaction,
        new: &NewUserCertificate,
    ) -> Result<Option<UserCertificate>, StoreError> {
        self.check(FaultPoint::FindRecorded)?;
        Ok(tx
            .view
            .iter()
            .filter(|row| row.deleted_date.is_none() && row.records(new))
            .max_by_key(|row| (row.is_latest, row.created_date))
            .cloned())
    }

    async fn clear_latest(
        &self,
        tx: &mut MemoryTransaction,
        user_guid: Uuid,
        certificate_guid: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.check(FaultPoint::ClearLatest)?;
        let mut cleared = 0;
        for row in tx
            .view
            .iter_mut()
            .filter(|row| is_live_latest(row, user_guid, certificate_guid))
        {
            row.is_latest = false;
            row.last_updated_date = at;
            tx.cleared.push((row.user_certificate_guid, at));
            cleared += 1;
        }
        Ok(cleared)
    }

    async fn insert(
        &self,
        tx: &mut MemoryTransaction,
        row: UserCertificate,
    ) -> Result<UserCertificate, StoreError> {
        self.check(FaultPoint::Insert)?;
        let committed = self.rows();
        if tx
            .view
            .iter()
            .chain(&committed)
            .any(|r| r.user_certificate_guid == row.user_certificate_guid)
        {
            return Err(StoreError::database(UNIQUE_VIOLATION, "duplicate key value")
                .with_constraint("user_certificates_pkey"));
        }
        if row.is_latest && tx.latest_taken(&committed, &row) {
            return Err(latest_conflict(row.user_guid, row.certificate_guid));
        }
        tx.view.push(row.clone());
        tx.inserted.push(row.clone());
        Ok(row)
    }
}
