//! Session replication.
//!
//! There is no network layer: a member sees a session once a copy of it has
//! been written into that member's record. [`Propagator`] is the seam for
//! that fan-out so the record-store implementation can later be replaced by
//! a real message bus without touching the state machine.
//!
//! Writes are per member and not transactional. A failed member does not
//! undo the members that succeeded; it is reported and can be retried.

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, StoreError};
use crate::session::{Session, SessionId, UserId};
use crate::storage::RecordStore;

/// Queued copies are dropped after this many failed deliveries.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// A member whose copy could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedWrite {
    pub member: UserId,
    pub reason: String,
    /// Retrying cannot help, e.g. the member has no record.
    #[serde(default)]
    pub permanent: bool,
}

impl FailedWrite {
    fn from_store_error(member: &str, err: &StoreError) -> Self {
        Self {
            member: member.to_string(),
            reason: err.to_string(),
            permanent: matches!(err, StoreError::NotFound(_)),
        }
    }
}

/// Per-member outcome of one propagation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub session_id: SessionId,
    pub succeeded: Vec<UserId>,
    pub failed: Vec<FailedWrite>,
}

impl PropagationReport {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_members(&self) -> Vec<UserId> {
        self.failed.iter().map(|f| f.member.clone()).collect()
    }

    /// Fold another report for the same session into this one.
    pub fn merge(&mut self, other: PropagationReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }

    /// `Err(PartialPropagation)` if any member failed.
    pub fn into_result(self) -> Result<Self, SessionError> {
        if self.is_complete() {
            return Ok(self);
        }
        Err(SessionError::PartialPropagation {
            session_id: self.session_id.to_string(),
            failed: self.failed_members(),
            succeeded: self.succeeded,
        })
    }
}

/// Fans a session update out to members.
pub trait Propagator {
    fn propagate(&self, session: &Session, members: &[UserId]) -> PropagationReport;
}

/// Propagator that writes straight into each member's stored record.
#[derive(Debug, Clone)]
pub struct StorePropagator<S> {
    store: S,
}

impl<S: RecordStore> StorePropagator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn write_member(&self, session: &Session, member: &str) -> Result<bool, StoreError> {
        let mut record = self.store.get_user(member)?;
        let inserted = record.upsert_session(session.clone());
        self.store.put_user(member, &record)?;
        Ok(inserted)
    }
}

impl<S: RecordStore> Propagator for StorePropagator<S> {
    fn propagate(&self, session: &Session, members: &[UserId]) -> PropagationReport {
        let mut report = PropagationReport::new(session.session_id.clone());
        for member in members {
            match self.write_member(session, member) {
                Ok(inserted) => {
                    tracing::trace!(
                        session_id = %session.session_id,
                        member = %member,
                        inserted,
                        "session copy written"
                    );
                    report.succeeded.push(member.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        member = %member,
                        error = %e,
                        "failed to replicate session"
                    );
                    report.failed.push(FailedWrite::from_store_error(member, &e));
                }
            }
        }
        report
    }
}

/// A session copy that still has to reach one member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCopy {
    pub member: UserId,
    pub session: Session,
    /// Failed re-deliveries so far.
    #[serde(default)]
    pub attempts: u32,
}

/// Copies that still have to reach a member. A newer copy of the same
/// session for the same member replaces the queued one. Permanent failures
/// are never queued and each copy gets [`MAX_DELIVERY_ATTEMPTS`] retries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryQueue {
    pending: Vec<PendingCopy>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn members(&self) -> Vec<UserId> {
        self.pending.iter().map(|p| p.member.clone()).collect()
    }

    pub fn contains(&self, member: &str, session_id: &SessionId) -> bool {
        self.pending
            .iter()
            .any(|p| p.member == member && &p.session.session_id == session_id)
    }

    pub fn enqueue(&mut self, member: UserId, session: Session) {
        self.forget(&member, &session.session_id);
        self.pending.push(PendingCopy {
            member,
            session,
            attempts: 0,
        });
    }

    /// Queue every retryable failure of `report` with `session`.
    pub fn record_failures(&mut self, report: &PropagationReport, session: &Session) {
        for failed in &report.failed {
            if failed.permanent {
                tracing::debug!(
                    session_id = %session.session_id,
                    member = %failed.member,
                    "not queueing copy for member without a record"
                );
                continue;
            }
            self.enqueue(failed.member.clone(), session.clone());
        }
    }

    /// A newer copy of the session is about to be sent to `member`.
    pub fn forget(&mut self, member: &str, session_id: &SessionId) {
        self.pending
            .retain(|p| !(p.member == member && &p.session.session_id == session_id));
    }

    /// Re-send every queued copy. Members that fail again stay queued until
    /// the failure is permanent or their attempts run out.
    pub fn flush<P: Propagator + ?Sized>(&mut self, propagator: &P) -> Vec<PropagationReport> {
        let pending = std::mem::take(&mut self.pending);
        let mut reports = Vec::with_capacity(pending.len());
        for mut copy in pending {
            let report = propagator.propagate(&copy.session, std::slice::from_ref(&copy.member));
            if !report.is_complete() {
                copy.attempts += 1;
                let permanent = report.failed.iter().any(|f| f.permanent);
                if permanent || copy.attempts >= MAX_DELIVERY_ATTEMPTS {
                    tracing::warn!(
                        session_id = %copy.session.session_id,
                        member = %copy.member,
                        attempts = copy.attempts,
                        "giving up on queued session copy"
                    );
                } else {
                    self.pending.push(copy);
                }
            }
            reports.push(report);
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::storage::{MemoryRecordStore, UserRecord};
    use crate::timer::TimerConfig;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn session(members: &[&str]) -> Session {
        Session::new(
            members[0],
            members.iter().map(|m| m.to_string()).collect(),
            NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            TimerConfig::default(),
        )
    }

    /// Store whose writes fail for selected users.
    struct FlakyStore {
        inner: MemoryRecordStore,
        broken: Mutex<HashSet<String>>,
    }

    impl RecordStore for FlakyStore {
        fn get_user(&self, user_id: &str) -> Result<UserRecord, StoreError> {
            self.inner.get_user(user_id)
        }

        fn put_user(&self, user_id: &str, record: &UserRecord) -> Result<(), StoreError> {
            if self.broken.lock().unwrap().contains(user_id) {
                return Err(StoreError::Backend("disk full".into()));
            }
            self.inner.put_user(user_id, record)
        }
    }

    #[test]
    fn propagate_writes_every_member() {
        let store = MemoryRecordStore::with_users(["a", "b", "c"]);
        let s = session(&["a", "b", "c"]);
        let report = StorePropagator::new(&store).propagate(&s, &s.members);
        assert!(report.is_complete());
        assert_eq!(report.succeeded, ["a", "b", "c"]);
        for member in ["a", "b", "c"] {
            let record = store.get_user(member).unwrap();
            assert_eq!(record.session(&s.session_id), Some(&s));
        }
    }

    #[test]
    fn propagate_replaces_existing_copy() {
        let store = MemoryRecordStore::with_users(["a"]);
        let mut s = session(&["a"]);
        let propagator = StorePropagator::new(&store);
        propagator.propagate(&s, &s.members);
        s.location = "Cafe".into();
        propagator.propagate(&s, &s.members);
        let record = store.get_user("a").unwrap();
        assert_eq!(record.study_sessions.len(), 1);
        assert_eq!(record.study_sessions[0].location, "Cafe");
    }

    #[test]
    fn missing_member_is_a_partial_failure() {
        let store = MemoryRecordStore::with_users(["a", "c"]);
        let s = session(&["a", "b", "c"]);
        let report = StorePropagator::new(&store).propagate(&s, &s.members);
        assert_eq!(report.succeeded, ["a", "c"]);
        assert_eq!(report.failed_members(), ["b"]);
        // Successful writes stay in place.
        assert!(store.get_user("a").unwrap().session(&s.session_id).is_some());
        match report.into_result() {
            Err(SessionError::PartialPropagation { failed, succeeded, .. }) => {
                assert_eq!(failed, ["b"]);
                assert_eq!(succeeded, ["a", "c"]);
            }
            other => panic!("expected partial propagation, got {other:?}"),
        }
    }

    #[test]
    fn retry_queue_redelivers_after_recovery() {
        let store = FlakyStore {
            inner: MemoryRecordStore::with_users(["a", "b"]),
            broken: Mutex::new(HashSet::from(["b".to_string()])),
        };
        let propagator = StorePropagator::new(&store);
        let s = session(&["a", "b"]);
        let report = propagator.propagate(&s, &s.members);

        let mut queue = RetryQueue::new();
        queue.record_failures(&report, &s);
        assert_eq!(queue.members(), ["b"]);

        let reports = queue.flush(&propagator);
        assert!(!reports[0].is_complete());
        assert_eq!(queue.len(), 1);

        store.broken.lock().unwrap().clear();
        let reports = queue.flush(&propagator);
        assert!(reports[0].is_complete());
        assert!(queue.is_empty());
        assert!(store.get_user("b").unwrap().session(&s.session_id).is_some());
    }

    #[test]
    fn missing_member_is_reported_but_not_queued() {
        let store = MemoryRecordStore::with_users(["a"]);
        let s = session(&["a", "ghost"]);
        let report = StorePropagator::new(&store).propagate(&s, &s.members);
        assert!(report.failed[0].permanent);

        let mut queue = RetryQueue::new();
        queue.record_failures(&report, &s);
        assert!(queue.is_empty());
    }

    #[test]
    fn queued_copy_is_dropped_after_max_attempts() {
        let store = FlakyStore {
            inner: MemoryRecordStore::with_users(["a"]),
            broken: Mutex::new(HashSet::from(["a".to_string()])),
        };
        let propagator = StorePropagator::new(&store);
        let s = session(&["a"]);
        let mut queue = RetryQueue::new();
        queue.record_failures(&propagator.propagate(&s, &s.members), &s);

        for _ in 1..MAX_DELIVERY_ATTEMPTS {
            queue.flush(&propagator);
            assert_eq!(queue.len(), 1);
        }
        let reports = queue.flush(&propagator);
        assert!(!reports[0].is_complete());
        assert!(queue.is_empty());
    }

    #[test]
    fn newer_copy_replaces_queued_one() {
        let mut queue = RetryQueue::new();
        let mut s = session(&["a"]);
        queue.enqueue("a".into(), s.clone());
        s.location = "Library".into();
        queue.enqueue("a".into(), s.clone());
        assert_eq!(queue.len(), 1);
        assert!(queue.contains("a", &s.session_id));
        queue.forget("a", &s.session_id);
        assert!(queue.is_empty());
    }
}
