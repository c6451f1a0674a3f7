//! Per-user record store.
//!
//! The store is the only thing members share. Every user owns one
//! [`UserRecord`]; a session becomes visible to a member once a copy of it
//! has been written into that member's record. There are no transactions
//! across users and the last write to a record wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::session::{Session, SessionId, UserId};

/// A user's stored record. Fields owned by other parts of the app (friends,
/// calendar, profile) ride along in `extra` and are written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub study_sessions: Vec<Session>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserRecord {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            study_sessions: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&Session> {
        self.study_sessions
            .iter()
            .find(|s| &s.session_id == session_id)
    }

    /// Replace the stored copy of `session`, appending it if absent.
    /// Returns `true` when the session was inserted.
    pub fn upsert_session(&mut self, session: Session) -> bool {
        match self
            .study_sessions
            .iter_mut()
            .find(|s| s.session_id == session.session_id)
        {
            Some(existing) => {
                *existing = session;
                false
            }
            None => {
                self.study_sessions.push(session);
                true
            }
        }
    }

    /// Most recently updated session that is still active.
    pub fn active_session(&self) -> Option<&Session> {
        self.study_sessions
            .iter()
            .filter(|s| s.active)
            .max_by_key(|s| s.updated_at)
    }
}

/// Storage backend for user records.
pub trait RecordStore {
    /// Fetch a user's record. Missing users yield [`StoreError::NotFound`].
    fn get_user(&self, user_id: &str) -> Result<UserRecord, StoreError>;

    /// Overwrite a user's record.
    fn put_user(&self, user_id: &str, record: &UserRecord) -> Result<(), StoreError>;

    /// Create a record for a new user.
    fn register_user(&self, record: &UserRecord) -> Result<(), StoreError> {
        match self.get_user(&record.user_id) {
            Ok(_) => Err(StoreError::AlreadyExists(record.user_id.clone())),
            Err(StoreError::NotFound(_)) => self.put_user(&record.user_id, record),
            Err(e) => Err(e),
        }
    }
}

impl<S: RecordStore + ?Sized> RecordStore for &S {
    fn get_user(&self, user_id: &str) -> Result<UserRecord, StoreError> {
        (**self).get_user(user_id)
    }

    fn put_user(&self, user_id: &str, record: &UserRecord) -> Result<(), StoreError> {
        (**self).put_user(user_id, record)
    }
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn get_user(&self, user_id: &str) -> Result<UserRecord, StoreError> {
        (**self).get_user(user_id)
    }

    fn put_user(&self, user_id: &str, record: &UserRecord) -> Result<(), StoreError> {
        (**self).put_user(user_id, record)
    }
}

/// In-process store, used by tests and as a stand-in for a device's local
/// storage.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<UserId, UserRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with empty records for `user_ids`.
    pub fn with_users<I, S>(user_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        let records = user_ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                (id.clone(), UserRecord::new(id.clone(), id))
            })
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .records
            .lock()
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

impl RecordStore for MemoryRecordStore {
    fn get_user(&self, user_id: &str) -> Result<UserRecord, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        records
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))
    }

    fn put_user(&self, user_id: &str, record: &UserRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        records.insert(user_id.to_string(), record.clone());
        Ok(())
    }
}
