//! File-backed approval store. One JSON file per approval key under a
//! single directory; every write goes through a `.tmp` sibling and an
//! atomic rename so readers never observe a torn record. A process-wide
//! mutex per store serializes directory operations.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use tracing::debug;

use crate::error::ChainwatchErr;
use crate::error::Result;
use crate::flags::chainwatch_home;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    Consumed,
}

impl ApprovalStatus {
    /// Terminal records are eligible for cleanup.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Expired | Self::Consumed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub key: String,
    pub status: ApprovalStatus,
    pub reason: String,
    pub policy_id: String,
    pub resource: String,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Absent on an approved record means one-shot (no time limit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ApprovalStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl ApprovalStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_dir())
    }

    pub fn default_dir() -> PathBuf {
        chainwatch_home().join("pending")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record a pending approval. Idempotent: an existing record for the
    /// key, in any state, is returned untouched.
    pub fn request(
        &self,
        key: &str,
        reason: &str,
        policy_id: &str,
        resource: &str,
    ) -> Result<ApprovalRecord> {
        let _guard = self.guard();
        validate_key(key)?;
        if let Some(existing) = self.read_record(key)? {
            return Ok(existing);
        }
        let record = ApprovalRecord {
            key: key.to_string(),
            status: ApprovalStatus::Pending,
            reason: reason.to_string(),
            policy_id: policy_id.to_string(),
            resource: resource.to_string(),
            requested_at: Utc::now(),
            resolved_at: None,
            expires_at: None,
        };
        self.write_record(&record)?;
        debug!(key, "approval requested");
        Ok(record)
    }

    /// Approve a pending (or re-approve a resolved) key. `ttl_secs > 0`
    /// sets an expiry; zero leaves the approval one-shot.
    pub fn approve(&self, key: &str, ttl_secs: u64) -> Result<ApprovalRecord> {
        let _guard = self.guard();
        validate_key(key)?;
        let mut record = self.require_record(key)?;
        let now = Utc::now();
        record.status = ApprovalStatus::Approved;
        record.resolved_at = Some(now);
        record.expires_at = if ttl_secs > 0 {
            Some(now + Duration::seconds(ttl_secs as i64))
        } else {
            None
        };
        self.write_record(&record)?;
        Ok(record)
    }

    pub fn deny(&self, key: &str) -> Result<ApprovalRecord> {
        let _guard = self.guard();
        validate_key(key)?;
        let mut record = self.require_record(key)?;
        record.status = ApprovalStatus::Denied;
        record.resolved_at = Some(Utc::now());
        self.write_record(&record)?;
        Ok(record)
    }

    /// Burn an approved key. Errors on double consume and on any record
    /// that is not currently approved.
    pub fn consume(&self, key: &str) -> Result<ApprovalRecord> {
        let _guard = self.guard();
        validate_key(key)?;
        let mut record = self.require_record(key)?;
        match record.status {
            ApprovalStatus::Approved => {
                if let Some(result) = self.expire_if_due(&mut record, Utc::now())? {
                    return Err(ChainwatchErr::Conflict(format!(
                        "approval '{key}' expired at {result}"
                    )));
                }
                record.status = ApprovalStatus::Consumed;
                record.resolved_at = Some(Utc::now());
                self.write_record(&record)?;
                Ok(record)
            }
            ApprovalStatus::Consumed => Err(ChainwatchErr::Conflict(format!(
                "approval '{key}' was already consumed"
            ))),
            status => Err(ChainwatchErr::Conflict(format!(
                "approval '{key}' is {status}, not approved"
            ))),
        }
    }

    /// Current status of a key, lazily transitioning approved-but-stale
    /// records to expired.
    pub fn check(&self, key: &str) -> Result<ApprovalStatus> {
        self.check_at(key, Utc::now())
    }

    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> Result<ApprovalStatus> {
        let _guard = self.guard();
        validate_key(key)?;
        let mut record = self.require_record(key)?;
        if record.status == ApprovalStatus::Approved {
            self.expire_if_due(&mut record, now)?;
        }
        Ok(record.status)
    }

    pub fn list(&self) -> Result<Vec<ApprovalRecord>> {
        let _guard = self.guard();
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            match serde_json::from_slice::<ApprovalRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable approval record");
                }
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    /// Remove terminal records; returns how many were deleted.
    pub fn cleanup(&self) -> Result<usize> {
        let records = self.list()?;
        let _guard = self.guard();
        let mut removed = 0;
        for record in records {
            if record.status.is_terminal() {
                fs::remove_file(self.path_for(&record.key))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read_record(&self, key: &str) -> Result<Option<ApprovalRecord>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn require_record(&self, key: &str) -> Result<ApprovalRecord> {
        self.read_record(key)?
            .ok_or_else(|| ChainwatchErr::NotFound(format!("no approval for key '{key}'")))
    }

    /// Write via `<key>.json.tmp` + rename so a concurrent reader never
    /// sees a partial file.
    fn write_record(&self, record: &ApprovalRecord) -> Result<()> {
        let path = self.path_for(&record.key);
        let tmp = self.dir.join(format!("{}.json.tmp", record.key));
        let mut bytes = serde_json::to_vec_pretty(record)?;
        bytes.push(b'\n');
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// If the record's expiry has passed, persist the transition and
    /// return the expiry timestamp.
    fn expire_if_due(
        &self,
        record: &mut ApprovalRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let Some(expires_at) = record.expires_at else {
            return Ok(None);
        };
        if now <= expires_at {
            return Ok(None);
        }
        record.status = ApprovalStatus::Expired;
        self.write_record(record)?;
        Ok(Some(expires_at))
    }
}

/// Keys are a path component, nothing more: `[A-Za-z0-9._-]+`, no `..`.
fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.contains("..")
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ChainwatchErr::InvalidInput(format!(
            "approval key '{key}' is not a safe path component"
        )))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn store() -> (TempDir, ApprovalStore) {
        let dir = TempDir::new().unwrap();
        let store = ApprovalStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn request_approve_consume_lifecycle() {
        let (_dir, store) = store();
        store
            .request("tier_2_action", "needs eyes", "tier.guarded.approval", "/x")
            .unwrap();
        assert_eq!(
            store.check("tier_2_action").unwrap(),
            ApprovalStatus::Pending
        );

        store.approve("tier_2_action", 0).unwrap();
        assert_eq!(
            store.check("tier_2_action").unwrap(),
            ApprovalStatus::Approved
        );

        store.consume("tier_2_action").unwrap();
        assert_eq!(
            store.check("tier_2_action").unwrap(),
            ApprovalStatus::Consumed
        );
    }

    #[test]
    fn second_consume_is_a_conflict() {
        let (_dir, store) = store();
        store.request("k", "r", "p", "/x").unwrap();
        store.approve("k", 0).unwrap();
        store.consume("k").unwrap();
        let err = store.consume("k").unwrap_err();
        assert!(matches!(err, ChainwatchErr::Conflict(_)));
    }

    #[test]
    fn consume_of_pending_is_a_conflict() {
        let (_dir, store) = store();
        store.request("k", "r", "p", "/x").unwrap();
        assert!(matches!(
            store.consume("k").unwrap_err(),
            ChainwatchErr::Conflict(_)
        ));
    }

    #[test]
    fn request_is_idempotent() {
        let (_dir, store) = store();
        store.request("k", "first", "p", "/x").unwrap();
        store.approve("k", 0).unwrap();
        let record = store.request("k", "second", "p", "/x").unwrap();
        assert_eq!(record.status, ApprovalStatus::Approved);
        assert_eq!(record.reason, "first");
    }

    #[test]
    fn approval_with_ttl_expires() {
        let (_dir, store) = store();
        store.request("k", "r", "p", "/x").unwrap();
        let record = store.approve("k", 60).unwrap();
        let expires_at = record.expires_at.unwrap();

        assert_eq!(
            store.check_at("k", expires_at).unwrap(),
            ApprovalStatus::Approved
        );
        assert_eq!(
            store
                .check_at("k", expires_at + Duration::seconds(1))
                .unwrap(),
            ApprovalStatus::Expired
        );
        // The transition was persisted, not just computed.
        assert_eq!(store.check("k").unwrap(), ApprovalStatus::Expired);
    }

    #[test]
    fn deny_is_terminal_for_consume() {
        let (_dir, store) = store();
        store.request("k", "r", "p", "/x").unwrap();
        store.deny("k").unwrap();
        assert!(matches!(
            store.consume("k").unwrap_err(),
            ChainwatchErr::Conflict(_)
        ));
    }

    #[test]
    fn missing_key_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.check("ghost").unwrap_err(),
            ChainwatchErr::NotFound(_)
        ));
    }

    #[test]
    fn hostile_keys_are_rejected() {
        let (_dir, store) = store();
        for key in ["../escape", "a/b", "", "key with space", "k\u{0}"] {
            assert!(
                matches!(
                    store.request(key, "r", "p", "/x").unwrap_err(),
                    ChainwatchErr::InvalidInput(_)
                ),
                "expected {key:?} to be rejected"
            );
        }
    }

    #[test]
    fn cleanup_removes_only_terminal_records() {
        let (_dir, store) = store();
        store.request("stay", "r", "p", "/x").unwrap();
        store.request("gone", "r", "p", "/x").unwrap();
        store.deny("gone").unwrap();
        assert_eq!(store.cleanup().unwrap(), 1);
        let keys: Vec<String> = store.list().unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["stay"]);
    }
}
