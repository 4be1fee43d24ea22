//! Tamper-evident audit log.
//!
//! JSON-lines, one entry per decision, appended under an exclusive
//! advisory file lock. Each entry carries the SHA-256 of the previous
//! serialized line, so editing or forging any line breaks the chain from
//! that point on. Entry zero chains from the hash of the empty string.
//!
//! Writers prepare the full line and write it with a single call while
//! holding the lock, so concurrent processes appending through this
//! module never interleave partial lines.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use chainwatch_protocol::Action;
use chainwatch_protocol::Decision;
use chainwatch_protocol::PolicyResult;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::error::ChainwatchErr;
use crate::error::Result;

/// `sha256("")`, the sentinel the chain starts from. Also recorded as the
/// policy hash when a process runs on built-in defaults.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const MAX_LOCK_RETRIES: usize = 10;
const LOCK_RETRY_SLEEP: Duration = Duration::from_millis(100);

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub trace_id: String,
    pub action: Action,
    pub decision: Decision,
    pub reason: String,
    pub tier: u8,
    pub policy_id: String,
    pub policy_hash: String,
    pub prev_hash: String,
}

/// Result of a full chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub entries: usize,
    /// Zero-based index of the first entry that fails to chain, if any.
    pub broken_at: Option<usize>,
}

impl ChainReport {
    pub fn is_clean(&self) -> bool {
        self.broken_at.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct AuditChain {
    path: PathBuf,
}

impl AuditChain {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(
        &self,
        trace_id: &str,
        action: &Action,
        result: &PolicyResult,
        policy_hash: &str,
    ) -> Result<AuditEntry> {
        self.append_at(Utc::now(), trace_id, action, result, policy_hash)
    }

    /// Append one entry, computing `prev_hash` from the current tail of
    /// the file while the exclusive lock is held.
    pub fn append_at(
        &self,
        ts: DateTime<Utc>,
        trace_id: &str,
        action: &Action,
        result: &PolicyResult,
        policy_hash: &str,
    ) -> Result<AuditEntry> {
        let mut file = OpenOptions::new()
            .append(true)
            .read(true)
            .create(true)
            .open(&self.path)?;
        acquire_exclusive_lock_with_retry(&file)?;

        let prev_hash = match last_line(&self.path)? {
            Some(line) => sha256_hex(line.as_bytes()),
            None => EMPTY_SHA256.to_string(),
        };

        let entry = AuditEntry {
            ts,
            trace_id: trace_id.to_string(),
            action: action.clone(),
            decision: result.decision,
            reason: result.reason.clone(),
            tier: result.tier,
            policy_id: result.policy_id.clone(),
            policy_hash: policy_hash.to_string(),
            prev_hash,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;
        fs2::FileExt::unlock(&file)?;
        Ok(entry)
    }

    /// Stream the log and rebuild the chain, reporting the first entry
    /// whose `prev_hash` (or JSON shape) does not verify. A missing file
    /// is an empty, clean chain.
    pub fn verify(&self) -> Result<ChainReport> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ChainReport {
                    entries: 0,
                    broken_at: None,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let reader = BufReader::new(file);
        let mut expected = EMPTY_SHA256.to_string();
        let mut entries = 0usize;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            entries += 1;
            let entry: AuditEntry = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(_) => {
                    return Ok(ChainReport {
                        entries,
                        broken_at: Some(index),
                    });
                }
            };
            if entry.prev_hash != expected {
                return Ok(ChainReport {
                    entries,
                    broken_at: Some(index),
                });
            }
            expected = sha256_hex(line.as_bytes());
        }
        Ok(ChainReport {
            entries,
            broken_at: None,
        })
    }

    /// Verify and error out on a broken chain.
    pub fn verify_strict(&self) -> Result<ChainReport> {
        let report = self.verify()?;
        match report.broken_at {
            Some(index) => Err(ChainwatchErr::Integrity { index }),
            None => Ok(report),
        }
    }

    /// All entries, in file order. Used by the offline simulator.
    pub fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

fn last_line(path: &Path) -> Result<Option<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let reader = BufReader::new(file);
    let mut last = None;
    for line in reader.lines() {
        let line = line?;
        if !line.is_empty() {
            last = Some(line);
        }
    }
    Ok(last)
}

/// Bounded advisory-lock acquisition so one stuck writer cannot wedge
/// every other process forever.
fn acquire_exclusive_lock_with_retry(file: &File) -> Result<()> {
    for _ in 0..MAX_LOCK_RETRIES {
        match fs2::FileExt::try_lock_exclusive(file) {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(LOCK_RETRY_SLEEP);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ChainwatchErr::Io(std::io::Error::new(
        std::io::ErrorKind::WouldBlock,
        "could not acquire exclusive lock on audit log after multiple attempts",
    )))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use chainwatch_protocol::PolicyResult;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn chain() -> (TempDir, AuditChain) {
        let dir = TempDir::new().unwrap();
        let chain = AuditChain::open(dir.path().join("audit.jsonl")).unwrap();
        (dir, chain)
    }

    fn sample_result() -> PolicyResult {
        PolicyResult::allow(0, "ok", "tier.guarded.allow")
    }

    #[test]
    fn empty_chain_is_clean() {
        let (_dir, chain) = chain();
        let report = chain.verify().unwrap();
        assert_eq!(report.entries, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn first_entry_chains_from_empty_hash() {
        let (_dir, chain) = chain();
        let action = Action::file_read("/tmp/a");
        let entry = chain
            .append("trace-1", &action, &sample_result(), EMPTY_SHA256)
            .unwrap();
        assert_eq!(entry.prev_hash, EMPTY_SHA256);
        assert!(chain.verify().unwrap().is_clean());
    }

    #[test]
    fn n_entries_roundtrip_clean() {
        let (_dir, chain) = chain();
        for i in 0..10 {
            let action = Action::file_read(format!("/tmp/file-{i}"));
            chain
                .append("trace-1", &action, &sample_result(), EMPTY_SHA256)
                .unwrap();
        }
        let report = chain.verify().unwrap();
        assert_eq!(report.entries, 10);
        assert!(report.is_clean());
        assert_eq!(chain.read_entries().unwrap().len(), 10);
    }

    #[test]
    fn mutating_a_byte_breaks_the_chain_at_that_index() {
        let (_dir, chain) = chain();
        for i in 0..5 {
            let action = Action::file_read(format!("/tmp/file-{i}"));
            chain
                .append("trace-1", &action, &sample_result(), EMPTY_SHA256)
                .unwrap();
        }

        let contents = std::fs::read_to_string(chain.path()).unwrap();
        let mutated = contents.replacen("file-2", "file-X", 1);
        std::fs::write(chain.path(), mutated).unwrap();

        // Entry 2 still parses and chains from entry 1; entry 3's
        // prev_hash no longer matches the edited bytes.
        let report = chain.verify().unwrap();
        assert_eq!(report.broken_at, Some(3));
        assert!(matches!(
            chain.verify_strict().unwrap_err(),
            ChainwatchErr::Integrity { index: 3 }
        ));
    }

    #[test]
    fn forged_appended_entry_is_detected() {
        let (_dir, chain) = chain();
        let action = Action::file_read("/tmp/a");
        chain
            .append("trace-1", &action, &sample_result(), EMPTY_SHA256)
            .unwrap();

        // Forge a plausible entry that chains from the empty hash instead
        // of the real tail.
        let forged = AuditEntry {
            ts: Utc::now(),
            trace_id: "trace-1".to_string(),
            action,
            decision: Decision::Allow,
            reason: "looks fine".to_string(),
            tier: 0,
            policy_id: "tier.guarded.allow".to_string(),
            policy_hash: EMPTY_SHA256.to_string(),
            prev_hash: EMPTY_SHA256.to_string(),
        };
        let mut line = serde_json::to_string(&forged).unwrap();
        line.push('\n');
        let mut contents = std::fs::read_to_string(chain.path()).unwrap();
        contents.push_str(&line);
        std::fs::write(chain.path(), contents).unwrap();

        assert_eq!(chain.verify().unwrap().broken_at, Some(1));
    }

    #[test]
    fn garbage_line_breaks_the_chain() {
        let (_dir, chain) = chain();
        let action = Action::file_read("/tmp/a");
        chain
            .append("trace-1", &action, &sample_result(), EMPTY_SHA256)
            .unwrap();
        let mut contents = std::fs::read_to_string(chain.path()).unwrap();
        contents.push_str("not json\n");
        std::fs::write(chain.path(), contents).unwrap();
        assert_eq!(chain.verify().unwrap().broken_at, Some(1));
    }
}
