//! Persistent storage for delivery records using redb.
//!
//! # Table design
//!
//! `DELIVERIES` maps the record identity to its JSON encoding:
//! ```text
//! "{communication_id}\x1f{recipient_id}" -> DeliveryRecord (JSON)
//! ```
//! Keys sort by communication first, so all records of one communication are
//! a single prefix range.
//!
//! `DUE` indexes scheduled records by due time with a 24-byte key:
//! ```text
//! [ processing_at_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ] -> identity
//! ```
//! Only `Scheduled` records have an index entry, so `..=due_upper_bound(now)`
//! returns exactly the records due by `now`, oldest first.
//!
//! Every transition runs inside one write transaction that re-reads the
//! record and compares its status against the caller's expectation. redb
//! serializes writers, which makes each transition a compare-and-set.

use std::fmt::Display;
use std::path::Path;

use chrono::{DateTime, Utc};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, TableDefinition};
use regex::RegexBuilder;
use uuid::Uuid;

use crate::error::{DripError, Result};
use crate::types::DeliveryStatus;

use super::record::{DeliveryRecord, TransitionRejected};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const DELIVERIES: TableDefinition<&str, &[u8]> = TableDefinition::new("deliveries");
const DUE: TableDefinition<&[u8], &str> = TableDefinition::new("deliveries_due");

const KEY_SEPARATOR: char = '\u{1f}';

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn identity_key(communication: &str, recipient: &str) -> String {
    format!("{communication}{KEY_SEPARATOR}{recipient}")
}

fn due_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

/// Upper bound for a range scan returning all records due by `now`.
fn due_upper_bound(now: DateTime<Utc>) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = now.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].fill(0xff);
    key
}

fn db_err(e: impl Display) -> DripError {
    DripError::Db(e.to_string())
}

fn decode(bytes: &[u8]) -> Result<DeliveryRecord> {
    serde_json::from_slice(bytes).map_err(db_err)
}

/// Translate a SQL `LIKE` pattern (`%`, `_`) into an anchored regex.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out.push('$');
    out
}

// ---------------------------------------------------------------------------
// DeliveryDb
// ---------------------------------------------------------------------------

/// Persistent store for [`DeliveryRecord`]s.
pub struct DeliveryDb {
    db: Database,
}

impl DeliveryDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(db_err)?;
        Self::init(db)
    }

    /// A throwaway store backed by memory.
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(db_err)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        // Tables must exist before the first read transaction opens them.
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(DELIVERIES).map_err(db_err)?;
        wt.open_table(DUE).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Insert a new record. Fails if one already exists for the same
    /// communication and recipient.
    pub fn create(&self, record: &DeliveryRecord) -> Result<()> {
        let key = identity_key(&record.communication_id, &record.recipient_id);
        let value = serde_json::to_vec(record).map_err(db_err)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(DELIVERIES).map_err(db_err)?;
            if table.get(key.as_str()).map_err(db_err)?.is_some() {
                drop(table);
                wt.abort().map_err(db_err)?;
                return Err(DripError::DeliveryExists {
                    communication: record.communication_id.clone(),
                    recipient: record.recipient_id.clone(),
                });
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(db_err)?;

            if record.status == DeliveryStatus::Scheduled {
                let mut due = wt.open_table(DUE).map_err(db_err)?;
                due.insert(
                    due_key(record.processing_at, record.id).as_slice(),
                    key.as_str(),
                )
                .map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Atomically apply `apply` to the stored record if its status is still
    /// `expected`. Returns the updated record.
    ///
    /// A status mismatch or a rejection from `apply` aborts the transaction
    /// and surfaces as [`DripError::Rejected`]; nothing is written.
    pub fn transition<F>(
        &self,
        communication: &str,
        recipient: &str,
        expected: DeliveryStatus,
        apply: F,
    ) -> Result<DeliveryRecord>
    where
        F: FnOnce(&mut DeliveryRecord) -> std::result::Result<(), TransitionRejected>,
    {
        let key = identity_key(communication, recipient);
        let wt = self.db.begin_write().map_err(db_err)?;

        let outcome = (|| -> Result<DeliveryRecord> {
            let mut table = wt.open_table(DELIVERIES).map_err(db_err)?;
            let bytes = table
                .get(key.as_str())
                .map_err(db_err)?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| DripError::DeliveryNotFound {
                    communication: communication.to_string(),
                    recipient: recipient.to_string(),
                })?;
            let mut record = decode(&bytes)?;
            if record.status != expected {
                return Err(TransitionRejected::StatusChanged {
                    expected,
                    found: record.status,
                }
                .into());
            }

            let old_due = due_key(record.processing_at, record.id);
            apply(&mut record)?;

            let value = serde_json::to_vec(&record).map_err(db_err)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(db_err)?;

            let mut due = wt.open_table(DUE).map_err(db_err)?;
            due.remove(old_due.as_slice()).map_err(db_err)?;
            if record.status == DeliveryStatus::Scheduled {
                due.insert(
                    due_key(record.processing_at, record.id).as_slice(),
                    key.as_str(),
                )
                .map_err(db_err)?;
            }
            Ok(record)
        })();

        match outcome {
            Ok(record) => {
                wt.commit().map_err(db_err)?;
                tracing::debug!(
                    communication,
                    recipient,
                    status = %record.status,
                    "delivery transitioned"
                );
                Ok(record)
            }
            Err(e) => {
                wt.abort().map_err(db_err)?;
                Err(e)
            }
        }
    }

    /// Manually re-schedule a record that ended in `Error`.
    pub fn retry(&self, communication: &str, recipient: &str) -> Result<DeliveryRecord> {
        self.transition(communication, recipient, DeliveryStatus::Error, |r| {
            r.retry()
        })
    }

    /// Manually skip a record that is still `Scheduled`.
    pub fn skip(&self, communication: &str, recipient: &str, reason: &str) -> Result<DeliveryRecord> {
        self.transition(communication, recipient, DeliveryStatus::Scheduled, |r| {
            r.skip(reason)
        })
    }

    pub fn get(&self, communication: &str, recipient: &str) -> Result<Option<DeliveryRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(DELIVERIES).map_err(db_err)?;
        let key = identity_key(communication, recipient);
        match table.get(key.as_str()).map_err(db_err)? {
            Some(guard) => decode(guard.value()).map(Some),
            None => Ok(None),
        }
    }

    /// Scheduled records due by `now`, oldest first, at most `limit`.
    pub fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeliveryRecord>> {
        let upper = due_upper_bound(now);
        let rt = self.db.begin_read().map_err(db_err)?;
        let due = rt.open_table(DUE).map_err(db_err)?;
        let table = rt.open_table(DELIVERIES).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in due.range(..=upper.as_slice()).map_err(db_err)? {
            if result.len() >= limit {
                break;
            }
            let (_, identity) = entry.map_err(db_err)?;
            let Some(guard) = table.get(identity.value()).map_err(db_err)? else {
                continue;
            };
            let record = decode(guard.value())?;
            if record.is_due(now) {
                result.push(record);
            }
        }
        Ok(result)
    }

    pub fn by_status(&self, status: DeliveryStatus) -> Result<Vec<DeliveryRecord>> {
        self.scan(|r| r.status == status)
    }

    pub fn by_recipient(&self, recipient: &str) -> Result<Vec<DeliveryRecord>> {
        self.scan(|r| r.recipient_id == recipient)
    }

    /// All records of one communication, ordered by recipient id.
    pub fn by_communication(&self, communication: &str) -> Result<Vec<DeliveryRecord>> {
        let start = format!("{communication}{KEY_SEPARATOR}");
        let end = format!("{communication}{}", char::from(KEY_SEPARATOR as u8 + 1));
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(DELIVERIES).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(db_err)?
        {
            let (_, v) = entry.map_err(db_err)?;
            result.push(decode(v.value())?);
        }
        Ok(result)
    }

    /// Case-insensitive SQL `LIKE` match on the delivery address.
    pub fn search_address(&self, pattern: &str) -> Result<Vec<DeliveryRecord>> {
        let re = RegexBuilder::new(&like_to_regex(pattern))
            .case_insensitive(true)
            .build()
            .map_err(db_err)?;
        self.scan(|r| re.is_match(&r.address))
    }

    /// Every record, newest first.
    pub fn list_all(&self) -> Result<Vec<DeliveryRecord>> {
        let mut all = self.scan(|_| true)?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    fn scan(&self, keep: impl Fn(&DeliveryRecord) -> bool) -> Result<Vec<DeliveryRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(DELIVERIES).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            let record = decode(v.value())?;
            if keep(&record) {
                result.push(record);
            }
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, DeliveryDb) {
        let dir = TempDir::new().unwrap();
        let db = DeliveryDb::open(&dir.path().join("deliveries.db")).unwrap();
        (dir, db)
    }

    fn scheduled(comm: &str, recipient: &str, at: DateTime<Utc>) -> DeliveryRecord {
        DeliveryRecord::new(comm, recipient, format!("{recipient}@example.com"), at)
    }

    fn meta() -> serde_json::Map<String, serde_json::Value> {
        json!({ "body": "hello" }).as_object().cloned().unwrap()
    }

    #[test]
    fn create_rejects_duplicates() {
        let (_dir, db) = open_tmp();
        db.create(&scheduled("welcome", "u1", Utc::now())).unwrap();
        let err = db
            .create(&scheduled("welcome", "u1", Utc::now()))
            .unwrap_err();
        assert!(matches!(err, DripError::DeliveryExists { .. }));
        assert_eq!(db.list_all().unwrap().len(), 1);
    }

    #[test]
    fn due_returns_only_past_scheduled_records_in_order() {
        let db = DeliveryDb::in_memory().unwrap();
        let now = Utc::now();
        db.create(&scheduled("welcome", "late", now + Duration::hours(1)))
            .unwrap();
        db.create(&scheduled("welcome", "second", now - Duration::minutes(1)))
            .unwrap();
        db.create(&scheduled("welcome", "first", now - Duration::minutes(5)))
            .unwrap();
        db.create(&scheduled("welcome", "done", now - Duration::minutes(10)))
            .unwrap();
        db.transition("welcome", "done", DeliveryStatus::Scheduled, |r| {
            r.skip("manual")
        })
        .unwrap();

        let due = db.due(now, 10).unwrap();
        let ids: Vec<_> = due.iter().map(|r| r.recipient_id.as_str()).collect();
        assert_eq!(ids, ["first", "second"]);

        assert_eq!(db.due(now, 1).unwrap().len(), 1);
    }

    #[test]
    fn postpone_moves_the_due_index() {
        let db = DeliveryDb::in_memory().unwrap();
        let now = Utc::now();
        db.create(&scheduled("welcome", "u1", now - Duration::minutes(1)))
            .unwrap();

        db.transition("welcome", "u1", DeliveryStatus::Scheduled, |r| r.postpone())
            .unwrap();
        assert!(db.due(now, 10).unwrap().is_empty());
        assert_eq!(db.due(now + Duration::days(1), 10).unwrap().len(), 1);
    }

    #[test]
    fn rejected_transition_writes_nothing() {
        let db = DeliveryDb::in_memory().unwrap();
        db.create(&scheduled("welcome", "u1", Utc::now())).unwrap();
        for _ in 0..3 {
            db.transition("welcome", "u1", DeliveryStatus::Scheduled, |r| r.postpone())
                .unwrap();
        }
        let before = db.get("welcome", "u1").unwrap().unwrap();

        let err = db
            .transition("welcome", "u1", DeliveryStatus::Scheduled, |r| r.postpone())
            .unwrap_err();
        assert!(matches!(
            err,
            DripError::Rejected(TransitionRejected::PostponeLimit { limit: 3 })
        ));
        assert_eq!(db.get("welcome", "u1").unwrap().unwrap(), before);
    }

    #[test]
    fn status_mismatch_is_rejected() {
        let db = DeliveryDb::in_memory().unwrap();
        db.create(&scheduled("welcome", "u1", Utc::now())).unwrap();
        let err = db
            .transition("welcome", "u1", DeliveryStatus::Error, |r| r.retry())
            .unwrap_err();
        assert!(matches!(
            err,
            DripError::Rejected(TransitionRejected::StatusChanged {
                expected: DeliveryStatus::Error,
                found: DeliveryStatus::Scheduled,
            })
        ));
    }

    #[test]
    fn manual_retry_reschedules_errored_record() {
        let db = DeliveryDb::in_memory().unwrap();
        let now = Utc::now();
        db.create(&scheduled("welcome", "u1", now - Duration::minutes(1)))
            .unwrap();
        db.transition("welcome", "u1", DeliveryStatus::Scheduled, |r| {
            r.mark_error("smtp down")
        })
        .unwrap();
        assert!(db.due(now, 10).unwrap().is_empty());

        let record = db.retry("welcome", "u1").unwrap();
        assert_eq!(record.status, DeliveryStatus::Scheduled);
        assert_eq!(record.audit_log[0].message.as_deref(), Some("smtp down"));
        assert_eq!(db.due(now, 10).unwrap().len(), 1);

        assert!(matches!(
            db.retry("welcome", "u1"),
            Err(DripError::Rejected(_))
        ));
    }

    #[test]
    fn missing_record_is_not_found() {
        let db = DeliveryDb::in_memory().unwrap();
        let err = db
            .transition("welcome", "ghost", DeliveryStatus::Scheduled, |r| {
                r.skip("x")
            })
            .unwrap_err();
        assert!(matches!(err, DripError::DeliveryNotFound { .. }));
    }

    #[test]
    fn concurrent_deliver_and_skip_have_one_winner() {
        let db = DeliveryDb::in_memory().unwrap();
        for round in 0..20 {
            let recipient = format!("u{round}");
            db.create(&scheduled("welcome", &recipient, Utc::now()))
                .unwrap();

            let (delivered, skipped) = std::thread::scope(|s| {
                let a = s.spawn(|| {
                    db.transition("welcome", &recipient, DeliveryStatus::Scheduled, |r| {
                        r.deliver(meta())
                    })
                });
                let b = s.spawn(|| {
                    db.transition("welcome", &recipient, DeliveryStatus::Scheduled, |r| {
                        r.skip("condition_not_met")
                    })
                });
                (a.join().unwrap(), b.join().unwrap())
            });

            assert!(delivered.is_ok() != skipped.is_ok(), "exactly one must win");
            let loser = if delivered.is_ok() { skipped } else { delivered };
            assert!(matches!(
                loser,
                Err(DripError::Rejected(TransitionRejected::StatusChanged { .. }))
            ));

            let stored = db.get("welcome", &recipient).unwrap().unwrap();
            assert_ne!(stored.status, DeliveryStatus::Scheduled);
        }
    }

    #[test]
    fn queries_by_status_recipient_and_communication() {
        let db = DeliveryDb::in_memory().unwrap();
        let now = Utc::now();
        db.create(&scheduled("welcome", "u1", now)).unwrap();
        db.create(&scheduled("welcome", "u2", now)).unwrap();
        db.create(&scheduled("welcome-2", "u1", now)).unwrap();
        db.create(&scheduled("digest", "u1", now)).unwrap();
        db.transition("welcome", "u2", DeliveryStatus::Scheduled, |r| {
            r.mark_error("bounced")
        })
        .unwrap();

        let errors = db.by_status(DeliveryStatus::Error).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].recipient_id, "u2");

        assert_eq!(db.by_recipient("u1").unwrap().len(), 3);

        let welcome: Vec<_> = db
            .by_communication("welcome")
            .unwrap()
            .into_iter()
            .map(|r| r.recipient_id)
            .collect();
        assert_eq!(welcome, ["u1", "u2"]);
    }

    #[test]
    fn search_address_uses_like_semantics() {
        let db = DeliveryDb::in_memory().unwrap();
        let now = Utc::now();
        db.create(&DeliveryRecord::new("welcome", "u1", "Ada@Example.com", now))
            .unwrap();
        db.create(&DeliveryRecord::new("welcome", "u2", "bob@example.org", now))
            .unwrap();
        db.create(&DeliveryRecord::new("welcome", "u3", "a.b@example.com", now))
            .unwrap();

        let hits = |p: &str| -> Vec<String> {
            let mut ids: Vec<_> = db
                .search_address(p)
                .unwrap()
                .into_iter()
                .map(|r| r.recipient_id)
                .collect();
            ids.sort();
            ids
        };
        assert_eq!(hits("%@example.com"), ["u1", "u3"]);
        assert_eq!(hits("ada@%"), ["u1"]);
        assert_eq!(hits("___@example.___"), ["u1", "u2"]);
        assert_eq!(hits("a.b%"), ["u3"]);
        assert!(hits("example.com").is_empty());
    }

    #[test]
    fn reopen_preserves_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deliveries.db");
        {
            let db = DeliveryDb::open(&path).unwrap();
            db.create(&scheduled("welcome", "u1", Utc::now())).unwrap();
        }
        let db = DeliveryDb::open(&path).unwrap();
        assert!(db.get("welcome", "u1").unwrap().is_some());
    }
}
