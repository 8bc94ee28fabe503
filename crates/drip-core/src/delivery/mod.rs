//! Delivery records: one communication sent to one recipient.
//!
//! Provides `DeliveryRecord` with its guarded transitions and `DeliveryDb`,
//! the redb-backed store that applies them atomically.

pub mod db;
pub mod record;

pub use db::DeliveryDb;
pub use record::{AuditEntry, DeliveryRecord, Payload, TransitionRejected, MAX_POSTPONES};
