//! Delivery record data model and its state machine.
//!
//! A `DeliveryRecord` tracks one communication sent to one recipient.
//!
//! Transitions: `Scheduled → Delivered | Skipped | Error`, `Error → Scheduled`
//! (via `retry`). Every transition either applies fully or returns
//! [`TransitionRejected`] and leaves the record untouched.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{AuditAction, AuditReason, DeliveryStatus};

/// Automatic postponements allowed before the driver gives up on a record.
pub const MAX_POSTPONES: usize = 3;

// ---------------------------------------------------------------------------
// TransitionRejected
// ---------------------------------------------------------------------------

/// A transition that does not apply to the record's current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionRejected {
    #[error("cannot {action} a delivery that is {status}")]
    InvalidState {
        action: &'static str,
        status: DeliveryStatus,
    },

    #[error("delivery already postponed {limit} times")]
    PostponeLimit { limit: usize },

    #[error("delivery is {found}, expected {expected}")]
    StatusChanged {
        expected: DeliveryStatus,
        found: DeliveryStatus,
    },
}

// ---------------------------------------------------------------------------
// AuditEntry / Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub reason: AuditReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome data captured by transitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Rendered content and transport metadata merged in by `deliver`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// DeliveryRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub communication_id: String,
    pub recipient_id: String,
    /// Delivery address captured at scheduling time, used for search.
    pub address: String,
    pub status: DeliveryStatus,
    /// Next due time. Only meaningful while `status` is `Scheduled`.
    pub processing_at: DateTime<Utc>,
    /// Due time before the first postponement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_processing_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,
    #[serde(default)]
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// A new record in `Scheduled` state.
    pub fn new(
        communication_id: impl Into<String>,
        recipient_id: impl Into<String>,
        address: impl Into<String>,
        processing_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            communication_id: communication_id.into(),
            recipient_id: recipient_id.into(),
            address: address.into(),
            status: DeliveryStatus::Scheduled,
            processing_at,
            original_processing_at: None,
            audit_log: Vec::new(),
            payload: Payload::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DeliveryStatus::Scheduled && self.processing_at <= now
    }

    pub fn postpone_count(&self) -> usize {
        self.audit_log
            .iter()
            .filter(|e| e.action == AuditAction::Postpone)
            .count()
    }

    pub fn can_postpone(&self) -> bool {
        self.status == DeliveryStatus::Scheduled && self.postpone_count() < MAX_POSTPONES
    }

    fn require(&self, action: &'static str, status: DeliveryStatus) -> Result<(), TransitionRejected> {
        if self.status == status {
            Ok(())
        } else {
            Err(TransitionRejected::InvalidState {
                action,
                status: self.status,
            })
        }
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), TransitionRejected> {
        self.require("skip", DeliveryStatus::Scheduled)?;
        self.status = DeliveryStatus::Skipped;
        self.payload.skip_reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Push the due time back one day because the message cannot be composed yet.
    pub fn postpone(&mut self) -> Result<(), TransitionRejected> {
        self.require("postpone", DeliveryStatus::Scheduled)?;
        if self.postpone_count() >= MAX_POSTPONES {
            return Err(TransitionRejected::PostponeLimit {
                limit: MAX_POSTPONES,
            });
        }
        let next = self.processing_at + Duration::days(1);
        let now = Utc::now();
        self.original_processing_at.get_or_insert(self.processing_at);
        self.processing_at = next;
        self.audit_log.push(AuditEntry {
            at: now,
            action: AuditAction::Postpone,
            reason: AuditReason::NotProcessable,
            message: None,
        });
        self.updated_at = now;
        Ok(())
    }

    pub fn deliver(
        &mut self,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), TransitionRejected> {
        self.require("deliver", DeliveryStatus::Scheduled)?;
        self.status = DeliveryStatus::Delivered;
        self.payload
            .delivered
            .get_or_insert_with(Default::default)
            .extend(metadata);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a failure. Applies from any status; the audit log is kept.
    pub fn mark_error(&mut self, message: impl Into<String>) -> Result<(), TransitionRejected> {
        self.status = DeliveryStatus::Error;
        self.payload.last_error = Some(message.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Re-enter `Scheduled` after an error so the next pass re-evaluates it.
    pub fn retry(&mut self) -> Result<(), TransitionRejected> {
        self.require("retry", DeliveryStatus::Error)?;
        let now = Utc::now();
        self.audit_log.push(AuditEntry {
            at: now,
            action: AuditAction::Retry,
            reason: AuditReason::Error,
            message: self.payload.last_error.take(),
        });
        self.payload.delivered = None;
        self.payload.skip_reason = None;
        self.status = DeliveryStatus::Scheduled;
        self.updated_at = now;
        Ok(())
    }
}
