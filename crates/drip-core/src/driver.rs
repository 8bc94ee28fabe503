//! Schedule driver: creates delivery records and works through the due ones.
//!
//! The driver keeps no state between ticks. Every decision is recorded on the
//! delivery record through a guarded transition, so several drivers may poll
//! the same store. Claiming a record is a `deliver` compare-and-set from
//! `Scheduled`; only the winner hands the message to the transport.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::communication::Communication;
use crate::context::{RecordContext, Scope};
use crate::delivery::{DeliveryDb, DeliveryRecord};
use crate::error::{DripError, Result};
use crate::recipient::{Recipient, RecipientDirectory};
use crate::types::DeliveryStatus;

pub const SKIP_CONDITION_NOT_MET: &str = "condition_not_met";
pub const SKIP_COMMUNICATION_DISABLED: &str = "communication_disabled";

// ---------------------------------------------------------------------------
// Mailer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// Transient: try again later.
    #[error("not processable yet: {0}")]
    NotProcessable(String),

    #[error("compose failed: {0}")]
    Failed(String),
}

/// Message transport owned by the surrounding application.
pub trait Mailer {
    /// Render the message for `recipient`. The returned map is stored on the
    /// record as its delivered payload.
    fn compose(
        &self,
        communication: &Communication,
        recipient: &Recipient,
    ) -> std::result::Result<serde_json::Map<String, serde_json::Value>, ComposeError>;

    /// Hand a claimed (already `Delivered`) record to the transport.
    fn send(&self, record: &DeliveryRecord) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    Scheduled(DeliveryRecord),
    AlreadyScheduled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub scheduled: usize,
    pub already_scheduled: usize,
    pub failed: usize,
}

/// What happened to one due record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Delivered,
    Skipped,
    Postponed,
    Errored,
    /// Another worker moved the record first.
    Contended,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub postponed: usize,
    pub errored: usize,
    pub contended: usize,
    /// Records whose processing hit a storage failure.
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, outcome: TickOutcome) {
        match outcome {
            TickOutcome::Delivered => self.delivered += 1,
            TickOutcome::Skipped => self.skipped += 1,
            TickOutcome::Postponed => self.postponed += 1,
            TickOutcome::Errored => self.errored += 1,
            TickOutcome::Contended => self.contended += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct Driver<'a> {
    db: &'a DeliveryDb,
    directory: &'a dyn RecipientDirectory,
    mailer: &'a dyn Mailer,
    communications: Vec<Communication>,
    batch_size: usize,
}

/// Expressions see the recipient as `entity` and the evaluation time as `now`.
pub fn evaluation_scope(ctx: &RecordContext, now: DateTime<Utc>) -> Scope<'_> {
    Scope::new().with_context("entity", ctx).with_value("now", now)
}

/// Treat a lost compare-and-set as contention rather than a failure.
fn settle(result: Result<DeliveryRecord>, outcome: TickOutcome) -> Result<TickOutcome> {
    match result {
        Ok(_) => Ok(outcome),
        Err(DripError::Rejected(_)) => Ok(TickOutcome::Contended),
        Err(e) => Err(e),
    }
}

impl<'a> Driver<'a> {
    pub fn new(
        db: &'a DeliveryDb,
        directory: &'a dyn RecipientDirectory,
        mailer: &'a dyn Mailer,
        communications: Vec<Communication>,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            directory,
            mailer,
            communications,
            batch_size,
        }
    }

    pub fn communication(&self, id: &str) -> Option<&Communication> {
        self.communications.iter().find(|c| c.id == id)
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Create the delivery record for one recipient. `start_at` decides the
    /// due time; when unset the record is due at `now`.
    pub fn schedule(
        &self,
        communication_id: &str,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome> {
        let comm = self
            .communication(communication_id)
            .ok_or_else(|| DripError::CommunicationNotFound(communication_id.to_string()))?;

        if self.db.get(&comm.id, &recipient.id)?.is_some() {
            return Ok(ScheduleOutcome::AlreadyScheduled);
        }

        let ctx = recipient.context();
        let processing_at = comm.start_at.evaluate(&evaluation_scope(&ctx, now))?.unwrap_or(now);
        let record = DeliveryRecord::new(&comm.id, &recipient.id, &recipient.address, processing_at);
        match self.db.create(&record) {
            Ok(()) => {
                debug!(
                    communication = %comm.id,
                    recipient = %recipient.id,
                    processing_at = %processing_at,
                    "delivery scheduled"
                );
                Ok(ScheduleOutcome::Scheduled(record))
            }
            Err(DripError::DeliveryExists { .. }) => Ok(ScheduleOutcome::AlreadyScheduled),
            Err(e) => Err(e),
        }
    }

    /// Schedule every recipient in the directory. Per-recipient failures are
    /// logged and counted.
    pub fn schedule_all(&self, communication_id: &str, now: DateTime<Utc>) -> Result<ScheduleReport> {
        let comm = self
            .communication(communication_id)
            .ok_or_else(|| DripError::CommunicationNotFound(communication_id.to_string()))?;

        let mut report = ScheduleReport::default();
        for recipient in self.directory.list()? {
            match self.schedule(&comm.id, &recipient, now) {
                Ok(ScheduleOutcome::Scheduled(_)) => report.scheduled += 1,
                Ok(ScheduleOutcome::AlreadyScheduled) => report.already_scheduled += 1,
                Err(e) => {
                    warn!(
                        communication = %comm.id,
                        recipient = %recipient.id,
                        error = %e,
                        "failed to schedule delivery"
                    );
                    report.failed += 1;
                }
            }
        }
        info!(
            communication = %comm.id,
            scheduled = report.scheduled,
            already_scheduled = report.already_scheduled,
            failed = report.failed,
            "scheduling complete"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Process records due by `now`, at most `batch_size` of them.
    ///
    /// Only a failure to query the store aborts the tick.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let due = self.db.due(now, self.batch_size)?;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        for record in &due {
            match self.process(record, now) {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    warn!(
                        communication = %record.communication_id,
                        recipient = %record.recipient_id,
                        error = %e,
                        "failed to process delivery"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                delivered = report.delivered,
                skipped = report.skipped,
                postponed = report.postponed,
                errored = report.errored,
                contended = report.contended,
                failed = report.failed,
                "tick complete"
            );
        }
        Ok(report)
    }

    fn process(&self, record: &DeliveryRecord, now: DateTime<Utc>) -> Result<TickOutcome> {
        let Some(comm) = self.communication(&record.communication_id) else {
            return self.fail(
                record,
                format!("communication not found: {}", record.communication_id),
            );
        };
        if !comm.enabled {
            return self.skip(record, SKIP_COMMUNICATION_DISABLED);
        }

        let recipient = match self.directory.lookup(&record.recipient_id) {
            Ok(Some(r)) => r,
            Ok(None) => {
                return self.fail(
                    record,
                    format!("recipient not found: {}", record.recipient_id),
                )
            }
            Err(e) => return self.fail(record, e.to_string()),
        };

        let ctx = recipient.context();
        match comm.condition.evaluate(&evaluation_scope(&ctx, now)) {
            Ok(true) => {}
            Ok(false) => return self.skip(record, SKIP_CONDITION_NOT_MET),
            Err(e) => return self.fail(record, format!("condition: {e}")),
        }

        let payload = match self.mailer.compose(comm, &recipient) {
            Ok(payload) => payload,
            Err(ComposeError::NotProcessable(reason)) => {
                return self.postpone_or_fail(record, &reason)
            }
            Err(ComposeError::Failed(msg)) => return self.fail(record, msg),
        };

        let claimed = match self.db.transition(
            &record.communication_id,
            &record.recipient_id,
            DeliveryStatus::Scheduled,
            |r| r.deliver(payload),
        ) {
            Ok(claimed) => claimed,
            Err(DripError::Rejected(_)) => {
                debug!(
                    communication = %record.communication_id,
                    recipient = %record.recipient_id,
                    "delivery claimed by another worker"
                );
                return Ok(TickOutcome::Contended);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.mailer.send(&claimed) {
            warn!(
                communication = %record.communication_id,
                recipient = %record.recipient_id,
                error = %e,
                "send failed"
            );
            let message = e.to_string();
            return settle(
                self.db.transition(
                    &record.communication_id,
                    &record.recipient_id,
                    DeliveryStatus::Delivered,
                    |r| r.mark_error(message),
                ),
                TickOutcome::Errored,
            );
        }

        info!(
            communication = %record.communication_id,
            recipient = %record.recipient_id,
            "delivered"
        );
        Ok(TickOutcome::Delivered)
    }

    fn skip(&self, record: &DeliveryRecord, reason: &str) -> Result<TickOutcome> {
        debug!(
            communication = %record.communication_id,
            recipient = %record.recipient_id,
            reason,
            "skipping delivery"
        );
        settle(
            self.db
                .skip(&record.communication_id, &record.recipient_id, reason),
            TickOutcome::Skipped,
        )
    }

    fn postpone_or_fail(&self, record: &DeliveryRecord, reason: &str) -> Result<TickOutcome> {
        if !record.can_postpone() {
            return self.fail(
                record,
                format!(
                    "not processable after {} postponements: {reason}",
                    record.postpone_count()
                ),
            );
        }
        debug!(
            communication = %record.communication_id,
            recipient = %record.recipient_id,
            reason,
            "postponing delivery"
        );
        settle(
            self.db.transition(
                &record.communication_id,
                &record.recipient_id,
                DeliveryStatus::Scheduled,
                |r| r.postpone(),
            ),
            TickOutcome::Postponed,
        )
    }

    fn fail(&self, record: &DeliveryRecord, message: String) -> Result<TickOutcome> {
        warn!(
            communication = %record.communication_id,
            recipient = %record.recipient_id,
            error = %message,
            "delivery failed"
        );
        settle(
            self.db.transition(
                &record.communication_id,
                &record.recipient_id,
                DeliveryStatus::Scheduled,
                |r| r.mark_error(message),
            ),
            TickOutcome::Errored,
        )
    }
}
