use crate::output::{print_json, print_table};
use clap::Subcommand;
use drip_core::delivery::{DeliveryDb, DeliveryRecord};
use drip_core::types::DeliveryStatus;
use drip_core::DripError;
use std::path::Path;

#[derive(Subcommand)]
pub enum DeliverySubcommand {
    /// List delivery records
    List {
        /// scheduled, delivered, skipped, or error
        #[arg(long)]
        status: Option<DeliveryStatus>,
        #[arg(long)]
        communication: Option<String>,
        #[arg(long)]
        recipient: Option<String>,
        /// SQL LIKE pattern on the address, e.g. "%@example.com"
        #[arg(long)]
        address: Option<String>,
    },
    /// Show one delivery record with its audit log
    Show {
        communication: String,
        recipient: String,
    },
    /// Re-schedule a delivery that ended in error
    Retry {
        communication: String,
        recipient: String,
    },
    /// Skip a scheduled delivery
    Skip {
        communication: String,
        recipient: String,
        #[arg(long, default_value = "manual")]
        reason: String,
    },
}

pub fn run(root: &Path, subcmd: DeliverySubcommand, json: bool) -> anyhow::Result<()> {
    let db = super::open_db(root)?;
    match subcmd {
        DeliverySubcommand::List {
            status,
            communication,
            recipient,
            address,
        } => list(
            &db,
            Filters {
                status,
                communication: communication.as_deref(),
                recipient: recipient.as_deref(),
                address: address.as_deref(),
            },
            json,
        ),
        DeliverySubcommand::Show {
            communication,
            recipient,
        } => show(&db, &communication, &recipient, json),
        DeliverySubcommand::Retry {
            communication,
            recipient,
        } => {
            let record = db.retry(&communication, &recipient)?;
            print_record_summary(&record, "rescheduled", json)
        }
        DeliverySubcommand::Skip {
            communication,
            recipient,
            reason,
        } => {
            let record = db.skip(&communication, &recipient, &reason)?;
            print_record_summary(&record, "skipped", json)
        }
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

struct Filters<'a> {
    status: Option<DeliveryStatus>,
    communication: Option<&'a str>,
    recipient: Option<&'a str>,
    address: Option<&'a str>,
}

impl Filters<'_> {
    fn query(&self, db: &DeliveryDb) -> drip_core::Result<Vec<DeliveryRecord>> {
        if let Some(pattern) = self.address {
            db.search_address(pattern)
        } else if let Some(comm) = self.communication {
            db.by_communication(comm)
        } else if let Some(recipient) = self.recipient {
            db.by_recipient(recipient)
        } else if let Some(status) = self.status {
            db.by_status(status)
        } else {
            db.list_all()
        }
    }

    fn matches(&self, r: &DeliveryRecord) -> bool {
        self.status.map_or(true, |s| r.status == s)
            && self.communication.map_or(true, |c| r.communication_id == c)
            && self.recipient.map_or(true, |id| r.recipient_id == id)
    }
}

fn list(db: &DeliveryDb, filters: Filters<'_>, json: bool) -> anyhow::Result<()> {
    let records: Vec<DeliveryRecord> = filters
        .query(db)?
        .into_iter()
        .filter(|r| filters.matches(r))
        .collect();

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No deliveries.");
        return Ok(());
    }
    let rows = records
        .iter()
        .map(|r| {
            vec![
                r.communication_id.clone(),
                r.recipient_id.clone(),
                r.address.clone(),
                r.status.to_string(),
                due_column(r),
            ]
        })
        .collect();
    print_table(
        &["COMMUNICATION", "RECIPIENT", "ADDRESS", "STATUS", "DUE"],
        rows,
    );
    Ok(())
}

fn due_column(r: &DeliveryRecord) -> String {
    if r.status == DeliveryStatus::Scheduled {
        r.processing_at.format("%Y-%m-%d %H:%M").to_string()
    } else {
        "-".to_string()
    }
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(db: &DeliveryDb, communication: &str, recipient: &str, json: bool) -> anyhow::Result<()> {
    let record = db
        .get(communication, recipient)?
        .ok_or_else(|| DripError::DeliveryNotFound {
            communication: communication.to_string(),
            recipient: recipient.to_string(),
        })?;

    if json {
        return print_json(&record);
    }

    println!("Delivery:      {}/{}", record.communication_id, record.recipient_id);
    println!("Address:       {}", record.address);
    println!("Status:        {}", record.status);
    println!("Processing at: {}", record.processing_at.to_rfc3339());
    if let Some(original) = record.original_processing_at {
        println!("Originally at: {}", original.to_rfc3339());
    }
    if let Some(reason) = &record.payload.skip_reason {
        println!("Skip reason:   {reason}");
    }
    if let Some(err) = &record.payload.last_error {
        println!("Last error:    {err}");
    }
    if let Some(delivered) = &record.payload.delivered {
        println!("Delivered:     {}", serde_json::Value::Object(delivered.clone()));
    }
    if !record.audit_log.is_empty() {
        println!("\nAudit log:");
        for entry in &record.audit_log {
            let message = entry
                .message
                .as_deref()
                .map(|m| format!(" ({m})"))
                .unwrap_or_default();
            println!(
                "  {}  {} [{}]{message}",
                entry.at.format("%Y-%m-%d %H:%M:%S"),
                entry.action,
                entry.reason
            );
        }
    }
    Ok(())
}

fn print_record_summary(record: &DeliveryRecord, verb: &str, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(record)
    } else {
        println!(
            "{}/{} {verb} ({})",
            record.communication_id, record.recipient_id, record.status
        );
        Ok(())
    }
}
