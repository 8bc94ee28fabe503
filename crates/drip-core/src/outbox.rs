//! File-based transport: each delivered message lands in `.drip/outbox/`.

use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::communication::Communication;
use crate::delivery::DeliveryRecord;
use crate::driver::{ComposeError, Mailer};
use crate::error::Result;
use crate::paths;
use crate::recipient::Recipient;

pub struct OutboxMailer {
    root: PathBuf,
}

impl OutboxMailer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Mailer for OutboxMailer {
    fn compose(
        &self,
        communication: &Communication,
        recipient: &Recipient,
    ) -> std::result::Result<serde_json::Map<String, serde_json::Value>, ComposeError> {
        if recipient.address.trim().is_empty() {
            return Err(ComposeError::NotProcessable(format!(
                "recipient '{}' has no address",
                recipient.id
            )));
        }
        let mut payload = serde_json::Map::new();
        payload.insert("subject".into(), communication.subject.clone().into());
        payload.insert("to".into(), recipient.address.clone().into());
        payload.insert("composed_at".into(), Utc::now().to_rfc3339().into());
        Ok(payload)
    }

    fn send(&self, record: &DeliveryRecord) -> Result<()> {
        let path =
            paths::outbox_message_path(&self.root, &record.communication_id, &record.recipient_id);
        let message = json!({
            "communication": record.communication_id,
            "recipient": record.recipient_id,
            "address": record.address,
            "payload": record.payload.delivered,
            "sent_at": Utc::now().to_rfc3339(),
        });
        let data = serde_json::to_vec_pretty(&message)?;
        crate::io::atomic_write(&path, &data)?;
        tracing::debug!(path = %path.display(), "message written to outbox");
        Ok(())
    }
}
