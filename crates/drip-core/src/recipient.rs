//! Recipients and the directory the driver looks them up in.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::context::RecordContext;
use crate::error::Result;
use crate::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Recipient {
    /// Attributes exposed to expressions. `id` and `address` are included
    /// unless the attributes already define them.
    pub fn context(&self) -> RecordContext {
        let mut attributes = self.attributes.clone();
        attributes
            .entry("id")
            .or_insert_with(|| self.id.clone().into());
        attributes
            .entry("address")
            .or_insert_with(|| self.address.clone().into());
        RecordContext::new(attributes)
    }
}

/// Source of recipients, owned by the surrounding application.
pub trait RecipientDirectory {
    fn lookup(&self, id: &str) -> Result<Option<Recipient>>;
    fn list(&self) -> Result<Vec<Recipient>>;
}

/// Directory loaded from `.drip/recipients.json` (a JSON array).
#[derive(Debug, Clone, Default)]
pub struct JsonDirectory {
    recipients: Vec<Recipient>,
}

impl JsonDirectory {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self { recipients }
    }

    /// A missing file is an empty directory.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::recipients_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let recipients: Vec<Recipient> = serde_json::from_str(&data)?;
        Ok(Self::new(recipients))
    }
}

impl RecipientDirectory for JsonDirectory {
    fn lookup(&self, id: &str) -> Result<Option<Recipient>> {
        Ok(self.recipients.iter().find(|r| r.id == id).cloned())
    }

    fn list(&self) -> Result<Vec<Recipient>> {
        Ok(self.recipients.clone())
    }
}
