use crate::error::{DripError, Result};
use crate::expression::{test_conditions, test_start_at};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// DriverConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Due records processed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_size() -> usize {
    100
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

// ---------------------------------------------------------------------------
// CommunicationConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationConfig {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    /// Eligibility condition; empty means every recipient.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
    /// When to deliver; empty means as soon as scheduled.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub start_at: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CommunicationConfig {
    pub fn new(id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            condition: String::new(),
            start_at: String::new(),
            enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub communications: Vec<CommunicationConfig>,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            driver: DriverConfig::default(),
            communications: Vec::new(),
        }
    }
}

impl Config {
    pub fn communication(&self, id: &str) -> Option<&CommunicationConfig> {
        self.communications.iter().find(|c| c.id == id)
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(DripError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut seen = HashSet::new();

        for comm in &self.communications {
            if comm.id.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "communication with an empty id".to_string(),
                });
            } else if !seen.insert(comm.id.as_str()) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("duplicate communication id '{}'", comm.id),
                });
            }

            if !test_conditions(&comm.condition) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "communication '{}' has an invalid condition: {}",
                        comm.id, comm.condition
                    ),
                });
            }

            if !test_start_at(&comm.start_at) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!(
                        "communication '{}' has an invalid start_at: {}",
                        comm.id, comm.start_at
                    ),
                });
            }

            if comm.subject.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("communication '{}' has no subject", comm.id),
                });
            }
        }

        if self.driver.batch_size == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "driver.batch_size is 0; ticks will process nothing".to_string(),
            });
        }

        warnings
    }
}
