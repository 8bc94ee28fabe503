use crate::config::CommunicationConfig;
use crate::error::Result;
use crate::expression::{Condition, TimeExpression};

/// A configured communication with its expressions parsed once.
#[derive(Debug, Clone)]
pub struct Communication {
    pub id: String,
    pub subject: String,
    pub condition: Condition,
    pub start_at: TimeExpression,
    pub enabled: bool,
}

impl Communication {
    pub fn compile(config: &CommunicationConfig) -> Result<Self> {
        Ok(Self {
            id: config.id.clone(),
            subject: config.subject.clone(),
            condition: Condition::parse(&config.condition)?,
            start_at: TimeExpression::parse(&config.start_at)?,
            enabled: config.enabled,
        })
    }

    /// Compile every communication, failing on the first malformed one.
    pub fn compile_all(configs: &[CommunicationConfig]) -> Result<Vec<Self>> {
        configs.iter().map(Self::compile).collect()
    }
}
