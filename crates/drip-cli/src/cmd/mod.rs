pub mod check;
pub mod config;
pub mod delivery;
pub mod eval;
pub mod init;
pub mod run;
pub mod schedule;
pub mod tick;

use anyhow::Context;
use drip_core::communication::Communication;
use drip_core::config::Config;
use drip_core::delivery::DeliveryDb;
use drip_core::driver::Driver;
use drip_core::outbox::OutboxMailer;
use drip_core::paths;
use drip_core::recipient::JsonDirectory;
use std::path::Path;

/// Everything a driver borrows, loaded from the project directory.
pub struct Project {
    pub config: Config,
    pub db: DeliveryDb,
    pub directory: JsonDirectory,
    pub mailer: OutboxMailer,
}

impl Project {
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let config = Config::load(root).context("failed to load config")?;
        let db = open_db(root)?;
        let directory = JsonDirectory::load(root).context("failed to load recipients")?;
        Ok(Self {
            config,
            db,
            directory,
            mailer: OutboxMailer::new(root),
        })
    }

    pub fn driver(&self) -> anyhow::Result<Driver<'_>> {
        let communications = Communication::compile_all(&self.config.communications)
            .context("invalid communication in config")?;
        Ok(Driver::new(
            &self.db,
            &self.directory,
            &self.mailer,
            communications,
            self.config.driver.batch_size,
        ))
    }
}

pub fn open_db(root: &Path) -> anyhow::Result<DeliveryDb> {
    if !paths::drip_dir(root).is_dir() {
        anyhow::bail!(drip_core::DripError::NotInitialized);
    }
    let path = paths::deliveries_db_path(root);
    DeliveryDb::open(&path).with_context(|| format!("failed to open {}", path.display()))
}
