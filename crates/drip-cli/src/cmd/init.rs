use anyhow::Context;
use drip_core::{
    config::{CommunicationConfig, Config},
    io, paths,
};
use std::path::Path;

const RECIPIENTS_TEMPLATE: &str = "[]\n";

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing drip in: {}", root.display());

    for dir in [paths::DRIP_DIR, paths::OUTBOX_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    if paths::config_path(root).exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        starter_config()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let recipients = paths::recipients_path(root);
    if io::write_if_missing(&recipients, RECIPIENTS_TEMPLATE.as_bytes())
        .context("failed to write recipients.json")?
    {
        println!("  created: {}", paths::RECIPIENTS_FILE);
    } else {
        println!("  exists:  {}", paths::RECIPIENTS_FILE);
    }

    super::open_db(root)?;
    println!("  ready:   {}", paths::DELIVERIES_DB);

    Ok(())
}

/// One disabled example so the file documents its own shape.
fn starter_config() -> Config {
    let mut config = Config::default();
    config.communications.push(CommunicationConfig {
        condition: "entity.active == true".to_string(),
        start_at: "entity.created_at | add: 3, days".to_string(),
        enabled: false,
        ..CommunicationConfig::new("welcome", "Welcome aboard")
    });
    config
}
