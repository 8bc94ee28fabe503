use crate::output::print_json;
use chrono::Utc;
use std::path::Path;

use super::Project;

pub fn run(root: &Path, communication: &str, json: bool) -> anyhow::Result<()> {
    let project = Project::open(root)?;
    let driver = project.driver()?;
    let report = driver.schedule_all(communication, Utc::now())?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "{communication}: {} scheduled, {} already scheduled, {} failed",
            report.scheduled, report.already_scheduled, report.failed
        );
    }
    Ok(())
}
