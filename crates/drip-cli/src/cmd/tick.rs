use crate::output::print_json;
use chrono::Utc;
use drip_core::driver::TickReport;
use std::path::Path;

use super::Project;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let project = Project::open(root)?;
    let report = project.driver()?.tick(Utc::now())?;
    print_report(&report, json)
}

pub fn print_report(report: &TickReport, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(report)?;
    } else {
        println!(
            "due {}: {} delivered, {} skipped, {} postponed, {} errored, {} contended, {} failed",
            report.due,
            report.delivered,
            report.skipped,
            report.postponed,
            report.errored,
            report.contended,
            report.failed
        );
    }
    Ok(())
}
