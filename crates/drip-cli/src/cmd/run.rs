use chrono::Utc;
use drip_core::driver::Driver;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use super::Project;

pub fn run(root: &Path, once: bool, json: bool) -> anyhow::Result<()> {
    let project = Project::open(root)?;
    let driver = project.driver()?;

    if once {
        let report = driver.tick(Utc::now())?;
        return super::tick::print_report(&report, json);
    }

    let poll = Duration::from_secs(project.config.driver.poll_interval_secs.max(1));
    info!(
        poll_interval_secs = poll.as_secs(),
        batch_size = project.config.driver.batch_size,
        "drip driver started"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let ticks = poll_until(&driver, poll, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
        info!(ticks, "shutting down");
    });
    Ok(())
}

/// Tick on every `poll` until `shutdown` resolves. Returns the number of ticks run.
///
/// `shutdown` is polled from the first pass on, so a signal that arrives while a
/// tick is running is seen on the next pass.
async fn poll_until(
    driver: &Driver<'_>,
    poll: Duration,
    shutdown: impl Future<Output = ()>,
) -> usize {
    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(poll);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut ticks = 0;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                ticks += 1;
                if let Err(e) = driver.tick(Utc::now()) {
                    error!(error = %e, "tick failed");
                }
            }
        }
    }
    ticks
}
