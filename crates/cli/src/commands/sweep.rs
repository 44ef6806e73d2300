use chrono::Utc;
use helpline_agent::{RetentionSweeper, SweepReport};
use helpline_db::Repositories;

use crate::commands::{open_migrated, prepare, CommandResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("sweep") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let sweeper =
            RetentionSweeper::from_config(Repositories::sql(pool.clone()), &config.retention);
        let report = sweeper.run_cycle(Utc::now()).await;
        pool.close().await;
        Ok::<SweepReport, (&'static str, String, u8)>(report)
    });

    match result {
        Ok(report) if report.failed_steps > 0 => CommandResult::failure(
            "sweep",
            "sweep_step",
            format!("{} of 3 sweep steps failed; {}", report.failed_steps, summarize(&report)),
            6,
        ),
        Ok(report) => CommandResult::success(
            "sweep",
            format!(
                "purged data older than {} days; {}",
                config.retention.retention_days,
                summarize(&report)
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}

fn summarize(report: &SweepReport) -> String {
    format!(
        "messages={} escalations={} resolved_escalations={} stale_states={}",
        report.messages_deleted,
        report.escalations_deleted,
        report.resolved_escalations_deleted,
        report.stale_states_deleted
    )
}
