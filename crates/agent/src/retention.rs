use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use helpline_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use helpline_core::config::RetentionConfig;
use helpline_db::Repositories;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub messages_deleted: u64,
    pub escalations_deleted: u64,
    pub resolved_escalations_deleted: u64,
    pub stale_states_deleted: u64,
    pub failed_steps: u32,
}

/// Purges aged conversation artifacts. User records are never touched.
pub struct RetentionSweeper {
    repos: Repositories,
    retention: chrono::Duration,
    period: Duration,
}

impl RetentionSweeper {
    pub fn new(repos: Repositories, retention_days: u32, sweep_interval_hours: u32) -> Self {
        Self {
            repos,
            retention: chrono::Duration::days(i64::from(retention_days)),
            period: Duration::from_secs(u64::from(sweep_interval_hours.max(1)) * 3_600),
        }
    }

    pub fn from_config(repos: Repositories, config: &RetentionConfig) -> Self {
        Self::new(repos, config.retention_days, config.sweep_interval_hours)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One sweep. Each step runs even when an earlier one failed.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> SweepReport {
        let cutoff = now - self.retention;
        let mut report = SweepReport::default();

        match self.repos.retention.purge_older_than(cutoff).await {
            Ok(counts) => {
                report.messages_deleted = counts.messages;
                report.escalations_deleted = counts.escalations;
            }
            Err(error) => {
                report.failed_steps += 1;
                step_failed("purge_older_than", &error);
            }
        }

        match self.repos.retention.purge_resolved_escalations().await {
            Ok(count) => report.resolved_escalations_deleted = count,
            Err(error) => {
                report.failed_steps += 1;
                step_failed("purge_resolved_escalations", &error);
            }
        }

        match self.repos.retention.purge_stale_conversation_states(cutoff).await {
            Ok(count) => report.stale_states_deleted = count,
            Err(error) => {
                report.failed_steps += 1;
                step_failed("purge_stale_conversation_states", &error);
            }
        }

        info!(
            event_name = "retention.sweep.completed",
            cutoff = %cutoff,
            messages_deleted = report.messages_deleted,
            escalations_deleted = report.escalations_deleted,
            resolved_escalations_deleted = report.resolved_escalations_deleted,
            stale_states_deleted = report.stale_states_deleted,
            failed_steps = report.failed_steps,
            "retention sweep finished"
        );

        let outcome =
            if report.failed_steps == 0 { AuditOutcome::Success } else { AuditOutcome::Degraded };
        let event = AuditEvent::new(
            None,
            format!("retention-{}", now.timestamp()),
            "retention.sweep",
            AuditCategory::Retention,
            outcome,
            format!(
                "Removed {} messages, {} escalations, {} resolved escalations, {} stale states",
                report.messages_deleted,
                report.escalations_deleted,
                report.resolved_escalations_deleted,
                report.stale_states_deleted
            ),
        )
        .at(now)
        .with_metadata("cutoff", cutoff.to_rfc3339())
        .with_metadata("failed_steps", report.failed_steps.to_string());
        if let Err(error) = self.repos.audit.record(&event).await {
            step_failed("audit", &error);
        }

        report
    }

    /// Sweeps every `period`, starting one period after the call.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event_name = "retention.sweep.scheduled",
            retention_days = self.retention.num_days(),
            interval_secs = self.period.as_secs(),
            "retention sweeper started"
        );
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(event_name = "retention.sweep.stopped", "retention sweeper stopped");
    }
}

fn step_failed(step: &str, error: &dyn std::fmt::Display) {
    warn!(
        event_name = "retention.sweep.step_failed",
        step,
        error = %error,
        "retention step failed; continuing with the next one"
    );
}
