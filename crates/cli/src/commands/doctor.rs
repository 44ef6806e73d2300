use helpline_core::config::{AppConfig, LlmProvider, LoadOptions};
use helpline_db::{connect_or_create, migrations};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["gateway_readiness", "llm_readiness", "notification_readiness", "database_connectivity"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_gateway(&config));
            checks.push(check_llm(&config));
            checks.push(check_notifications(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_gateway(config: &AppConfig) -> DoctorCheck {
    let token_present = !config.channel.auth_token.expose_secret().trim().is_empty();
    DoctorCheck {
        name: "gateway_readiness",
        status: if token_present { CheckStatus::Pass } else { CheckStatus::Fail },
        details: format!(
            "gateway `{}`, bearer token {}",
            config.channel.base_url,
            if token_present { "present" } else { "missing" }
        ),
    }
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    let key_needed = config.llm.provider == LlmProvider::Gemini;
    let key_present = config
        .llm
        .api_key
        .as_ref()
        .map(|key| !key.expose_secret().trim().is_empty())
        .unwrap_or(false);
    let ready = !key_needed || key_present;

    DoctorCheck {
        name: "llm_readiness",
        status: if ready { CheckStatus::Pass } else { CheckStatus::Fail },
        details: format!(
            "provider {} model `{}`{}",
            config.llm.provider.as_str(),
            config.llm.model,
            if key_needed && !key_present { ", api key missing" } else { "" }
        ),
    }
}

fn check_notifications(config: &AppConfig) -> DoctorCheck {
    if !config.notification.enabled {
        return DoctorCheck {
            name: "notification_readiness",
            status: CheckStatus::Pass,
            details: "notifications disabled; tickets are recorded without email".to_string(),
        };
    }

    DoctorCheck {
        name: "notification_readiness",
        status: CheckStatus::Pass,
        details: format!(
            "relay `{}`, staff inbox `{}`",
            config.notification.relay_url.as_deref().unwrap_or("<unset>"),
            config.notification.support_address.as_deref().unwrap_or("<unset>")
        ),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_or_create(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let applied = migrations::applied_count(&pool).await.unwrap_or(0);
        pool.close().await;
        Ok::<i64, String>(applied)
    });

    match result {
        Ok(applied) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!(
                "connected using `{}` ({applied} migrations applied)",
                config.database.url
            ),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
