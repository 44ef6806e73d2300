use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use helpline_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", &config.database.url, &["HELPLINE_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["HELPLINE_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new("channel.base_url", &config.channel.base_url, &["HELPLINE_CHANNEL_BASE_URL"]),
        Field::new(
            "channel.auth_token",
            redact_token(&config.channel.auth_token),
            &["HELPLINE_CHANNEL_AUTH_TOKEN"],
        ),
        Field::new(
            "channel.poll_interval_ms",
            config.channel.poll_interval_ms.to_string(),
            &["HELPLINE_CHANNEL_POLL_INTERVAL_MS"],
        ),
        Field::new(
            "channel.max_message_length",
            config.channel.max_message_length.to_string(),
            &["HELPLINE_CHANNEL_MAX_MESSAGE_LENGTH"],
        ),
        Field::new("llm.provider", config.llm.provider.as_str(), &["HELPLINE_LLM_PROVIDER"]),
        Field::new("llm.model", &config.llm.model, &["HELPLINE_LLM_MODEL"]),
        Field::new(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<provider default>"),
            &["HELPLINE_LLM_BASE_URL"],
        ),
        Field::new(
            "llm.api_key",
            config.llm.api_key.as_ref().map(redact_token).unwrap_or_else(|| "<unset>".to_string()),
            &["HELPLINE_LLM_API_KEY"],
        ),
        Field::new(
            "notification.enabled",
            config.notification.enabled.to_string(),
            &["HELPLINE_NOTIFICATION_ENABLED"],
        ),
        Field::new(
            "notification.relay_url",
            config.notification.relay_url.as_deref().unwrap_or("<unset>"),
            &["HELPLINE_NOTIFICATION_RELAY_URL"],
        ),
        Field::new(
            "notification.support_address",
            config.notification.support_address.as_deref().unwrap_or("<unset>"),
            &["HELPLINE_NOTIFICATION_SUPPORT_ADDRESS"],
        ),
        Field::new(
            "conversation.context_window",
            config.conversation.context_window.to_string(),
            &["HELPLINE_CONVERSATION_CONTEXT_WINDOW"],
        ),
        Field::new(
            "conversation.max_consecutive_failures",
            config.conversation.max_consecutive_failures.to_string(),
            &["HELPLINE_CONVERSATION_MAX_CONSECUTIVE_FAILURES"],
        ),
        Field::new(
            "conversation.default_country_code",
            &config.conversation.default_country_code,
            &["HELPLINE_CONVERSATION_DEFAULT_COUNTRY_CODE"],
        ),
        Field::new(
            "retention.retention_days",
            config.retention.retention_days.to_string(),
            &["HELPLINE_RETENTION_DAYS"],
        ),
        Field::new(
            "retention.sweep_interval_hours",
            config.retention.sweep_interval_hours.to_string(),
            &["HELPLINE_RETENTION_SWEEP_INTERVAL_HOURS"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["HELPLINE_SERVER_BIND_ADDRESS"],
        ),
        Field::new(
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["HELPLINE_SERVER_HEALTH_CHECK_PORT"],
        ),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["HELPLINE_LOGGING_LEVEL", "HELPLINE_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["HELPLINE_LOGGING_FORMAT", "HELPLINE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("helpline.toml"), PathBuf::from("config/helpline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Shows at most the last four characters of a secret.
fn redact_token(token: &SecretString) -> String {
    let trimmed = token.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let count = trimmed.chars().count();
    if count <= 8 {
        return "<redacted>".to_string();
    }

    let tail: String = trimmed.chars().skip(count - 4).collect();
    format!("***{tail}")
}
