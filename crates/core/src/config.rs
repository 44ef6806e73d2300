use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
    pub llm: LlmConfig,
    pub notification: NotificationConfig,
    pub conversation: ConversationConfig,
    pub retention: RetentionConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Messaging gateway the poll loop reads from and replies through.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub base_url: String,
    pub auth_token: SecretString,
    pub poll_interval_ms: u64,
    pub max_message_length: usize,
    pub max_concurrent_users: usize,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub relay_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub from_name: String,
    pub from_address: String,
    pub support_address: Option<String>,
    pub timeout_secs: u64,
}

/// Knobs for the conversation state machine and escalation rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationConfig {
    pub context_window: u32,
    pub max_consecutive_failures: u32,
    pub default_country_code: String,
    pub local_number_digits: usize,
    pub long_conversation_threshold: i64,
    pub min_response_length: usize,
    pub faq_min_query_chars: usize,
    pub end_phrases: Vec<String>,
    pub escalation_phrases: Vec<String>,
    pub frustration_phrases: Vec<String>,
    pub confusion_phrases: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetentionConfig {
    pub retention_days: u32,
    pub sweep_interval_hours: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub channel_base_url: Option<String>,
    pub channel_auth_token: Option<String>,
    pub notification_enabled: Option<bool>,
    pub retention_days: Option<u32>,
    pub sweep_interval_hours: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_END_PHRASES: &[&str] =
    &["goodbye", "bye", "exit", "end", "quit", "thank you", "thanks"];

pub const DEFAULT_ESCALATION_PHRASES: &[&str] = &[
    "speak to someone",
    "speak to a human",
    "speak to a person",
    "talk to someone",
    "talk to a human",
    "talk to a person",
    "human agent",
    "real person",
    "live agent",
    "speak to an agent",
    "talk to an agent",
    "customer service representative",
];

pub const DEFAULT_FRUSTRATION_PHRASES: &[&str] = &[
    "not helpful",
    "this is useless",
    "you are useless",
    "frustrated",
    "frustrating",
    "waste of time",
    "ridiculous",
    "you're not helping",
    "you are not helping",
    "doesn't help",
    "still not working",
];

pub const DEFAULT_CONFUSION_PHRASES: &[&str] = &[
    "i don't understand",
    "i do not understand",
    "i'm not sure",
    "i am not sure",
    "not sure what you mean",
    "could you rephrase",
    "could you clarify",
    "i'm having trouble",
    "sorry, i couldn't",
    "i don't know",
];

fn phrases(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            context_window: 10,
            max_consecutive_failures: 3,
            default_country_code: "263".to_string(),
            local_number_digits: 9,
            long_conversation_threshold: 20,
            min_response_length: 20,
            faq_min_query_chars: 4,
            end_phrases: phrases(DEFAULT_END_PHRASES),
            escalation_phrases: phrases(DEFAULT_ESCALATION_PHRASES),
            frustration_phrases: phrases(DEFAULT_FRUSTRATION_PHRASES),
            confusion_phrases: phrases(DEFAULT_CONFUSION_PHRASES),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { retention_days: 7, sweep_interval_hours: 24 }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://helpline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            channel: ChannelConfig {
                base_url: "http://localhost:21465/api/wtc".to_string(),
                auth_token: String::new().into(),
                poll_interval_ms: 2_000,
                max_message_length: 500,
                max_concurrent_users: 4,
            },
            llm: LlmConfig {
                provider: LlmProvider::Gemini,
                api_key: None,
                base_url: None,
                model: "gemini-1.5-flash".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            notification: NotificationConfig {
                enabled: false,
                relay_url: None,
                api_key: None,
                from_name: "IT Support Chatbot".to_string(),
                from_address: "helpline@localhost".to_string(),
                support_address: None,
                timeout_secs: 30,
            },
            conversation: ConversationConfig::default(),
            retention: RetentionConfig::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("helpline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(channel) = patch.channel {
            if let Some(base_url) = channel.base_url {
                self.channel.base_url = base_url;
            }
            if let Some(channel_auth_token_value) = channel.auth_token {
                self.channel.auth_token = secret_value(channel_auth_token_value);
            }
            if let Some(poll_interval_ms) = channel.poll_interval_ms {
                self.channel.poll_interval_ms = poll_interval_ms;
            }
            if let Some(max_message_length) = channel.max_message_length {
                self.channel.max_message_length = max_message_length;
            }
            if let Some(max_concurrent_users) = channel.max_concurrent_users {
                self.channel.max_concurrent_users = max_concurrent_users;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(notification) = patch.notification {
            if let Some(enabled) = notification.enabled {
                self.notification.enabled = enabled;
            }
            if let Some(relay_url) = notification.relay_url {
                self.notification.relay_url = Some(relay_url);
            }
            if let Some(notification_api_key_value) = notification.api_key {
                self.notification.api_key = Some(secret_value(notification_api_key_value));
            }
            if let Some(from_name) = notification.from_name {
                self.notification.from_name = from_name;
            }
            if let Some(from_address) = notification.from_address {
                self.notification.from_address = from_address;
            }
            if let Some(support_address) = notification.support_address {
                self.notification.support_address = Some(support_address);
            }
            if let Some(timeout_secs) = notification.timeout_secs {
                self.notification.timeout_secs = timeout_secs;
            }
        }

        if let Some(conversation) = patch.conversation {
            let target = &mut self.conversation;
            if let Some(context_window) = conversation.context_window {
                target.context_window = context_window;
            }
            if let Some(max_consecutive_failures) = conversation.max_consecutive_failures {
                target.max_consecutive_failures = max_consecutive_failures;
            }
            if let Some(default_country_code) = conversation.default_country_code {
                target.default_country_code = default_country_code;
            }
            if let Some(local_number_digits) = conversation.local_number_digits {
                target.local_number_digits = local_number_digits;
            }
            if let Some(threshold) = conversation.long_conversation_threshold {
                target.long_conversation_threshold = threshold;
            }
            if let Some(min_response_length) = conversation.min_response_length {
                target.min_response_length = min_response_length;
            }
            if let Some(faq_min_query_chars) = conversation.faq_min_query_chars {
                target.faq_min_query_chars = faq_min_query_chars;
            }
            if let Some(end_phrases) = conversation.end_phrases {
                target.end_phrases = end_phrases;
            }
            if let Some(escalation_phrases) = conversation.escalation_phrases {
                target.escalation_phrases = escalation_phrases;
            }
            if let Some(frustration_phrases) = conversation.frustration_phrases {
                target.frustration_phrases = frustration_phrases;
            }
            if let Some(confusion_phrases) = conversation.confusion_phrases {
                target.confusion_phrases = confusion_phrases;
            }
        }

        if let Some(retention) = patch.retention {
            if let Some(retention_days) = retention.retention_days {
                self.retention.retention_days = retention_days;
            }
            if let Some(sweep_interval_hours) = retention.sweep_interval_hours {
                self.retention.sweep_interval_hours = sweep_interval_hours;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HELPLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("HELPLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("HELPLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("HELPLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HELPLINE_CHANNEL_BASE_URL") {
            self.channel.base_url = value;
        }
        if let Some(value) = read_env("HELPLINE_CHANNEL_AUTH_TOKEN") {
            self.channel.auth_token = secret_value(value);
        }
        if let Some(value) = read_env("HELPLINE_CHANNEL_POLL_INTERVAL_MS") {
            self.channel.poll_interval_ms = parse_u64("HELPLINE_CHANNEL_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_CHANNEL_MAX_MESSAGE_LENGTH") {
            self.channel.max_message_length =
                parse_usize("HELPLINE_CHANNEL_MAX_MESSAGE_LENGTH", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_CHANNEL_MAX_CONCURRENT_USERS") {
            self.channel.max_concurrent_users =
                parse_usize("HELPLINE_CHANNEL_MAX_CONCURRENT_USERS", &value)?;
        }

        if let Some(value) = read_env("HELPLINE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("HELPLINE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HELPLINE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("HELPLINE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("HELPLINE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("HELPLINE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("HELPLINE_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("HELPLINE_NOTIFICATION_ENABLED") {
            self.notification.enabled = parse_bool("HELPLINE_NOTIFICATION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_NOTIFICATION_RELAY_URL") {
            self.notification.relay_url = Some(value);
        }
        if let Some(value) = read_env("HELPLINE_NOTIFICATION_API_KEY") {
            self.notification.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HELPLINE_NOTIFICATION_FROM_ADDRESS") {
            self.notification.from_address = value;
        }
        if let Some(value) = read_env("HELPLINE_NOTIFICATION_SUPPORT_ADDRESS") {
            self.notification.support_address = Some(value);
        }

        if let Some(value) = read_env("HELPLINE_CONVERSATION_CONTEXT_WINDOW") {
            self.conversation.context_window =
                parse_u32("HELPLINE_CONVERSATION_CONTEXT_WINDOW", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_CONVERSATION_MAX_CONSECUTIVE_FAILURES") {
            self.conversation.max_consecutive_failures =
                parse_u32("HELPLINE_CONVERSATION_MAX_CONSECUTIVE_FAILURES", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_CONVERSATION_DEFAULT_COUNTRY_CODE") {
            self.conversation.default_country_code = value;
        }
        if let Some(value) = read_env("HELPLINE_CONVERSATION_LOCAL_NUMBER_DIGITS") {
            self.conversation.local_number_digits =
                parse_usize("HELPLINE_CONVERSATION_LOCAL_NUMBER_DIGITS", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_CONVERSATION_END_PHRASES") {
            self.conversation.end_phrases = parse_list(&value);
        }
        if let Some(value) = read_env("HELPLINE_CONVERSATION_ESCALATION_PHRASES") {
            self.conversation.escalation_phrases = parse_list(&value);
        }
        if let Some(value) = read_env("HELPLINE_CONVERSATION_FRUSTRATION_PHRASES") {
            self.conversation.frustration_phrases = parse_list(&value);
        }
        if let Some(value) = read_env("HELPLINE_CONVERSATION_CONFUSION_PHRASES") {
            self.conversation.confusion_phrases = parse_list(&value);
        }

        if let Some(value) = read_env("HELPLINE_RETENTION_DAYS") {
            self.retention.retention_days = parse_u32("HELPLINE_RETENTION_DAYS", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_RETENTION_SWEEP_INTERVAL_HOURS") {
            self.retention.sweep_interval_hours =
                parse_u32("HELPLINE_RETENTION_SWEEP_INTERVAL_HOURS", &value)?;
        }

        if let Some(value) = read_env("HELPLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("HELPLINE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("HELPLINE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("HELPLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("HELPLINE_LOGGING_LEVEL").or_else(|| read_env("HELPLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HELPLINE_LOGGING_FORMAT").or_else(|| read_env("HELPLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(channel_base_url) = overrides.channel_base_url {
            self.channel.base_url = channel_base_url;
        }
        if let Some(channel_auth_token) = overrides.channel_auth_token {
            self.channel.auth_token = secret_value(channel_auth_token);
        }
        if let Some(enabled) = overrides.notification_enabled {
            self.notification.enabled = enabled;
        }
        if let Some(retention_days) = overrides.retention_days {
            self.retention.retention_days = retention_days;
        }
        if let Some(sweep_interval_hours) = overrides.sweep_interval_hours {
            self.retention.sweep_interval_hours = sweep_interval_hours;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_channel(&self.channel)?;
        validate_llm(&self.llm)?;
        validate_notification(&self.notification)?;
        validate_conversation(&self.conversation)?;
        validate_retention(&self.retention)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("helpline.toml"), PathBuf::from("config/helpline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    if !is_http_url(&channel.base_url) {
        return Err(ConfigError::Validation(
            "channel.base_url must start with http:// or https://".to_string(),
        ));
    }

    if channel.auth_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "channel.auth_token is required. Use the bearer token issued by the messaging gateway"
                .to_string(),
        ));
    }

    if channel.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "channel.poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    if channel.max_message_length < 20 {
        return Err(ConfigError::Validation(
            "channel.max_message_length must be at least 20".to_string(),
        ));
    }

    if channel.max_concurrent_users == 0 {
        return Err(ConfigError::Validation(
            "channel.max_concurrent_users must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::Gemini => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the gemini provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {}
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_notification(notification: &NotificationConfig) -> Result<(), ConfigError> {
    if !notification.enabled {
        return Ok(());
    }

    match &notification.relay_url {
        Some(url) if is_http_url(url) => {}
        Some(_) => {
            return Err(ConfigError::Validation(
                "notification.relay_url must start with http:// or https://".to_string(),
            ))
        }
        None => {
            return Err(ConfigError::Validation(
                "notification.enabled is true but notification.relay_url is not configured"
                    .to_string(),
            ))
        }
    }

    let support_ok =
        notification.support_address.as_deref().map(|value| value.contains('@')).unwrap_or(false);
    if !support_ok {
        return Err(ConfigError::Validation(
            "notification.support_address must be an email address when notifications are enabled"
                .to_string(),
        ));
    }

    if notification.timeout_secs == 0 || notification.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "notification.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.context_window == 0 {
        return Err(ConfigError::Validation(
            "conversation.context_window must be greater than zero".to_string(),
        ));
    }

    if conversation.max_consecutive_failures == 0 {
        return Err(ConfigError::Validation(
            "conversation.max_consecutive_failures must be greater than zero".to_string(),
        ));
    }

    let code = conversation.default_country_code.trim();
    if code.is_empty() || !code.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ConfigError::Validation(
            "conversation.default_country_code must contain digits only".to_string(),
        ));
    }

    if conversation.local_number_digits == 0 {
        return Err(ConfigError::Validation(
            "conversation.local_number_digits must be greater than zero".to_string(),
        ));
    }

    if conversation.end_phrases.iter().all(|phrase| phrase.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "conversation.end_phrases must contain at least one phrase".to_string(),
        ));
    }

    if conversation.escalation_phrases.iter().all(|phrase| phrase.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "conversation.escalation_phrases must contain at least one phrase".to_string(),
        ));
    }

    Ok(())
}

fn validate_retention(retention: &RetentionConfig) -> Result<(), ConfigError> {
    if retention.retention_days == 0 {
        return Err(ConfigError::Validation(
            "retention.retention_days must be greater than zero".to_string(),
        ));
    }

    if retention.sweep_interval_hours == 0 {
        return Err(ConfigError::Validation(
            "retention.sweep_interval_hours must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|phrase| !phrase.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    channel: Option<ChannelPatch>,
    llm: Option<LlmPatch>,
    notification: Option<NotificationPatch>,
    conversation: Option<ConversationPatch>,
    retention: Option<RetentionPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    base_url: Option<String>,
    auth_token: Option<String>,
    poll_interval_ms: Option<u64>,
    max_message_length: Option<usize>,
    max_concurrent_users: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    enabled: Option<bool>,
    relay_url: Option<String>,
    api_key: Option<String>,
    from_name: Option<String>,
    from_address: Option<String>,
    support_address: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    context_window: Option<u32>,
    max_consecutive_failures: Option<u32>,
    default_country_code: Option<String>,
    local_number_digits: Option<usize>,
    long_conversation_threshold: Option<i64>,
    min_response_length: Option<usize>,
    faq_min_query_chars: Option<usize>,
    end_phrases: Option<Vec<String>>,
    escalation_phrases: Option<Vec<String>>,
    frustration_phrases: Option<Vec<String>>,
    confusion_phrases: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RetentionPatch {
    retention_days: Option<u32>,
    sweep_interval_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const REQUIRED_VARS: &[(&str, &str)] =
        &[("HELPLINE_CHANNEL_AUTH_TOKEN", "gateway-token"), ("HELPLINE_LLM_API_KEY", "ai-key")];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn set_vars(vars: &[(&str, &str)]) {
        for (key, value) in vars {
            env::set_var(key, value);
        }
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn clear_required() {
        clear_vars(&REQUIRED_VARS.iter().map(|(key, _)| *key).collect::<Vec<_>>());
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_GATEWAY_TOKEN", "token-from-env");
        env::set_var("TEST_GEMINI_KEY", "key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("helpline.toml");
            fs::write(
                &path,
                r#"
[channel]
auth_token = "${TEST_GATEWAY_TOKEN}"

[llm]
api_key = "${TEST_GEMINI_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.channel.auth_token.expose_secret() == "token-from-env",
                "gateway token should be loaded from environment",
            )?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "key-from-env")
                    == Some(true),
                "llm key should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_GATEWAY_TOKEN", "TEST_GEMINI_KEY"]);
        result
    }

    #[test]
    fn conversation_phrase_lists_come_from_file_and_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_vars(REQUIRED_VARS);
        env::set_var("HELPLINE_CONVERSATION_FRUSTRATION_PHRASES", "fed up, annoyed ,");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("helpline.toml");
            fs::write(
                &path,
                r#"
[conversation]
end_phrases = ["cheers", "done"]
max_consecutive_failures = 5

[retention]
retention_days = 14
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.conversation.end_phrases == vec!["cheers".to_string(), "done".to_string()],
                "end phrases should come from the file",
            )?;
            ensure(
                config.conversation.frustration_phrases
                    == vec!["fed up".to_string(), "annoyed".to_string()],
                "frustration phrases should be parsed from a comma separated env var",
            )?;
            ensure(config.conversation.max_consecutive_failures == 5, "threshold from file")?;
            ensure(config.retention.retention_days == 14, "retention days from file")?;
            ensure(config.retention.sweep_interval_hours == 24, "sweep interval keeps default")?;
            Ok(())
        })();

        clear_required();
        clear_vars(&["HELPLINE_CONVERSATION_FRUSTRATION_PHRASES"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_vars(REQUIRED_VARS);
        env::set_var("HELPLINE_LOG_LEVEL", "warn");
        env::set_var("HELPLINE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_required();
        clear_vars(&["HELPLINE_LOG_LEVEL", "HELPLINE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HELPLINE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("HELPLINE_CHANNEL_AUTH_TOKEN", "token-from-env");
        env::set_var("HELPLINE_LLM_API_KEY", "key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("helpline.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[channel]
auth_token = "token-from-file"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.channel.auth_token.expose_secret() == "token-from-env",
                "env gateway token should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "HELPLINE_DATABASE_URL",
            "HELPLINE_CHANNEL_AUTH_TOKEN",
            "HELPLINE_LLM_API_KEY",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HELPLINE_LLM_API_KEY", "ai-key");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("channel.auth_token")
            );
            ensure(has_message, "validation failure should mention channel.auth_token")
        })();

        clear_vars(&["HELPLINE_LLM_API_KEY"]);
        result
    }

    #[test]
    fn enabled_notifications_require_relay_and_support_address() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_vars(REQUIRED_VARS);

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    notification_enabled: Some(true),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            }) {
                Ok(_) => return Err("expected notification validation failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message) if message.contains("notification.relay_url")
                ),
                "validation failure should mention notification.relay_url",
            )
        })();

        clear_required();
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_vars(REQUIRED_VARS);
        env::set_var("HELPLINE_RETENTION_DAYS", "a week");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "HELPLINE_RETENTION_DAYS", "error should name the env key")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override failure".to_string()),
        };

        clear_required();
        clear_vars(&["HELPLINE_RETENTION_DAYS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HELPLINE_CHANNEL_AUTH_TOKEN", "gateway-secret-value");
        env::set_var("HELPLINE_LLM_API_KEY", "llm-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("gateway-secret-value"),
                "debug output should not contain gateway token",
            )?;
            ensure(!debug.contains("llm-secret-value"), "debug output should not contain llm key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["HELPLINE_CHANNEL_AUTH_TOKEN", "HELPLINE_LLM_API_KEY"]);
        result
    }
}
