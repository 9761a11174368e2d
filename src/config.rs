use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::auth::RoleMap;
use crate::state_machine::TransitionPolicy;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
const DEFAULT_UPLOADS_DIR: &str = "./uploads";
const DEFAULT_UTC_OFFSET_HOURS: i32 = 7;
const DEFAULT_NOTIFICATION_WORKERS: usize = 4;
const DEFAULT_NOTIFICATION_TIMEOUT_SECS: u64 = 60;
const DEFAULT_NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Report rendering settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// Offset of the zone stamps are rendered in (Asia/Jakarta = 7)
    #[serde(default = "default_utc_offset_hours")]
    #[validate(custom = "validate_utc_offset")]
    pub utc_offset_hours: i32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

/// Job positions mapped onto reviewer roles
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RolesConfig {
    #[serde(default = "default_area_manager_positions")]
    #[validate(length(min = 1))]
    pub area_manager_positions: Vec<String>,

    #[serde(default = "default_l1_support_positions")]
    #[validate(length(min = 1))]
    pub l1_support_positions: Vec<String>,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            area_manager_positions: default_area_manager_positions(),
            l1_support_positions: default_l1_support_positions(),
        }
    }
}

impl RolesConfig {
    pub fn role_map(&self) -> RoleMap {
        RoleMap::from_positions(&self.area_manager_positions, &self.l1_support_positions)
    }
}

/// Approval ladder switches
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Let L1 Support verify a session the area manager never reviewed
    #[serde(default)]
    pub allow_l1_without_manager: bool,
}

impl WorkflowConfig {
    pub fn policy(&self) -> TransitionPolicy {
        TransitionPolicy {
            allow_l1_without_manager: self.allow_l1_without_manager,
        }
    }
}

/// Notification pipeline sizing
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NotificationConfig {
    /// Jobs running concurrently
    #[serde(default = "default_notification_workers")]
    #[validate(range(min = 1, max = 256))]
    pub workers: usize,

    /// Deadline for a single job (render + all sends)
    #[serde(default = "default_notification_timeout_secs")]
    #[validate(range(min = 1))]
    pub task_timeout_secs: u64,

    #[serde(default = "default_notification_channel_capacity")]
    #[validate(custom = "validate_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            workers: default_notification_workers(),
            task_timeout_secs: default_notification_timeout_secs(),
            channel_capacity: default_notification_channel_capacity(),
        }
    }
}

impl NotificationConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Outbound mail settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    /// "log" (write messages to the tracing output) or "sendgrid"
    #[serde(default = "default_mail_provider")]
    #[validate(custom = "validate_mail_provider")]
    pub provider: String,

    #[serde(default)]
    pub sendgrid_api_key: Option<String>,

    #[serde(default = "default_sender_email")]
    #[validate(email)]
    pub sender_email: String,

    #[serde(default = "default_sender_name")]
    pub sender_name: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            provider: default_mail_provider(),
            sendgrid_api_key: None,
            sender_email: default_sender_email(),
            sender_name: default_sender_name(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Base URL of the web frontend, used for links in notifications
    #[serde(default = "default_frontend_url")]
    #[validate(url)]
    pub frontend_url: String,

    /// Directory holding uploaded files (`/uploads/...` URLs resolve here)
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,

    #[serde(default)]
    #[validate]
    pub report: ReportConfig,

    #[serde(default)]
    #[validate]
    pub roles: RolesConfig,

    #[serde(default)]
    #[validate]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    #[validate]
    pub notifications: NotificationConfig,

    #[serde(default)]
    #[validate]
    pub mail: MailConfig,
}

impl AppConfig {
    /// Minimal configuration for the given database; every section defaulted.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            frontend_url: default_frontend_url(),
            uploads_dir: default_uploads_dir(),
            report: ReportConfig::default(),
            roles: RolesConfig::default(),
            workflow: WorkflowConfig::default(),
            notifications: NotificationConfig::default(),
            mail: MailConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.mail.provider.eq_ignore_ascii_case("sendgrid")
            && self
                .mail
                .sendgrid_api_key
                .as_deref()
                .map_or(true, |key| key.trim().is_empty())
        {
            let mut err = ValidationError::new("sendgrid_api_key_required");
            err.message = Some(
                "Set APP__MAIL__SENDGRID_API_KEY when mail.provider is \"sendgrid\"".into(),
            );
            errors.add("mail", err);
        }

        if self.is_production() && self.mail.provider.eq_ignore_ascii_case("log") {
            let mut err = ValidationError::new("mail_provider_log_in_production");
            err.message =
                Some("The log mail provider only prints messages; configure sendgrid for production".into());
            errors.add("mail", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    300
}
fn default_db_acquire_timeout_secs() -> u64 {
    30
}

fn default_frontend_url() -> String {
    DEFAULT_FRONTEND_URL.to_string()
}

fn default_uploads_dir() -> String {
    DEFAULT_UPLOADS_DIR.to_string()
}

fn default_utc_offset_hours() -> i32 {
    DEFAULT_UTC_OFFSET_HOURS
}

fn default_area_manager_positions() -> Vec<String> {
    vec!["Area Manager".to_string()]
}

fn default_l1_support_positions() -> Vec<String> {
    vec!["L1 Support".to_string()]
}

fn default_notification_workers() -> usize {
    DEFAULT_NOTIFICATION_WORKERS
}

fn default_notification_timeout_secs() -> u64 {
    DEFAULT_NOTIFICATION_TIMEOUT_SECS
}

fn default_notification_channel_capacity() -> usize {
    DEFAULT_NOTIFICATION_CHANNEL_CAPACITY
}

fn default_mail_provider() -> String {
    "log".to_string()
}

fn default_sender_email() -> String {
    "no-reply@opname.local".to_string()
}

fn default_sender_name() -> String {
    "Opname".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_mail_provider(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "log" | "sendgrid" => Ok(()),
        _ => {
            let mut err = ValidationError::new("provider");
            err.message = Some("Must be one of: log, sendgrid".into());
            Err(err)
        }
    }
}

fn validate_utc_offset(hours: i32) -> Result<(), ValidationError> {
    if !(-12..=14).contains(&hours) {
        let mut err = ValidationError::new("utc_offset_hours");
        err.message = Some("utc_offset_hours must be between -12 and 14".into());
        return Err(err);
    }
    Ok(())
}

fn validate_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("channel_capacity");
        err.message = Some("channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("opname_api={},opname={}", level, level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] with an explicit config directory.
pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://opname.db?mode=rwc")?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    validate_config(&app_config)?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Runs derive validation plus the cross-field checks.
pub fn validate_config(app_config: &AppConfig) -> Result<(), AppConfigError> {
    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use std::io::Write;
    use tempfile::TempDir;

    fn base_config() -> AppConfig {
        AppConfig::new("sqlite::memory:".into(), "development".into())
    }

    fn write_config(dir: &TempDir, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.path().join(name)).unwrap();
        writeln!(file, "{}", content).unwrap();
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = base_config();
        assert!(validate_config(&cfg).is_ok());
        assert_eq!(cfg.report.utc_offset_hours, 7);
        assert!(!cfg.workflow.policy().allow_l1_without_manager);
        assert_eq!(cfg.roles.role_map().resolve("Area Manager"), Role::AreaManager);
    }

    #[test]
    fn sendgrid_requires_api_key() {
        let mut cfg = base_config();
        cfg.mail.provider = "sendgrid".into();
        let err = validate_config(&cfg).unwrap_err();
        match err {
            AppConfigError::Validation(errors) => {
                assert!(errors.errors().contains_key("mail"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        cfg.mail.sendgrid_api_key = Some("SG.key".into());
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn production_rejects_log_mailer() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut cfg = base_config();
        cfg.log_level = "loud".into();
        cfg.notifications.channel_capacity = 0;
        cfg.report.utc_offset_hours = 20;
        cfg.frontend_url = "not a url".into();
        assert!(matches!(
            validate_config(&cfg),
            Err(AppConfigError::Validation(_))
        ));
    }

    #[test]
    fn numeric_bounds_are_checked_per_section() {
        let report = ReportConfig {
            utc_offset_hours: -13,
        };
        let errors = report.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("utc_offset_hours"));
        assert!(ReportConfig { utc_offset_hours: 14 }.validate().is_ok());

        let notifications = NotificationConfig {
            channel_capacity: 0,
            ..NotificationConfig::default()
        };
        let errors = notifications.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("channel_capacity"));
        assert!(NotificationConfig::default().validate().is_ok());
    }

    #[test]
    fn file_layers_are_merged() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "default.toml",
            r#"
            database_url = "sqlite://from-file.db"
            frontend_url = "https://opname.example.com"

            [roles]
            area_manager_positions = ["Area Manager", "Regional Manager"]

            [workflow]
            allow_l1_without_manager = true
            "#,
        );

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.database_url, "sqlite://from-file.db");
        assert_eq!(cfg.frontend_url, "https://opname.example.com");
        assert!(cfg.workflow.allow_l1_without_manager);
        assert_eq!(
            cfg.roles.role_map().resolve("regional manager"),
            Role::AreaManager
        );
        assert_eq!(cfg.roles.l1_support_positions, vec!["L1 Support"]);
    }
}
