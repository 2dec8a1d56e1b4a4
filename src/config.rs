use crate::roster;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Turn a list of validation errors into a single error
pub fn ensure_valid(result: Result<(), Vec<ValidationError>>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(errors) => {
            let lines: Vec<String> = errors.iter().map(|e| format!("  {}", e)).collect();
            Err(anyhow::anyhow!(
                "Invalid configuration:\n{}",
                lines.join("\n")
            ))
        }
    }
}

/// Where the four SQL templates live
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_template_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_create_user_template")]
    pub create_user: PathBuf,
    #[serde(default = "default_lab_template")]
    pub lab: PathBuf,
    #[serde(default = "default_cleanup_user_template")]
    pub cleanup_user: PathBuf,
    #[serde(default = "default_cleanup_lab_template")]
    pub cleanup_lab: PathBuf,
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("Zero to Snowflake Lab Templates")
}
fn default_create_user_template() -> PathBuf {
    PathBuf::from("2020-06-17 -- Create User Template.sql")
}
fn default_lab_template() -> PathBuf {
    PathBuf::from("2020-06-17 -- Zero to Snowflake Lab Template.sql")
}
fn default_cleanup_user_template() -> PathBuf {
    PathBuf::from("2020-06-17 -- Cleanup User Template.sql")
}
fn default_cleanup_lab_template() -> PathBuf {
    PathBuf::from("2020-06-17 -- Cleanup Lab Template.sql")
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_template_dir(),
            create_user: default_create_user_template(),
            lab: default_lab_template(),
            cleanup_user: default_cleanup_user_template(),
            cleanup_lab: default_cleanup_lab_template(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("lab_content")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

/// The organizer the emails come from
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SenderConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_password_env")]
    pub password_env: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_password_env() -> Option<String> {
    Some("LABKIT_SMTP_PASSWORD".to_string())
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            email: String::new(),
            password_env: default_password_env(),
            password: None,
        }
    }
}

impl SenderConfig {
    /// Resolve the SMTP password from config or environment
    pub fn resolve_password(&self) -> Result<String> {
        // Direct password takes priority
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }

        if let Some(env_var) = &self.password_env {
            if let Ok(password) = std::env::var(env_var) {
                return Ok(password);
            }
            anyhow::bail!(
                "No SMTP password: set sender.password or the {} environment variable",
                env_var
            );
        }

        anyhow::bail!("No SMTP password: set sender.password or sender.password_env")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}
fn default_smtp_port() -> u16 {
    587
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    #[serde(default = "default_subject")]
    pub subject: String,
    /// Replaces the built-in body when set
    #[serde(default)]
    pub body_file: Option<PathBuf>,
}

fn default_subject() -> String {
    "Hashmap Zero to Snowflake | Snowflake Training Material".to_string()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            body_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "console" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "console".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// One person to email, and the generated user they were assigned
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Attendee {
    pub user: String,
    pub email: String,
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_user_count")]
    pub user_count: usize,
    #[serde(default = "default_identifier_prefix")]
    pub identifier_prefix: String,
    #[serde(default = "default_password_prefix")]
    pub password_prefix: String,
    #[serde(default)]
    pub account_url: String,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
}

fn default_user_count() -> usize {
    100
}
fn default_identifier_prefix() -> String {
    "USER_".to_string()
}
// Covers the upper/lower/digit requirements whatever the digest turns out to be
fn default_password_prefix() -> String {
    "aA1ffa".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_count: default_user_count(),
            identifier_prefix: default_identifier_prefix(),
            password_prefix: default_password_prefix(),
            account_url: String::new(),
            templates: TemplatesConfig::default(),
            output: OutputConfig::default(),
            sender: SenderConfig::default(),
            smtp: SmtpConfig::default(),
            email: EmailConfig::default(),
            logging: LoggingConfig::default(),
            attendees: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.labkit/config.local.toml) > project (.labkit/config.toml) > user (~/.labkit/config.toml)
    /// Files that don't exist are skipped; with none present the built-in defaults apply
    pub fn load() -> Result<Self> {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".labkit").join("config.toml"));
        }
        paths.push(Path::new(".labkit").join("config.toml"));
        // Credentials and attendee lists belong here; keep it out of version control
        paths.push(Path::new(".labkit").join("config.local.toml"));

        let mut merged = toml::Table::new();
        for path in paths.iter().filter(|p| p.exists()) {
            merge_tables(&mut merged, read_table(path)?);
        }
        Self::from_table(merged)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_table(read_table(path)?)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    fn from_table(table: toml::Table) -> Result<Self> {
        let config: Config = toml::Value::Table(table).try_into()?;
        Ok(config)
    }

    /// Output directory for generated scripts
    pub fn output_dir(&self) -> &Path {
        &self.output.dir
    }

    /// Directory holding the per-user lab scripts
    pub fn lab_scripts_dir(&self) -> PathBuf {
        self.output.dir.join(crate::generate::LAB_SCRIPTS_DIR)
    }

    /// Validate the settings both subcommands depend on
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.user_count == 0 {
            errors.push(ValidationError::new("user_count", "Must be greater than 0"));
        }

        // The identifier ends up as a SQL object name
        if !is_sql_identifier_prefix(&self.identifier_prefix) {
            errors.push(ValidationError::new(
                "identifier_prefix",
                format!(
                    "Invalid identifier prefix '{}', expected letters, digits and '_' not starting with a digit",
                    self.identifier_prefix
                ),
            ));
        }

        if self.password_prefix.is_empty() {
            errors.push(ValidationError::new(
                "password_prefix",
                "Must not be empty",
            ));
        }

        if self.account_url.is_empty() {
            errors.push(ValidationError::new("account_url", "Must be set"));
        } else if !(self.account_url.starts_with("https://")
            || self.account_url.starts_with("http://"))
        {
            errors.push(ValidationError::new(
                "account_url",
                format!("Expected an http(s) URL, got '{}'", self.account_url),
            ));
        }

        if !matches!(self.logging.format.as_str(), "console" | "json") {
            errors.push(ValidationError::new(
                "logging.format",
                format!(
                    "Invalid log format '{}', expected 'console' or 'json'",
                    self.logging.format
                ),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate everything `validate` does plus the sender, SMTP and attendee settings
    pub fn validate_notify(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = self.validate().err().unwrap_or_default();

        if self.sender.name.trim().is_empty() {
            errors.push(ValidationError::new("sender.name", "Must be set"));
        }
        if self.sender.email.is_empty() {
            errors.push(ValidationError::new("sender.email", "Must be set"));
        } else if let Err(e) = self.sender.email.parse::<lettre::Address>() {
            errors.push(ValidationError::new(
                "sender.email",
                format!("Invalid address '{}': {}", self.sender.email, e),
            ));
        }

        if self.smtp.host.is_empty() {
            errors.push(ValidationError::new("smtp.host", "Must be set"));
        }
        if self.smtp.port == 0 {
            errors.push(ValidationError::new("smtp.port", "Must be greater than 0"));
        }

        let mut seen = HashSet::new();
        for (i, attendee) in self.attendees.iter().enumerate() {
            if !roster::contains(&self.identifier_prefix, self.user_count, &attendee.user) {
                errors.push(ValidationError::new(
                    format!("attendees[{}].user", i),
                    format!(
                        "'{}' is not one of the {} generated users ({} .. {})",
                        attendee.user,
                        self.user_count,
                        roster::identifier(&self.identifier_prefix, 1),
                        roster::identifier(&self.identifier_prefix, self.user_count),
                    ),
                ));
            }
            if !seen.insert(attendee.user.as_str()) {
                errors.push(ValidationError::new(
                    format!("attendees[{}].user", i),
                    format!("'{}' is assigned to more than one attendee", attendee.user),
                ));
            }
            if let Err(e) = attendee.email.parse::<lettre::Address>() {
                errors.push(ValidationError::new(
                    format!("attendees[{}].email", i),
                    format!("Invalid address '{}': {}", attendee.email, e),
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn is_sql_identifier_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let table: toml::Table = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(table)
}

/// Merge `other` into `base` (other takes priority)
/// Nested tables are merged key by key; arrays and scalars are replaced whole
fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
