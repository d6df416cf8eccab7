use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::error::PilotError;

/// Name of the optional settings file inside the config directory
pub const SETTINGS_FILE: &str = "borgpilot.toml";

/// Top-level settings: borg environment variables layered over `borgpilot.toml`
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Directory holding patterns, roots, healthcheck UUIDs and the lock file
    pub config_dir: PathBuf,

    /// Remote repository (`BORG_REPO`)
    #[serde(default)]
    pub repo: Option<String>,

    /// Local repository (`BORG_LOCAL_REPO`)
    #[serde(default)]
    pub local_repo: Option<String>,

    /// Python logging config handed to borg (`BORG_LOGGING_CONF`)
    #[serde(default)]
    pub logging_conf: Option<PathBuf>,

    /// Mount point that must be present before touching a repository (`BORG_MNT_REQD`)
    #[serde(default)]
    pub mnt_reqd: Option<PathBuf>,

    /// Borg cache directory (`BORG_CACHE_DIR`)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Borg security directory (`BORG_SECURITY_DIR`)
    #[serde(default)]
    pub security_dir: Option<PathBuf>,

    #[serde(default)]
    pub borg: BorgSettings,

    #[serde(default)]
    pub create: CreateSettings,

    #[serde(default)]
    pub prune: PruneSettings,

    #[serde(default)]
    pub check: CheckSettings,

    #[serde(default)]
    pub logs: LogSettings,

    #[serde(default)]
    pub healthchecks: HealthcheckSettings,
}

/// How the borg binary is invoked
#[derive(Debug, Deserialize, Clone)]
pub struct BorgSettings {
    /// Program name or path of the borg binary
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Kill borg after this many seconds
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Options for `borg create`
#[derive(Debug, Deserialize, Clone)]
pub struct CreateSettings {
    /// Archive name, borg placeholders allowed
    #[serde(default = "default_archive_name")]
    pub archive_name: String,

    #[serde(default = "default_compression")]
    pub compression: String,

    #[serde(default = "default_true")]
    pub exclude_caches: bool,

    #[serde(default = "default_true")]
    pub one_file_system: bool,
}

/// Retention rules for `borg prune`
#[derive(Debug, Deserialize, Clone)]
pub struct PruneSettings {
    #[serde(default = "default_glob_archives")]
    pub glob_archives: String,

    #[serde(default)]
    pub keep_within: Option<String>,

    #[serde(default)]
    pub keep_hourly: u32,

    #[serde(default = "default_keep_daily")]
    pub keep_daily: u32,

    #[serde(default = "default_keep_weekly")]
    pub keep_weekly: u32,

    #[serde(default = "default_keep_monthly")]
    pub keep_monthly: u32,

    #[serde(default)]
    pub keep_yearly: u32,
}

/// Options for `borg check`
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CheckSettings {
    /// Read and verify every data chunk
    #[serde(default)]
    pub verify_data: bool,
}

/// Log directory and retention
#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    /// Defaults to `<config_dir>/logs`
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Rotated logs kept per log stem
    #[serde(default = "default_log_keep")]
    pub keep: usize,
}

/// healthchecks.io-style monitoring
#[derive(Debug, Deserialize, Clone)]
pub struct HealthcheckSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_ping_timeout")]
    pub timeout_seconds: u64,

    /// Attempts per ping
    #[serde(default = "default_retries")]
    pub retries: u32,
}

// Default values for optional configuration
fn default_binary() -> String {
    "borg".to_string()
}

fn default_archive_name() -> String {
    "{hostname}-{now:%Y-%m-%dT%H:%M:%S}".to_string()
}

fn default_compression() -> String {
    "auto,zstd".to_string()
}

fn default_glob_archives() -> String {
    "{hostname}-*".to_string()
}

fn default_keep_daily() -> u32 {
    7
}

fn default_keep_weekly() -> u32 {
    4
}

fn default_keep_monthly() -> u32 {
    6
}

fn default_log_keep() -> usize {
    30
}

fn default_base_url() -> String {
    "https://hc-ping.com".to_string()
}

fn default_ping_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for BorgSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            timeout_seconds: None,
        }
    }
}

impl Default for CreateSettings {
    fn default() -> Self {
        Self {
            archive_name: default_archive_name(),
            compression: default_compression(),
            exclude_caches: true,
            one_file_system: true,
        }
    }
}

impl Default for PruneSettings {
    fn default() -> Self {
        Self {
            glob_archives: default_glob_archives(),
            keep_within: None,
            keep_hourly: 0,
            keep_daily: default_keep_daily(),
            keep_weekly: default_keep_weekly(),
            keep_monthly: default_keep_monthly(),
            keep_yearly: 0,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: None,
            keep: default_log_keep(),
        }
    }
}

impl Default for HealthcheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            timeout_seconds: default_ping_timeout(),
            retries: default_retries(),
        }
    }
}

/// Look up an environment variable, treating empty values as unset
fn non_empty<'a>(env: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Resolve the config directory the same way borg does
pub fn resolve_config_dir(env: &HashMap<String, String>) -> Result<PathBuf> {
    if let Some(dir) = non_empty(env, "BORG_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Some(xdg) = non_empty(env, "XDG_CONFIG_HOME") {
        return Ok(Path::new(xdg).join("borg"));
    }
    if let Some(home) = non_empty(env, "HOME") {
        return Ok(Path::new(home).join(".config").join("borg"));
    }

    Err(anyhow::anyhow!(PilotError::ConfigError(
        "cannot locate the config directory: set BORG_CONFIG_DIR or HOME".to_string()
    )))
}

impl Settings {
    /// Load settings from the given environment and the optional settings file
    pub fn load(env: &HashMap<String, String>) -> Result<Self> {
        let config_dir = resolve_config_dir(env)?;
        let settings_path = config_dir.join(SETTINGS_FILE);

        let borg_vars: config::Map<String, String> = env
            .iter()
            .filter(|(key, _)| key.starts_with("BORG_"))
            .map(|(key, value)| (key.clone(), value.trim().to_string()))
            .collect();

        let layered = config::Config::builder()
            .add_source(
                File::from(settings_path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("BORG")
                    .source(Some(borg_vars))
                    .ignore_empty(true),
            )
            .set_override("config_dir", config_dir.to_string_lossy().to_string())
            .context("Failed to set config directory override")?
            .build()
            .with_context(|| format!("Failed to read settings: {:?}", settings_path))?;

        let settings: Settings = layered
            .try_deserialize()
            .with_context(|| format!("Failed to parse settings: {:?}", settings_path))?;

        Ok(settings)
    }

    /// Directory receiving borg logs
    pub fn log_dir(&self) -> PathBuf {
        self.logs
            .dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("logs"))
    }

    /// Create settings with default values for testing
    #[cfg(test)]
    pub fn for_testing(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            repo: Some("ssh://backup@example.com/./repo".to_string()),
            local_repo: Some(config_dir.join("local-repo").to_string_lossy().to_string()),
            logging_conf: None,
            mnt_reqd: None,
            cache_dir: None,
            security_dir: None,
            borg: BorgSettings::default(),
            create: CreateSettings::default(),
            prune: PruneSettings::default(),
            check: CheckSettings::default(),
            logs: LogSettings::default(),
            healthchecks: HealthcheckSettings::default(),
        }
    }
}
