//! Configuration loading and data folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Static service configuration, loaded once at startup from the TOML
/// config file. Operator-tunable values (send caps, sender identity,
/// cooldowns) live in the settings table instead and are snapshotted per
/// run, not here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChaserConfig {
    #[serde(default)]
    pub erp: ErpConfig,
    #[serde(default)]
    pub pdf: PdfConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

/// ERP source endpoint configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErpConfig {
    /// Base URL of the ERP HTTP API (e.g. `https://erp.example.com/api/v1`)
    pub base_url: Option<String>,
    /// API key sent on every request
    pub api_key: Option<String>,
    /// Page size for invoice listing
    pub page_size: Option<u32>,
    /// Requests per second allowed against the ERP API
    pub rate_limit_per_sec: Option<u32>,
}

/// PDF rendering collaborator configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PdfConfig {
    pub base_url: Option<String>,
}

/// Transactional email collaborator configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

/// Service-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    /// Public base URL used to build recipient-facing links
    pub public_base_url: Option<String>,
    /// Template for constructed payment URLs; placeholders:
    /// `{invoice_ref}`, `{contact_id}`, `{order_id}`
    pub payment_link_template: Option<String>,
    /// Secret used to derive recipient-scoped opt-out tokens
    pub optout_secret: Option<String>,
    /// Minutes between clock-triggered runs (0 disables the clock)
    pub run_interval_minutes: Option<u64>,
}

impl ChaserConfig {
    /// Load configuration from an explicit TOML file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load configuration from the first path that exists, falling back to
    /// defaults when no config file is present (collaborators stay
    /// unconfigured and the run orchestrator reports that at run time).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        match default_config_file() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// Data folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(cli_arg: Option<&Path>, env_var_name: &str) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }

    default_data_dir()
}

/// Get default configuration file path for the platform
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("chaser").join("config.toml"))
}

/// Get OS-dependent default data folder path
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("chaser"))
        .unwrap_or_else(|| PathBuf::from("./chaser_data"))
}

/// Ensure the data directory exists and return the database path inside it.
pub fn prepare_database_path(data_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(data_dir)?;
    Ok(data_dir.join("chaser.db"))
}
