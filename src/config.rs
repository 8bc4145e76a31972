//! Configuration management
//!
//! Settings live in a JSON file next to the database:
//! ```json
//! {
//!   "database": "inventario.db",
//!   "logLevel": "info",
//!   "import": { "autoRegister": true, "defaultKind": "TRANSFER_IN" }
//! }
//! ```
//! `INVENTARIO_DATABASE` and `INVENTARIO_LOG` override the file; CLI flags
//! override both.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::MovementKind;

pub const DEFAULT_DATABASE: &str = "inventario.db";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Raw settings file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    import: ImportSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportSettings {
    #[serde(default)]
    auto_register: Option<bool>,
    #[serde(default)]
    default_kind: Option<String>,
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database: String,
    pub log_level: String,
    /// Register unknown subjects and materials met during bulk import
    pub auto_register: bool,
    /// Kind for imported rows that carry no `Tipo_Movimiento`
    pub default_import_kind: MovementKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            auto_register: true,
            default_import_kind: MovementKind::TransferIn,
        }
    }
}

impl Config {
    /// Load config from a settings file, falling back to defaults when the
    /// file does not exist. Environment variables are applied on top.
    pub fn load(settings_path: &Path) -> Result<Self> {
        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(settings_path)
                .with_context(|| format!("Failed to read {}", settings_path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid settings file {}", settings_path.display()))?
        } else {
            SettingsFile::default()
        };

        let mut config = Self::from_settings(raw)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_settings(raw: SettingsFile) -> Result<Self> {
        let defaults = Self::default();

        let default_import_kind = match raw.import.default_kind.as_deref() {
            Some(label) => MovementKind::from_label(label)
                .ok_or_else(|| anyhow::anyhow!("Invalid import.defaultKind: {}", label))?,
            None => defaults.default_import_kind,
        };

        Ok(Self {
            database: raw.database.unwrap_or(defaults.database),
            log_level: raw.log_level.unwrap_or(defaults.log_level),
            auto_register: raw.import.auto_register.unwrap_or(defaults.auto_register),
            default_import_kind,
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(database) = lookup("INVENTARIO_DATABASE").filter(|s| !s.trim().is_empty()) {
            self.database = database;
        }
        if let Some(level) = lookup("INVENTARIO_LOG").filter(|s| !s.trim().is_empty()) {
            self.log_level = level;
        }
    }

    /// Save the managed fields back to a settings file
    pub fn save(&self, settings_path: &Path) -> Result<()> {
        let settings = SettingsFile {
            database: Some(self.database.clone()),
            log_level: Some(self.log_level.clone()),
            import: ImportSettings {
                auto_register: Some(self.auto_register),
                default_kind: Some(self.default_import_kind.as_str().to_string()),
            },
        };

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(settings_path, content)
            .with_context(|| format!("Failed to write {}", settings_path.display()))?;
        Ok(())
    }
}

/// Initializes tracing to stderr. `RUST_LOG` wins over the configured level.
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("inventario={}", level);
    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let _ = fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
}
