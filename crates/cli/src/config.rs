use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use orchestrator::{NodeCommandTemplates, OrchestratorConfig};
use serde::{Deserialize, Serialize};

pub const CTL_DIR: &str = ".universe-ctl";
pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_DB_NAME: &str = "universes.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CtlConfig {
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub node_commands: NodeCommandTemplates,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Relative paths resolve against the `.universe-ctl` directory.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DB_NAME),
        }
    }
}

impl CtlConfig {
    pub fn database_path(&self, ctl_dir: &Path) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            ctl_dir.join(&self.database.path)
        }
    }

    pub async fn load(ctl_dir: &Path) -> Result<Self> {
        let config_path = ctl_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid config at {}", config_path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
