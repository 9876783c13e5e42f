pub mod device_store;
pub mod session_config;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::session_config::SessionConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub session: SessionConfig,
}

impl AppConfig {
    pub async fn load(config_dir: &Path) -> Result<Self> {
        Ok(AppConfig {
            session: SessionConfig::load_config(config_dir).await?,
        })
    }

    pub async fn save(&self, config_dir: &Path) -> Result<()> {
        self.session.save_config(config_dir).await
    }
}
