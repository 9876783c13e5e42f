//! Persistence of remembered irons and the last connected one.

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

use crate::core::bluetooth::DeviceHandle;
use crate::utils::ensure_directory_exists;

pub const DEVICES_FILE_NAME: &str = "devices.json";

/// What survives between launches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredDevices {
    pub devices: Vec<DeviceHandle>,
    pub last_connected: Option<String>,
}

impl StoredDevices {
    /// Inserts or replaces the record for `device` and makes it the last connected one.
    pub fn remember(&mut self, device: &DeviceHandle) {
        let record = DeviceHandle {
            connected: false,
            connected_at: None,
            ..device.clone()
        };
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = record,
            None => self.devices.push(record),
        }
        self.last_connected = Some(device.id.clone());
    }
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn load(&self) -> Result<StoredDevices>;

    /// Records a successful connection to `device`.
    async fn remember(&self, device: &DeviceHandle) -> Result<()>;
}

/// Stores records as pretty JSON in the config directory
pub struct JsonDeviceStore {
    dir: PathBuf,
}

impl JsonDeviceStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file_path(&self) -> PathBuf {
        self.dir.join(DEVICES_FILE_NAME)
    }
}

#[async_trait]
impl DeviceStore for JsonDeviceStore {
    async fn load(&self) -> Result<StoredDevices> {
        let file_path = self.file_path();
        if !file_path.exists() {
            warn!("No saved devices at {:?}", file_path);
            return Ok(StoredDevices::default());
        }

        let json = fs::read_to_string(&file_path).await?;
        let stored: StoredDevices = serde_json::from_str(&json)?;
        info!(
            "Loaded {} saved device(s) from {:?}",
            stored.devices.len(),
            file_path
        );
        Ok(stored)
    }

    async fn remember(&self, device: &DeviceHandle) -> Result<()> {
        let mut stored = self.load().await?;
        stored.remember(device);

        ensure_directory_exists(&self.dir).await?;
        let json = serde_json::to_string_pretty(&stored)?;
        fs::write(self.file_path(), json).await?;
        info!("Saved device {} as last connected", device.id);
        Ok(())
    }
}

/// Keeps records in memory only
#[derive(Default)]
pub struct MemoryDeviceStore {
    stored: Mutex<StoredDevices>,
}

impl MemoryDeviceStore {
    pub fn new(stored: StoredDevices) -> Self {
        Self {
            stored: Mutex::new(stored),
        }
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn load(&self) -> Result<StoredDevices> {
        Ok(self.stored.lock().await.clone())
    }

    async fn remember(&self, device: &DeviceHandle) -> Result<()> {
        self.stored.lock().await.remember(device);
        Ok(())
    }
}
