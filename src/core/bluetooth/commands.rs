//! Settings control commands
//! This module contains the control writes the settings service accepts and
//! the characteristic I/O seam used by the settings layer.

use async_trait::async_trait;
use log::info;
use uuid::Uuid;

use crate::core::bluetooth::constants::{UUID_SAVE_TO_FLASH, UUID_SETTINGS_RESET};
use crate::core::bluetooth::manager::TransportSession;
use crate::core::error::IronResult;

/// Control commands of the settings service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Commit written settings to non-volatile storage
    SaveToFlash,
    /// Restore factory defaults
    FactoryReset,
}

impl ControlCommand {
    pub fn characteristic(&self) -> Uuid {
        match self {
            Self::SaveToFlash => UUID_SAVE_TO_FLASH,
            Self::FactoryReset => UUID_SETTINGS_RESET,
        }
    }

    /// Convert the command to its byte representation
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![0x01]
    }
}

/// Read and write access to characteristics of the connected iron
#[async_trait]
pub trait CharacteristicIo: Send + Sync {
    async fn read(&self, characteristic: Uuid) -> IronResult<Vec<u8>>;

    async fn write(&self, characteristic: Uuid, value: Vec<u8>) -> IronResult<()>;
}

#[async_trait]
impl CharacteristicIo for TransportSession {
    async fn read(&self, characteristic: Uuid) -> IronResult<Vec<u8>> {
        TransportSession::read(self, characteristic).await
    }

    async fn write(&self, characteristic: Uuid, value: Vec<u8>) -> IronResult<()> {
        TransportSession::write(self, characteristic, value).await
    }
}

/// Sends control commands to the iron
pub struct CommandExecutor<'a, T: CharacteristicIo + ?Sized> {
    io: &'a T,
}

impl<'a, T: CharacteristicIo + ?Sized> CommandExecutor<'a, T> {
    pub fn new(io: &'a T) -> Self {
        Self { io }
    }

    pub async fn send(&self, command: ControlCommand) -> IronResult<()> {
        info!("Sending command: {:?}", command);
        self.io
            .write(command.characteristic(), command.to_bytes())
            .await
    }

    /// Persist all previously written settings
    pub async fn save_to_flash(&self) -> IronResult<()> {
        self.send(ControlCommand::SaveToFlash).await
    }

    /// Reset every setting to its factory default
    pub async fn factory_reset(&self) -> IronResult<()> {
        self.send(ControlCommand::FactoryReset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    }

    #[async_trait]
    impl CharacteristicIo for Recorder {
        async fn read(&self, _characteristic: Uuid) -> IronResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn write(&self, characteristic: Uuid, value: Vec<u8>) -> IronResult<()> {
            self.writes.lock().unwrap().push((characteristic, value));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_control_commands_write_one() {
        let recorder = Recorder::default();
        let executor = CommandExecutor::new(&recorder);
        executor.save_to_flash().await.unwrap();
        executor.factory_reset().await.unwrap();

        assert_eq!(
            *recorder.writes.lock().unwrap(),
            vec![
                (UUID_SAVE_TO_FLASH, vec![1]),
                (UUID_SETTINGS_RESET, vec![1]),
            ]
        );
    }
}
