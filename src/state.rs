//! Application state management
//! This module wires the transport session, the settings orchestrator and the
//! device store together.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::config::device_store::DeviceStore;
use crate::config::AppConfig;
use crate::core::bluetooth::{
    BleTransport, DeviceHandle, SessionEvent, TransportEventReceiver, TransportSession,
    UUID_DEVICE_ID, UUID_DEVICE_SERIAL,
};
use crate::core::settings::SettingsOrchestrator;

/// Global application state
pub struct AppState {
    pub session: TransportSession,
    pub settings: SettingsOrchestrator<TransportSession>,
    pub device_store: Arc<dyn DeviceStore>,
    /// Read from the store once at startup, then kept current on connect
    last_connected: LastConnected,
    follower: JoinHandle<()>,
}

type LastConnected = Arc<Mutex<Option<String>>>;

impl AppState {
    /// Starts the session on `transport` and restores remembered irons.
    pub async fn new<T: BleTransport>(
        transport: T,
        transport_events: TransportEventReceiver,
        config: &AppConfig,
        device_store: Arc<dyn DeviceStore>,
    ) -> Result<Self> {
        info!("Initializing transport session...");
        let session = TransportSession::spawn(transport, transport_events, &config.session);
        let settings = SettingsOrchestrator::new(session.clone(), &config.session);

        let stored = device_store.load().await?;
        if !stored.devices.is_empty() {
            session.restore_devices(stored.devices).await?;
        }
        let last_connected = Arc::new(Mutex::new(stored.last_connected));

        let follower = tokio::spawn(Self::follow_session(
            session.subscribe(),
            session.clone(),
            settings.clone(),
            device_store.clone(),
            last_connected.clone(),
        ));

        Ok(Self {
            session,
            settings,
            device_store,
            last_connected,
            follower,
        })
    }

    /// Tries to reconnect to the last connected iron, if one is remembered.
    pub async fn resume(&self) -> Result<Option<String>> {
        let last_connected = self
            .last_connected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(last_id) = last_connected else {
            debug!("No previously connected iron");
            return Ok(None);
        };
        self.session.auto_reconnect(&last_id).await?;
        Ok(Some(last_id))
    }

    async fn follow_session(
        mut events: broadcast::Receiver<SessionEvent>,
        session: TransportSession,
        settings: SettingsOrchestrator<TransportSession>,
        device_store: Arc<dyn DeviceStore>,
        last_connected: LastConnected,
    ) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Session follower skipped {} event(s)", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match event {
                SessionEvent::DeviceConnected(device) => {
                    let id = device.id.clone();
                    Self::on_connected(&session, &settings, device_store.as_ref(), device).await;
                    *last_connected.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
                }
                SessionEvent::DeviceDisconnected { .. } | SessionEvent::ConnectionFailed(_) => {
                    settings.clear();
                }
                _ => {}
            }
        }
        debug!("Session follower stopped");
    }

    async fn on_connected(
        session: &TransportSession,
        settings: &SettingsOrchestrator<TransportSession>,
        device_store: &dyn DeviceStore,
        device: DeviceHandle,
    ) {
        for characteristic in [UUID_DEVICE_SERIAL, UUID_DEVICE_ID] {
            if let Err(e) = session.read(characteristic).await {
                warn!("Could not read identity {}: {}", characteristic, e);
            }
        }

        let device = match session.connected_device().await {
            Ok(Some(current)) if current.id == device.id => current,
            _ => device,
        };
        if let Err(e) = device_store.remember(&device).await {
            error!("Failed to remember {}: {}", device.id, e);
        }

        if let Err(e) = settings.fetch_all().await {
            warn!("Settings unavailable for {}: {}", device.id, e);
        }
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.follower.abort();
    }
}
