use anyhow::Result;
use ironos_companion_lib::{
    config::{device_store::JsonDeviceStore, AppConfig},
    core::bluetooth::BluestTransport,
    logging,
    state::AppState,
    utils::{app_config_dir, ensure_directory_exists},
    SessionEvent,
};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(log::Level::Info);

    let config_dir = app_config_dir()?;
    ensure_directory_exists(&config_dir).await?;
    let config = AppConfig::load(&config_dir).await?;

    let (transport, transport_events) = BluestTransport::new().await?;
    let store = Arc::new(JsonDeviceStore::new(config_dir.clone()));
    let state = AppState::new(transport, transport_events, &config, store).await?;

    let mut events = state.session.subscribe();
    let resumed = if config.session.auto_reconnect {
        state.resume().await?
    } else {
        None
    };
    if resumed.is_none() {
        state.session.start_scan().await?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::DeviceListUpdated(devices)) => {
                    for device in devices {
                        info!("{} ({} dBm, {:?})", device.display_name(), device.rssi, device.signal_quality());
                    }
                }
                Ok(SessionEvent::ConnectionStateChanged(connection)) => info!("{}", connection.message()),
                Ok(SessionEvent::LiveStatus(status)) => info!("{:?}", status),
                Ok(SessionEvent::ConnectionFailed(message)) => warn!("{}", message),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} session event(s)", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                if let Err(e) = state.session.disconnect().await {
                    warn!("Disconnect on shutdown failed: {}", e);
                }
                break;
            }
        }
    }

    Ok(())
}
