use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use anyhow::Result;
use bluest::{Adapter, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info};
use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::transport::{Advertisement, TransportEvent, TransportEventSender};

static MAC_ADDRESS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok());

/// Platform devices seen by the scanner, keyed by identifier
pub type DeviceMap = Arc<Mutex<HashMap<String, Device>>>;

pub struct BluetoothScanner {
    adapter: Adapter,
    devices: DeviceMap,
    events: TransportEventSender,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl BluetoothScanner {
    pub fn new(adapter: Adapter, devices: DeviceMap, events: TransportEventSender) -> Self {
        Self {
            adapter,
            devices,
            events,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    pub fn start_scan(&mut self, scan_id: u64, services: &[Uuid]) {
        if self.scan_task_handle.is_some() {
            self.stop_scan();
        }

        self.cancel_token = CancellationToken::new();
        let cancel_token_for_task = self.cancel_token.clone();
        let adapter_for_task = self.adapter.clone();
        let devices_for_task = self.devices.clone();
        let events_for_task = self.events.clone();
        let services = services.to_vec();

        let handle = tokio::spawn(async move {
            if let Err(e) = Self::internal_scan_task(
                adapter_for_task,
                devices_for_task,
                events_for_task.clone(),
                services,
                cancel_token_for_task,
            )
            .await
            {
                error!("Bluetooth scan failed: {}", e);
            }
            let _ = events_for_task.send(TransportEvent::ScanStopped { scan_id });
        });

        self.scan_task_handle = Some(handle);
        info!("Device scan task started.");
    }

    /// Scans for devices advertising any of `services` until cancelled
    async fn internal_scan_task(
        adapter: Adapter,
        devices: DeviceMap,
        events: TransportEventSender,
        services: Vec<Uuid>,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        // Irons already connected to the system do not advertise
        for device in adapter.connected_devices_with_services(&services).await? {
            Self::report_device(&devices, &events, device, None);
        }

        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&services).await?;

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered) => {
                            debug!("Found device - Device: {:?}, RSSI: {:?}", discovered.device, discovered.rssi);
                            let local_name = discovered.adv_data.local_name.clone();
                            let device = discovered.device;
                            let name = device.name().ok().or(local_name);
                            Self::report_device(&devices, &events, device, discovered.rssi.map(|r| (r, name)));
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    info!("Bluetooth scan cancelled.");
                    break;
                }
            }
        }
        Ok(())
    }

    pub fn stop_scan(&mut self) {
        info!("Stopping Bluetooth scan.");
        self.cancel_token.cancel();
        // The task reports ScanStopped once it observes the cancellation
        self.scan_task_handle.take();
    }

    /// Stores the device handle and reports its advertisement
    fn report_device(
        devices: &DeviceMap,
        events: &TransportEventSender,
        device: Device,
        signal: Option<(i16, Option<String>)>,
    ) {
        let id = device.id().to_string();
        let (rssi, name) = match signal {
            Some((rssi, name)) => (Some(rssi), name),
            None => (None, device.name().ok()),
        };
        let advertisement = Advertisement {
            address: Self::extract_mac_address(&id),
            id: id.clone(),
            name,
            rssi,
        };
        debug!("Reporting device {:?}", advertisement);

        devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, device);
        let _ = events.send(TransportEvent::DeviceDiscovered(advertisement));
    }

    fn extract_mac_address(device_id_str: &str) -> Option<String> {
        MAC_ADDRESS
            .as_ref()?
            .find_iter(device_id_str)
            .last()
            .map(|m| m.as_str().to_uppercase())
    }
}
