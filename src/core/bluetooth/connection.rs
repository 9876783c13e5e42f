//! Bluetooth backend built on `bluest`
//! Runs every radio operation as its own task and reports the outcome to the
//! session as a transport event.

use bluest::{Adapter, Characteristic, ConnectionEvent, Device, Service, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::scanner::{BluetoothScanner, DeviceMap};
use crate::core::bluetooth::transport::{
    transport_channel, BleTransport, CharacteristicInfo, CharacteristicProperties,
    TransportEvent, TransportEventReceiver, TransportEventSender, WriteMode,
};
use crate::core::error::{IronError, IronResult};

/// Platform handles of the connected iron
#[derive(Default)]
struct Link {
    device: Option<Device>,
    services: HashMap<Uuid, Service>,
    characteristics: HashMap<Uuid, Characteristic>,
}

type SharedLink = Arc<Mutex<Link>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `BleTransport` backed by the system Bluetooth stack
pub struct BluestTransport {
    adapter: Adapter,
    events: TransportEventSender,
    devices: DeviceMap,
    link: SharedLink,
    scanner: BluetoothScanner,
    notification_handler: NotificationHandler,
}

impl BluestTransport {
    /// Opens the default adapter and waits until it is powered on.
    pub async fn new() -> IronResult<(Self, TransportEventReceiver)> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| IronError::transport("no Bluetooth adapter found"))?;
        adapter
            .wait_available()
            .await
            .map_err(IronError::transport)?;
        info!("Bluetooth adapter is available.");

        let (events, rx) = transport_channel();
        let devices: DeviceMap = Arc::new(Mutex::new(HashMap::new()));
        let scanner = BluetoothScanner::new(adapter.clone(), devices.clone(), events.clone());
        let notification_handler = NotificationHandler::new(events.clone());

        Ok((
            Self {
                adapter,
                events,
                devices,
                link: Arc::new(Mutex::new(Link::default())),
                scanner,
                notification_handler,
            },
            rx,
        ))
    }

    fn connected_device(&self) -> Option<Device> {
        lock(&self.link).device.clone()
    }

    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        lock(&self.link).characteristics.get(&uuid).cloned()
    }

    /// Reports link loss until the device disconnects or the stream ends
    async fn watch_connection(adapter: Adapter, device: Device, events: TransportEventSender) {
        let device_id = device.id().to_string();
        let mut connection_events = match adapter.device_connection_events(&device).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Connection events unavailable for {}: {}", device_id, e);
                return;
            }
        };
        while let Some(event) = connection_events.next().await {
            if matches!(event, ConnectionEvent::Disconnected) {
                let _ = events.send(TransportEvent::Disconnected {
                    device_id,
                    error: Some("link lost".to_string()),
                });
                return;
            }
        }
    }
}

fn properties_of(properties: bluest::CharacteristicProperties) -> CharacteristicProperties {
    CharacteristicProperties {
        read: properties.read,
        write: properties.write,
        write_without_response: properties.write_without_response,
        notify: properties.notify,
        indicate: properties.indicate,
    }
}

impl BleTransport for BluestTransport {
    fn start_scan(&mut self, scan_id: u64, services: &[Uuid]) {
        self.scanner.start_scan(scan_id, services);
    }

    fn stop_scan(&mut self) {
        self.scanner.stop_scan();
    }

    fn connect(&mut self, device_id: &str) {
        let device_id = device_id.to_string();
        let device = lock(&self.devices).get(&device_id).cloned();
        let Some(device) = device else {
            let _ = self.events.send(TransportEvent::ConnectFailed {
                device_id,
                error: "device has not been seen by the scanner".to_string(),
            });
            return;
        };

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let link = self.link.clone();
        tokio::spawn(async move {
            info!("Initiating connection to {}...", device_id);
            if !device.is_connected().await {
                if let Err(e) = adapter.connect_device(&device).await {
                    let _ = events.send(TransportEvent::ConnectFailed {
                        device_id,
                        error: e.to_string(),
                    });
                    return;
                }
            }

            *lock(&link) = Link {
                device: Some(device.clone()),
                ..Link::default()
            };
            let _ = events.send(TransportEvent::Connected { device_id });
            Self::watch_connection(adapter, device, events).await;
        });
    }

    fn disconnect(&mut self, device_id: &str) {
        self.notification_handler.stop_all();
        let device = std::mem::take(&mut *lock(&self.link)).device;
        let Some(device) = device else {
            debug!("No link to {} to close", device_id);
            return;
        };

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            info!("Disconnecting from device {}", device_id);
            let error = adapter
                .disconnect_device(&device)
                .await
                .err()
                .map(|e| e.to_string());
            if let Some(e) = &error {
                error!("Failed to disconnect from {}: {}", device_id, e);
            }
            let _ = events.send(TransportEvent::Disconnected { device_id, error });
        });
    }

    fn discover_services(&mut self, services: &[Uuid]) {
        let Some(device) = self.connected_device() else {
            let _ = self
                .events
                .send(TransportEvent::ServicesDiscovered(Err("not connected".into())));
            return;
        };

        let services = services.to_vec();
        let events = self.events.clone();
        let link = self.link.clone();
        tokio::spawn(async move {
            let mut found = Vec::new();
            for uuid in services {
                match device.discover_services_with_uuid(uuid).await {
                    Ok(discovered) => found.extend(discovered),
                    Err(e) => {
                        let _ = events.send(TransportEvent::ServicesDiscovered(Err(e.to_string())));
                        return;
                    }
                }
            }

            let uuids = found.iter().map(Service::uuid).collect();
            lock(&link)
                .services
                .extend(found.into_iter().map(|s| (s.uuid(), s)));
            let _ = events.send(TransportEvent::ServicesDiscovered(Ok(uuids)));
        });
    }

    fn discover_characteristics(&mut self, service: Uuid) {
        let handle = lock(&self.link).services.get(&service).cloned();
        let events = self.events.clone();
        let Some(handle) = handle else {
            let _ = events.send(TransportEvent::CharacteristicsDiscovered {
                service,
                result: Err("service not discovered".into()),
            });
            return;
        };

        let link = self.link.clone();
        tokio::spawn(async move {
            let result = async {
                let mut infos = Vec::new();
                for characteristic in handle.discover_characteristics().await? {
                    let properties = characteristic.properties().await?;
                    infos.push((
                        CharacteristicInfo {
                            uuid: characteristic.uuid(),
                            service,
                            properties: properties_of(properties),
                        },
                        characteristic,
                    ));
                }
                Ok::<_, bluest::Error>(infos)
            }
            .await;

            let result = result.map_err(|e| e.to_string()).map(|found| {
                let mut link = lock(&link);
                found
                    .into_iter()
                    .map(|(info, characteristic)| {
                        link.characteristics.insert(info.uuid, characteristic);
                        info
                    })
                    .collect()
            });
            let _ = events.send(TransportEvent::CharacteristicsDiscovered { service, result });
        });
    }

    fn subscribe(&mut self, characteristic: Uuid) {
        match self.characteristic(characteristic) {
            Some(handle) => self.notification_handler.subscribe(handle),
            None => warn!("Cannot subscribe to unknown characteristic {}", characteristic),
        }
    }

    fn read(&mut self, characteristic: Uuid) {
        let handle = self.characteristic(characteristic);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match handle {
                Some(handle) => handle.read().await.map_err(|e| e.to_string()),
                None => Err("characteristic not discovered".to_string()),
            };
            let _ = events.send(TransportEvent::ValueRead {
                characteristic,
                result,
            });
        });
    }

    fn write(&mut self, characteristic: Uuid, value: Vec<u8>, mode: WriteMode) {
        let handle = self.characteristic(characteristic);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match (handle, mode) {
                (Some(handle), WriteMode::WithResponse) => handle.write(&value).await,
                (Some(handle), WriteMode::WithoutResponse) => {
                    handle.write_without_response(&value).await
                }
                (None, _) => {
                    let _ = events.send(TransportEvent::WriteCompleted {
                        characteristic,
                        result: Err("characteristic not discovered".to_string()),
                    });
                    return;
                }
            };
            // Unacknowledged writes only report failures
            if mode == WriteMode::WithResponse || result.is_err() {
                let _ = events.send(TransportEvent::WriteCompleted {
                    characteristic,
                    result: result.map_err(|e| e.to_string()),
                });
            }
        });
    }
}
