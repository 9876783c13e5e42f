//! Transport session for IronOS irons
//! This module owns the connection lifecycle: discovery, connect, GATT
//! enumeration, request correlation, telemetry polling and reconnect.
//!
//! All session state lives in one task. [`TransportSession`] is a cloneable
//! handle that talks to it over a command channel, while the platform backend
//! reports completions on a second channel.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::constants::{
    IRON_SERVICES, READ_ON_DISCOVERY, SESSION_COMMAND_CAPACITY, SESSION_EVENT_CAPACITY,
    UUID_BUILD, UUID_BULK_LIVE_DATA, UUID_DEVICE_ID, UUID_DEVICE_SERIAL,
};
use crate::core::bluetooth::correlation::{CorrelationTable, RequestKind, Responder};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::transport::{
    BleTransport, CharacteristicInfo, TransportEvent, TransportEventReceiver, WriteMode,
};
use crate::core::bluetooth::types::{ConnectionState, DeviceHandle, SessionEvent};
use crate::core::catalog::{self, ServiceGroup};
use crate::core::error::{IronError, IronResult};
use crate::core::telemetry::{decode_bulk, LiveStatus, TelemetryHistory, TelemetrySnapshot};

enum SessionCommand {
    StartScan,
    StopScan,
    Devices(oneshot::Sender<Vec<DeviceHandle>>),
    RestoreDevices(Vec<DeviceHandle>),
    Connect {
        id: String,
        reply: oneshot::Sender<IronResult<()>>,
    },
    Disconnect(oneshot::Sender<IronResult<()>>),
    Read {
        characteristic: Uuid,
        request_id: u64,
        reply: oneshot::Sender<IronResult<Vec<u8>>>,
    },
    Write {
        characteristic: Uuid,
        value: Vec<u8>,
        request_id: u64,
        reply: oneshot::Sender<IronResult<()>>,
    },
    Expire {
        kind: RequestKind,
        characteristic: Uuid,
        request_id: u64,
    },
    State(oneshot::Sender<ConnectionState>),
    ConnectedDevice(oneshot::Sender<Option<DeviceHandle>>),
    LatestSnapshot(oneshot::Sender<Option<TelemetrySnapshot>>),
    History(oneshot::Sender<Vec<TelemetrySnapshot>>),
    AutoReconnect { last_id: String },
}

/// A clonable handle to the session task.
#[derive(Clone)]
pub struct TransportSession {
    tx: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    request_timeout: Duration,
    next_request_id: Arc<AtomicU64>,
}

impl TransportSession {
    /// Spawns the session task on the current runtime.
    pub fn spawn<T: BleTransport>(
        transport: T,
        transport_events: TransportEventReceiver,
        config: &SessionConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(SESSION_COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

        let actor = SessionActor::new(transport, events.clone(), config);
        tokio::spawn(actor.run(rx, transport_events));

        Self {
            tx,
            events,
            request_timeout: config.request_timeout(),
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribes to session events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: SessionCommand) -> IronResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| IronError::SessionClosed)
    }

    async fn ask<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> SessionCommand,
    ) -> IronResult<R> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| IronError::SessionClosed)
    }

    async fn await_request<R>(
        &self,
        kind: RequestKind,
        characteristic: Uuid,
        request_id: u64,
        rx: oneshot::Receiver<IronResult<R>>,
    ) -> IronResult<R> {
        match time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(IronError::SessionClosed),
            Err(_) => {
                warn!("{:?} of {} timed out", kind, characteristic);
                let _ = self
                    .send(SessionCommand::Expire {
                        kind,
                        characteristic,
                        request_id,
                    })
                    .await;
                Err(IronError::Timeout(characteristic))
            }
        }
    }

    fn request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Starts scanning for irons advertising any of the three iron services.
    pub async fn start_scan(&self) -> IronResult<()> {
        self.send(SessionCommand::StartScan).await
    }

    pub async fn stop_scan(&self) -> IronResult<()> {
        self.send(SessionCommand::StopScan).await
    }

    /// Every known iron in first-seen order
    pub async fn devices(&self) -> IronResult<Vec<DeviceHandle>> {
        self.ask(SessionCommand::Devices).await
    }

    /// Merges persisted device records into the registry.
    pub async fn restore_devices(&self, records: Vec<DeviceHandle>) -> IronResult<()> {
        self.send(SessionCommand::RestoreDevices(records)).await
    }

    /// Begins connecting to a known iron.
    ///
    /// Returns once the attempt is underway; progress is reported through
    /// [`SessionEvent::ConnectionStateChanged`].
    pub async fn connect(&self, id: &str) -> IronResult<()> {
        let id = id.to_string();
        self.ask(|reply| SessionCommand::Connect { id, reply })
            .await?
    }

    pub async fn disconnect(&self) -> IronResult<()> {
        self.ask(SessionCommand::Disconnect).await?
    }

    /// Reads a characteristic of the connected iron.
    pub async fn read(&self, characteristic: Uuid) -> IronResult<Vec<u8>> {
        let request_id = self.request_id();
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Read {
            characteristic,
            request_id,
            reply,
        })
        .await?;
        self.await_request(RequestKind::Read, characteristic, request_id, rx)
            .await
    }

    /// Writes a characteristic of the connected iron.
    ///
    /// Resolves on submission when the characteristic accepts unacknowledged
    /// writes, otherwise once the iron acknowledges.
    pub async fn write(&self, characteristic: Uuid, value: Vec<u8>) -> IronResult<()> {
        let request_id = self.request_id();
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Write {
            characteristic,
            value,
            request_id,
            reply,
        })
        .await?;
        self.await_request(RequestKind::Write, characteristic, request_id, rx)
            .await
    }

    pub async fn connection_state(&self) -> IronResult<ConnectionState> {
        self.ask(SessionCommand::State).await
    }

    pub async fn connected_device(&self) -> IronResult<Option<DeviceHandle>> {
        self.ask(SessionCommand::ConnectedDevice).await
    }

    pub async fn latest_snapshot(&self) -> IronResult<Option<TelemetrySnapshot>> {
        self.ask(SessionCommand::LatestSnapshot).await
    }

    /// Retained telemetry, oldest first
    pub async fn history(&self) -> IronResult<Vec<TelemetrySnapshot>> {
        self.ask(SessionCommand::History).await
    }

    /// One-shot reconnect to `last_id`: scans and connects only if the iron
    /// shows up within the grace window.
    pub async fn auto_reconnect(&self, last_id: &str) -> IronResult<()> {
        self.send(SessionCommand::AutoReconnect {
            last_id: last_id.to_string(),
        })
        .await
    }
}

struct PendingReconnect {
    id: String,
    deadline: Instant,
    started_scan: bool,
}

enum Step {
    Transport(TransportEvent),
    TransportClosed,
    Command(SessionCommand),
    Shutdown,
    Poll,
    ReconnectExpired,
}

struct SessionActor<T: BleTransport> {
    transport: T,
    events: broadcast::Sender<SessionEvent>,
    poll_interval: Duration,
    reconnect_grace: Duration,
    registry: DeviceRegistry,
    state: ConnectionState,
    /// Device the session is connecting or connected to
    current: Option<String>,
    /// Discovered services and whether each has reported its characteristics
    services: HashMap<Uuid, bool>,
    characteristics: HashMap<Uuid, CharacteristicInfo>,
    correlation: CorrelationTable,
    latest: Option<TelemetrySnapshot>,
    history: TelemetryHistory,
    poll: Option<Interval>,
    scanning: bool,
    /// Identifies the most recently started scan
    scan_id: u64,
    reconnect: Option<PendingReconnect>,
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

async fn deadline_passed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending::<()>().await,
    }
}

/// Identity characteristics carry text; fall back to hex for binary values.
fn identity_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if text.chars().all(|c| c == '\0' || !c.is_control()) => {
            text.trim_matches('\0').trim().to_string()
        }
        _ => bytes.iter().rev().map(|b| format!("{b:02X}")).collect(),
    }
}

impl<T: BleTransport> SessionActor<T> {
    fn new(transport: T, events: broadcast::Sender<SessionEvent>, config: &SessionConfig) -> Self {
        Self {
            transport,
            events,
            poll_interval: config.poll_interval(),
            reconnect_grace: config.reconnect_grace(),
            registry: DeviceRegistry::new(),
            state: ConnectionState::Disconnected,
            current: None,
            services: HashMap::new(),
            characteristics: HashMap::new(),
            correlation: CorrelationTable::new(),
            latest: None,
            history: TelemetryHistory::default(),
            poll: None,
            scanning: false,
            scan_id: 0,
            reconnect: None,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut transport_events: TransportEventReceiver,
    ) {
        info!("Transport session started.");
        let mut transport_open = true;

        loop {
            let reconnect_deadline = self.reconnect.as_ref().map(|r| r.deadline);
            let step = tokio::select! {
                biased;
                event = transport_events.recv(), if transport_open => match event {
                    Some(event) => Step::Transport(event),
                    None => Step::TransportClosed,
                },
                command = commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Shutdown,
                },
                _ = next_tick(&mut self.poll) => Step::Poll,
                _ = deadline_passed(reconnect_deadline) => Step::ReconnectExpired,
            };

            match step {
                Step::Transport(event) => self.handle_transport_event(event),
                Step::TransportClosed => {
                    error!("Bluetooth backend stopped reporting events.");
                    transport_open = false;
                    if let Some(id) = self.current.clone() {
                        self.finish_disconnect(&id);
                    }
                }
                Step::Command(command) => self.handle_command(command),
                Step::Shutdown => break,
                Step::Poll => self.poll_tick(),
                Step::ReconnectExpired => self.reconnect_expired(),
            }
        }

        if let Some(id) = self.current.take() {
            self.transport.disconnect(&id);
        }
        self.correlation.fail_all(IronError::SessionClosed);
        info!("Transport session stopped.");
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state: {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(SessionEvent::ConnectionStateChanged(state));
        }
    }

    fn publish_devices(&self) {
        self.emit(SessionEvent::DeviceListUpdated(self.registry.list()));
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::StartScan => self.start_scan(),
            SessionCommand::StopScan => {
                self.reconnect = None;
                self.stop_scan();
            }
            SessionCommand::Devices(reply) => {
                let _ = reply.send(self.registry.list());
            }
            SessionCommand::RestoreDevices(records) => {
                info!("Restoring {} saved device(s)", records.len());
                self.registry.restore(records);
                self.publish_devices();
            }
            SessionCommand::Connect { id, reply } => {
                self.reconnect = None;
                let _ = reply.send(self.connect(id));
            }
            SessionCommand::Disconnect(reply) => {
                let _ = reply.send(self.disconnect());
            }
            SessionCommand::Read {
                characteristic,
                request_id,
                reply,
            } => {
                if let Err(e) = self.ensure_ready(characteristic) {
                    let _ = reply.send(Err(e));
                    return;
                }
                debug!("Reading {}", characteristic);
                self.correlation
                    .register_read(characteristic, Responder::Caller { request_id, reply });
                self.transport.read(characteristic);
            }
            SessionCommand::Write {
                characteristic,
                value,
                request_id,
                reply,
            } => {
                let info = match self.ensure_ready(characteristic) {
                    Ok(info) => info,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                let mode = info.properties.preferred_write_mode();
                debug!("Writing {:?} to {} ({:?})", value, characteristic, mode);
                match mode {
                    WriteMode::WithoutResponse => {
                        self.transport.write(characteristic, value, mode);
                        let _ = reply.send(Ok(()));
                    }
                    WriteMode::WithResponse => {
                        self.correlation
                            .register_write(characteristic, Responder::Caller { request_id, reply });
                        self.transport.write(characteristic, value, mode);
                    }
                }
            }
            SessionCommand::Expire {
                kind,
                characteristic,
                request_id,
            } => {
                if self.correlation.cancel(kind, characteristic, request_id) {
                    debug!("Dropped expired {:?} of {}", kind, characteristic);
                }
            }
            SessionCommand::State(reply) => {
                let _ = reply.send(self.state);
            }
            SessionCommand::ConnectedDevice(reply) => {
                let device = self
                    .current
                    .as_deref()
                    .and_then(|id| self.registry.get(id))
                    .cloned();
                let _ = reply.send(device);
            }
            SessionCommand::LatestSnapshot(reply) => {
                let _ = reply.send(self.latest.clone());
            }
            SessionCommand::History(reply) => {
                let _ = reply.send(self.history.to_vec());
            }
            SessionCommand::AutoReconnect { last_id } => self.arm_reconnect(last_id),
        }
    }

    /// Characteristic info for a request, if the session can serve it.
    fn ensure_ready(&self, characteristic: Uuid) -> IronResult<CharacteristicInfo> {
        if self.state != ConnectionState::Connected {
            return Err(IronError::NotConnected);
        }
        self.characteristics
            .get(&characteristic)
            .cloned()
            .ok_or(IronError::CharacteristicNotFound(characteristic))
    }

    fn start_scan(&mut self) {
        if self.scanning {
            debug!("Scan already running.");
            return;
        }
        self.scan_id += 1;
        info!("Starting scan {} for IronOS devices.", self.scan_id);
        self.transport.start_scan(self.scan_id, &IRON_SERVICES);
        self.scanning = true;
        self.emit(SessionEvent::ScanStarted);
    }

    fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        info!("Stopping scan.");
        self.transport.stop_scan();
        self.scanning = false;
        self.emit(SessionEvent::ScanStopped);
    }

    fn connect(&mut self, id: String) -> IronResult<()> {
        if !self.registry.contains(&id) {
            return Err(IronError::DeviceNotFound(id));
        }
        if self.current.as_deref() == Some(id.as_str())
            && (self.state.is_in_progress() || self.state == ConnectionState::Connected)
        {
            debug!("Already connecting or connected to {}", id);
            return Ok(());
        }
        if let Some(previous) = self.current.clone() {
            info!("Disconnecting from {} before connecting to {}", previous, id);
            self.transport.disconnect(&previous);
            self.finish_disconnect(&previous);
        }

        info!("Connecting to {}", id);
        self.services.clear();
        self.characteristics.clear();
        self.latest = None;
        self.history.clear();
        self.current = Some(id.clone());
        self.set_state(ConnectionState::Connecting);
        self.transport.connect(&id);
        Ok(())
    }

    fn disconnect(&mut self) -> IronResult<()> {
        let id = self.current.clone().ok_or(IronError::NotConnected)?;
        info!("Disconnecting from {}", id);
        self.poll = None;
        self.transport.disconnect(&id);
        self.finish_disconnect(&id);
        Ok(())
    }

    /// Clears every trace of the session with `id`.
    fn finish_disconnect(&mut self, id: &str) {
        self.poll = None;
        self.correlation.fail_all(IronError::NotConnected);
        self.services.clear();
        self.characteristics.clear();
        self.current = None;
        self.registry.mark_disconnected(id);
        self.set_state(ConnectionState::Disconnected);
        self.emit(SessionEvent::DeviceDisconnected { id: id.to_string() });
        self.emit(SessionEvent::LiveStatusEnded);
        self.publish_devices();
    }

    /// Abandons the connect attempt without retrying.
    fn fail(&mut self, message: String) {
        error!("Connection failed: {}", message);
        self.poll = None;
        self.correlation.fail_all(IronError::NotConnected);
        self.services.clear();
        self.characteristics.clear();
        if let Some(id) = self.current.take() {
            self.transport.disconnect(&id);
            self.registry.mark_disconnected(&id);
        }
        self.set_state(ConnectionState::Failed);
        self.emit(SessionEvent::ConnectionFailed(message));
    }

    fn is_current(&self, device_id: &str) -> bool {
        self.current.as_deref() == Some(device_id)
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceDiscovered(advertisement) => {
                if self.registry.upsert(&advertisement) {
                    self.publish_devices();
                }
                let wanted = self
                    .reconnect
                    .as_ref()
                    .is_some_and(|r| r.id == advertisement.id);
                if wanted {
                    self.fire_reconnect();
                }
            }
            TransportEvent::ScanStopped { scan_id } => {
                if scan_id != self.scan_id {
                    debug!("Ignoring end of earlier scan {}", scan_id);
                } else if self.scanning {
                    info!("Scan ended.");
                    self.scanning = false;
                    self.emit(SessionEvent::ScanStopped);
                }
            }
            TransportEvent::Connected { device_id } => {
                if !self.is_current(&device_id) || self.state != ConnectionState::Connecting {
                    warn!("Ignoring stale connect completion for {}", device_id);
                    return;
                }
                info!("Connected to {}, discovering services...", device_id);
                self.set_state(ConnectionState::DiscoveringServices);
                self.transport.discover_services(&IRON_SERVICES);
            }
            TransportEvent::ConnectFailed { device_id, error } => {
                if self.is_current(&device_id) {
                    self.fail(format!("could not connect to {device_id}: {error}"));
                }
            }
            TransportEvent::Disconnected { device_id, error } => {
                if !self.is_current(&device_id) {
                    debug!("Disconnect of inactive device {}", device_id);
                    return;
                }
                match error {
                    Some(e) => warn!("{} disconnected: {}", device_id, e),
                    None => info!("{} disconnected", device_id),
                }
                self.finish_disconnect(&device_id);
            }
            TransportEvent::ServicesDiscovered(result) => {
                if self.state != ConnectionState::DiscoveringServices {
                    debug!("Ignoring service discovery outside of discovery phase");
                    return;
                }
                self.on_services(result);
            }
            TransportEvent::CharacteristicsDiscovered { service, result } => {
                if self.state != ConnectionState::DiscoveringCharacteristics
                    || !self.services.contains_key(&service)
                {
                    debug!("Ignoring characteristics of {}", service);
                    return;
                }
                self.on_characteristics(service, result);
            }
            TransportEvent::ValueRead {
                characteristic,
                result,
            } => {
                let waited = self
                    .correlation
                    .complete_read(characteristic, result.clone());
                match result {
                    Ok(value) if self.current.is_some() => {
                        self.process_value(characteristic, &value, false)
                    }
                    Ok(_) => {}
                    Err(e) if !waited => warn!("Read of {} failed: {}", characteristic, e),
                    Err(_) => {}
                }
            }
            TransportEvent::Notification {
                characteristic,
                value,
            } => {
                if self.current.is_some() {
                    self.process_value(characteristic, &value, true);
                }
            }
            TransportEvent::WriteCompleted {
                characteristic,
                result,
            } => {
                let waited = self
                    .correlation
                    .complete_write(characteristic, result.clone());
                if let (false, Err(e)) = (waited, result) {
                    warn!("Write to {} failed: {}", characteristic, e);
                }
            }
        }
    }

    fn on_services(&mut self, result: Result<Vec<Uuid>, String>) {
        let services = match result {
            Ok(services) => services,
            Err(e) => return self.fail(format!("service discovery failed: {e}")),
        };
        if services.is_empty() {
            return self.fail("device exposes none of the iron services".to_string());
        }

        info!("Discovered services: {:?}", services);
        self.set_state(ConnectionState::DiscoveringCharacteristics);
        for service in services {
            self.services.insert(service, false);
            self.transport.discover_characteristics(service);
        }
    }

    fn on_characteristics(&mut self, service: Uuid, result: Result<Vec<CharacteristicInfo>, String>) {
        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                return self.fail(format!("characteristic discovery failed for {service}: {e}"));
            }
        };

        debug!(
            "Service {} has {} characteristic(s)",
            service,
            characteristics.len()
        );
        for info in characteristics {
            if info.properties.can_subscribe() {
                debug!("Enabling notifications for {}", info.uuid);
                self.transport.subscribe(info.uuid);
            }
            if READ_ON_DISCOVERY.contains(&info.uuid) {
                self.read_internal(info.uuid);
            }
            self.characteristics.insert(info.uuid, info);
        }
        self.services.insert(service, true);

        if self.services.values().all(|done| *done) {
            self.on_connected();
        }
    }

    fn on_connected(&mut self) {
        let Some(id) = self.current.clone() else {
            return;
        };
        self.registry.mark_connected(&id, Utc::now());
        self.set_state(ConnectionState::Connected);

        let mut interval = time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.poll = Some(interval);

        info!(
            "Session with {} ready, {} characteristic(s)",
            id,
            self.characteristics.len()
        );
        if let Some(device) = self.registry.get(&id).cloned() {
            self.emit(SessionEvent::DeviceConnected(device));
        }
        self.publish_devices();
    }

    /// Issues a read whose result is only consumed by the session.
    fn read_internal(&mut self, characteristic: Uuid) {
        if !self.correlation.has_pending_read(&characteristic) {
            self.correlation
                .register_read(characteristic, Responder::Internal);
        }
        self.transport.read(characteristic);
    }

    fn poll_tick(&mut self) {
        if self.state != ConnectionState::Connected {
            self.poll = None;
            return;
        }
        if self.characteristics.contains_key(&UUID_BULK_LIVE_DATA) {
            self.read_internal(UUID_BULK_LIVE_DATA);
        }
        if let Some(snapshot) = &self.latest {
            self.emit(SessionEvent::LiveStatus(LiveStatus::from(snapshot)));
        }
    }

    fn process_value(&mut self, characteristic: Uuid, value: &[u8], notified: bool) {
        match characteristic {
            UUID_BULK_LIVE_DATA => match decode_bulk(value) {
                Ok(snapshot) => {
                    self.history.push(snapshot.clone());
                    self.latest = Some(snapshot.clone());
                    self.emit(SessionEvent::SnapshotUpdated(snapshot));
                }
                Err(e) => warn!("Dropping telemetry tick: {}", e),
            },
            UUID_BUILD | UUID_DEVICE_SERIAL | UUID_DEVICE_ID => {
                self.update_identity(characteristic, identity_text(value))
            }
            _ if notified => {
                let live = catalog::lookup(characteristic)
                    .is_some_and(|spec| spec.service == ServiceGroup::LiveData);
                if live {
                    self.emit(SessionEvent::LiveValue {
                        characteristic,
                        value: value.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    fn update_identity(&mut self, characteristic: Uuid, text: String) {
        let Some(device) = self
            .current
            .as_deref()
            .and_then(|id| self.registry.get_mut(id))
        else {
            return;
        };
        let field = match characteristic {
            UUID_BUILD => &mut device.build,
            UUID_DEVICE_SERIAL => &mut device.serial_number,
            _ => &mut device.device_id,
        };
        if field.as_deref() != Some(text.as_str()) {
            let name = catalog::lookup(characteristic).map_or("identity", |spec| spec.name);
            info!("{} of {}: {}", name, device.id, text);
            *field = Some(text);
            self.publish_devices();
        }
    }

    fn arm_reconnect(&mut self, last_id: String) {
        if self.current.is_some() {
            debug!("Session active, skipping reconnect to {}", last_id);
            return;
        }
        info!(
            "Looking for last connected iron {} for {:?}",
            last_id, self.reconnect_grace
        );
        let started_scan = !self.scanning;
        self.start_scan();
        self.reconnect = Some(PendingReconnect {
            id: last_id,
            deadline: Instant::now() + self.reconnect_grace,
            started_scan,
        });
    }

    fn fire_reconnect(&mut self) {
        let Some(pending) = self.reconnect.take() else {
            return;
        };
        info!("Last connected iron {} is back, reconnecting", pending.id);
        if pending.started_scan {
            self.stop_scan();
        }
        if let Err(e) = self.connect(pending.id) {
            warn!("Reconnect failed: {}", e);
        }
    }

    fn reconnect_expired(&mut self) {
        let Some(pending) = self.reconnect.take() else {
            return;
        };
        info!("{} not seen within the grace window, giving up", pending.id);
        if pending.started_scan {
            self.stop_scan();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{UUID_LIVE_TEMP, UUID_SAVE_TO_FLASH};
    use crate::core::bluetooth::fake::{
        fake_transport, iron_characteristics, FakeRadio, TransportCall,
    };
    use crate::core::bluetooth::transport::Advertisement;
    use crate::core::catalog::SettingKey;
    use crate::core::telemetry::{encode_words, OperatingMode};

    fn spawn_session() -> (TransportSession, FakeRadio, broadcast::Receiver<SessionEvent>) {
        let (transport, radio, events) = fake_transport();
        let session = TransportSession::spawn(transport, events, &SessionConfig::default());
        let rx = session.subscribe();
        (session, radio, rx)
    }

    fn advert(id: &str, rssi: i16) -> TransportEvent {
        TransportEvent::DeviceDiscovered(Advertisement {
            id: id.to_string(),
            name: Some("Pinecil".to_string()),
            address: None,
            rssi: Some(rssi),
        })
    }

    fn bulk_payload(temp: u32, mode: u32) -> Vec<u8> {
        encode_words(&[temp, 320, 200, 250, 40, 0, 62, 100, 10, 450, 1000, 0, mode, 300])
    }

    async fn connect_fully(session: &TransportSession, radio: &FakeRadio) {
        radio.emit(advert("A", -55));
        session.connect("A").await.unwrap();
        radio.emit(TransportEvent::Connected {
            device_id: "A".into(),
        });
        radio.emit(TransportEvent::ServicesDiscovered(Ok(IRON_SERVICES.to_vec())));
        for service in IRON_SERVICES {
            radio.emit(TransportEvent::CharacteristicsDiscovered {
                service,
                result: Ok(iron_characteristics(service)),
            });
        }
        assert_eq!(
            session.connection_state().await.unwrap(),
            ConnectionState::Connected
        );
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<SessionEvent>,
        matches: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        loop {
            let event = time::timeout(Duration::from_secs(30), rx.recv())
                .await
                .expect("event not received")
                .unwrap();
            if matches(&event) {
                return event;
            }
        }
    }

    async fn wait_for_call(radio: &FakeRadio, call: &TransportCall) {
        while radio.count(|c| c == call) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_rediscovery_keeps_single_entry() {
        let (session, radio, _rx) = spawn_session();
        session.start_scan().await.unwrap();
        radio.emit(advert("A", -55));
        radio.emit(advert("A", -70));

        let devices = session.devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].rssi, -70);
        assert_eq!(
            radio.calls()[0],
            TransportCall::StartScan(IRON_SERVICES.to_vec())
        );
    }

    #[tokio::test]
    async fn test_end_of_earlier_scan_is_ignored() {
        let (session, radio, _rx) = spawn_session();
        session.start_scan().await.unwrap();
        session.stop_scan().await.unwrap();
        session.start_scan().await.unwrap();
        session.devices().await.unwrap();

        // The first scan task reports its cancellation late
        radio.emit(TransportEvent::ScanStopped { scan_id: 1 });
        session.devices().await.unwrap();
        session.stop_scan().await.unwrap();
        session.devices().await.unwrap();

        assert_eq!(radio.count(|c| matches!(c, TransportCall::StartScan(_))), 2);
        assert_eq!(radio.count(|c| *c == TransportCall::StopScan), 2);
    }

    #[tokio::test]
    async fn test_current_scan_end_is_reported() {
        let (session, radio, mut rx) = spawn_session();
        session.start_scan().await.unwrap();
        radio.emit(TransportEvent::ScanStopped { scan_id: 1 });
        next_matching(&mut rx, |e| matches!(e, SessionEvent::ScanStopped)).await;

        // Already stopped, nothing to cancel
        session.stop_scan().await.unwrap();
        session.devices().await.unwrap();
        assert_eq!(radio.count(|c| *c == TransportCall::StopScan), 0);
    }

    #[tokio::test]
    async fn test_connect_sequence() {
        let (session, radio, mut rx) = spawn_session();
        connect_fully(&session, &radio).await;

        let calls = radio.calls();
        assert_eq!(calls[0], TransportCall::Connect("A".into()));
        assert_eq!(calls[1], TransportCall::DiscoverServices(IRON_SERVICES.to_vec()));
        for service in IRON_SERVICES {
            assert!(calls.contains(&TransportCall::DiscoverCharacteristics(service)));
        }
        assert!(calls.contains(&TransportCall::Subscribe(UUID_LIVE_TEMP)));
        assert!(calls.contains(&TransportCall::Read(UUID_BULK_LIVE_DATA)));
        assert!(calls.contains(&TransportCall::Read(UUID_BUILD)));
        assert!(!calls.contains(&TransportCall::Subscribe(SettingKey::SetTemperature.uuid())));

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::ConnectionStateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::DiscoveringServices,
                ConnectionState::DiscoveringCharacteristics,
                ConnectionState::Connected,
            ]
        );

        let device = session.connected_device().await.unwrap().unwrap();
        assert!(device.connected);
        assert!(device.connected_at.is_some());
    }

    #[tokio::test]
    async fn test_barrier_waits_for_every_service() {
        let (session, radio, _rx) = spawn_session();
        radio.emit(advert("A", -55));
        session.connect("A").await.unwrap();
        radio.emit(TransportEvent::Connected {
            device_id: "A".into(),
        });
        radio.emit(TransportEvent::ServicesDiscovered(Ok(IRON_SERVICES.to_vec())));
        for service in &IRON_SERVICES[..2] {
            radio.emit(TransportEvent::CharacteristicsDiscovered {
                service: *service,
                result: Ok(iron_characteristics(*service)),
            });
        }

        assert_eq!(
            session.connection_state().await.unwrap(),
            ConnectionState::DiscoveringCharacteristics
        );
        assert_eq!(
            session.read(UUID_BULK_LIVE_DATA).await,
            Err(IronError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_discovery_error_fails_without_retry() {
        let (session, radio, mut rx) = spawn_session();
        radio.emit(advert("A", -55));
        session.connect("A").await.unwrap();
        radio.emit(TransportEvent::Connected {
            device_id: "A".into(),
        });
        radio.emit(TransportEvent::ServicesDiscovered(Err("gatt error".into())));

        assert_eq!(
            session.connection_state().await.unwrap(),
            ConnectionState::Failed
        );
        let event =
            next_matching(&mut rx, |e| matches!(e, SessionEvent::ConnectionFailed(_))).await;
        assert!(matches!(event, SessionEvent::ConnectionFailed(m) if m.contains("gatt error")));
        assert_eq!(radio.count(|c| matches!(c, TransportCall::Connect(_))), 1);
    }

    #[tokio::test]
    async fn test_connect_unknown_device() {
        let (session, _radio, _rx) = spawn_session();
        assert_eq!(
            session.connect("missing").await,
            Err(IronError::DeviceNotFound("missing".into()))
        );
    }

    #[tokio::test]
    async fn test_read_resolves_from_completion() {
        let (session, radio, _rx) = spawn_session();
        connect_fully(&session, &radio).await;
        let uuid = SettingKey::SetTemperature.uuid();

        let reader = session.clone();
        let pending = tokio::spawn(async move { reader.read(uuid).await });
        wait_for_call(&radio, &TransportCall::Read(uuid)).await;
        radio.emit(TransportEvent::ValueRead {
            characteristic: uuid,
            result: Ok(vec![0x40, 0x01]),
        });

        assert_eq!(pending.await.unwrap(), Ok(vec![0x40, 0x01]));
    }

    #[tokio::test]
    async fn test_unknown_characteristic() {
        let (session, radio, _rx) = spawn_session();
        connect_fully(&session, &radio).await;
        let uuid = Uuid::from_u128(42);
        assert_eq!(
            session.read(uuid).await,
            Err(IronError::CharacteristicNotFound(uuid))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let (session, radio, _rx) = spawn_session();
        connect_fully(&session, &radio).await;
        let uuid = SettingKey::SleepTemperature.uuid();

        let started = Instant::now();
        assert_eq!(session.read(uuid).await, Err(IronError::Timeout(uuid)));
        assert!(started.elapsed() >= Duration::from_secs(8));

        // A late completion has nobody left to resolve
        radio.emit(TransportEvent::ValueRead {
            characteristic: uuid,
            result: Ok(vec![1, 0]),
        });
        assert_eq!(
            session.connection_state().await.unwrap(),
            ConnectionState::Connected
        );
    }

    #[tokio::test]
    async fn test_disconnect_event_cancels_pending_requests() {
        let (session, radio, mut rx) = spawn_session();
        connect_fully(&session, &radio).await;
        let uuid = SettingKey::BoostTemperature.uuid();

        let reader = session.clone();
        let pending = tokio::spawn(async move { reader.read(uuid).await });
        wait_for_call(&radio, &TransportCall::Read(uuid)).await;
        radio.emit(TransportEvent::Disconnected {
            device_id: "A".into(),
            error: Some("link lost".into()),
        });

        assert_eq!(pending.await.unwrap(), Err(IronError::NotConnected));
        next_matching(&mut rx, |e| *e == SessionEvent::LiveStatusEnded).await;
        assert_eq!(
            session.connection_state().await.unwrap(),
            ConnectionState::Disconnected
        );
        assert!(session.connected_device().await.unwrap().is_none());
        assert!(session.devices().await.unwrap().iter().all(|d| !d.connected));
    }

    #[tokio::test]
    async fn test_local_disconnect() {
        let (session, radio, _rx) = spawn_session();
        connect_fully(&session, &radio).await;

        session.disconnect().await.unwrap();
        assert!(radio.calls().contains(&TransportCall::Disconnect("A".into())));
        assert_eq!(
            session.connection_state().await.unwrap(),
            ConnectionState::Disconnected
        );
        assert_eq!(session.disconnect().await, Err(IronError::NotConnected));
    }

    #[tokio::test]
    async fn test_write_mode_selection() {
        let (session, radio, _rx) = spawn_session();
        connect_fully(&session, &radio).await;

        session.write(UUID_SAVE_TO_FLASH, vec![1]).await.unwrap();
        assert!(radio.calls().contains(&TransportCall::Write(
            UUID_SAVE_TO_FLASH,
            vec![1],
            WriteMode::WithoutResponse
        )));

        let uuid = SettingKey::SetTemperature.uuid();
        let writer = session.clone();
        let pending = tokio::spawn(async move { writer.write(uuid, vec![0x2c, 0x01]).await });
        let call = TransportCall::Write(uuid, vec![0x2c, 0x01], WriteMode::WithResponse);
        wait_for_call(&radio, &call).await;
        assert!(!pending.is_finished());

        radio.emit(TransportEvent::WriteCompleted {
            characteristic: uuid,
            result: Err("rejected".into()),
        });
        assert_eq!(
            pending.await.unwrap(),
            Err(IronError::WriteFailed("rejected".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_and_live_status() {
        let (session, radio, mut rx) = spawn_session();
        connect_fully(&session, &radio).await;
        radio.emit(TransportEvent::ValueRead {
            characteristic: UUID_BULK_LIVE_DATA,
            result: Ok(bulk_payload(330, 1)),
        });
        next_matching(&mut rx, |e| matches!(e, SessionEvent::SnapshotUpdated(_))).await;

        time::sleep(Duration::from_millis(1_050)).await;
        assert_eq!(
            radio.count(|c| *c == TransportCall::Read(UUID_BULK_LIVE_DATA)),
            2
        );
        let status = next_matching(&mut rx, |e| matches!(e, SessionEvent::LiveStatus(_))).await;
        let SessionEvent::LiveStatus(status) = status else {
            unreachable!()
        };
        assert_eq!(status.temperature, 330);
        assert_eq!(status.mode, OperatingMode::Soldering);
    }

    #[tokio::test]
    async fn test_bad_telemetry_is_dropped() {
        let (session, radio, _rx) = spawn_session();
        connect_fully(&session, &radio).await;
        radio.emit(TransportEvent::Notification {
            characteristic: UUID_BULK_LIVE_DATA,
            value: bulk_payload(300, 0),
        });
        radio.emit(TransportEvent::Notification {
            characteristic: UUID_BULK_LIVE_DATA,
            value: vec![1, 2, 3],
        });

        let latest = session.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.current_temp, 300);
        assert_eq!(session.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_live_notifications_and_build_string() {
        let (session, radio, mut rx) = spawn_session();
        connect_fully(&session, &radio).await;

        radio.emit(TransportEvent::Notification {
            characteristic: UUID_LIVE_TEMP,
            value: vec![0x4a, 0x01, 0, 0],
        });
        let event =
            next_matching(&mut rx, |e| matches!(e, SessionEvent::LiveValue { .. })).await;
        assert_eq!(
            event,
            SessionEvent::LiveValue {
                characteristic: UUID_LIVE_TEMP,
                value: vec![0x4a, 0x01, 0, 0]
            }
        );

        radio.emit(TransportEvent::ValueRead {
            characteristic: UUID_BUILD,
            result: Ok(b"v2.22.1\0".to_vec()),
        });
        let device = session.connected_device().await.unwrap().unwrap();
        assert_eq!(device.build.as_deref(), Some("v2.22.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reconnect_within_grace() {
        let (session, radio, _rx) = spawn_session();
        session
            .restore_devices(vec![DeviceHandle::new("A", None, -90)])
            .await
            .unwrap();
        session.auto_reconnect("A").await.unwrap();
        assert_eq!(
            session.connection_state().await.unwrap(),
            ConnectionState::Disconnected
        );

        time::sleep(Duration::from_millis(1_000)).await;
        radio.emit(advert("A", -60));
        assert_eq!(
            session.connection_state().await.unwrap(),
            ConnectionState::Connecting
        );
        let calls = radio.calls();
        assert!(calls.contains(&TransportCall::StopScan));
        assert!(calls.contains(&TransportCall::Connect("A".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reconnect_gives_up_after_grace() {
        let (session, radio, _rx) = spawn_session();
        session.auto_reconnect("A").await.unwrap();

        time::sleep(Duration::from_millis(3_100)).await;
        radio.emit(advert("A", -60));
        assert_eq!(
            session.connection_state().await.unwrap(),
            ConnectionState::Disconnected
        );
        assert_eq!(radio.count(|c| matches!(c, TransportCall::Connect(_))), 0);
        assert!(radio.calls().contains(&TransportCall::StopScan));
    }

    #[test]
    fn test_identity_text() {
        assert_eq!(identity_text(b"v2.22\0\0"), "v2.22");
        assert_eq!(identity_text(&[0x01, 0x02, 0xff, 0x10]), "10FF0201");
    }
}
