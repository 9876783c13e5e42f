//! In-memory transport for driving the session in tests.

use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::core::bluetooth::transport::{
    transport_channel, BleTransport, CharacteristicInfo, CharacteristicProperties,
    TransportEvent, TransportEventReceiver, TransportEventSender, WriteMode,
};
use crate::core::catalog::{self, FieldKind};

/// A call submitted to the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartScan(Vec<Uuid>),
    StopScan,
    Connect(String),
    Disconnect(String),
    DiscoverServices(Vec<Uuid>),
    DiscoverCharacteristics(Uuid),
    Subscribe(Uuid),
    Read(Uuid),
    Write(Uuid, Vec<u8>, WriteMode),
}

/// Records every call and never answers on its own
pub struct FakeTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl FakeTransport {
    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Test side of the fake: inspect calls, inject completions
#[derive(Clone)]
pub struct FakeRadio {
    calls: Arc<Mutex<Vec<TransportCall>>>,
    events: TransportEventSender,
}

impl FakeRadio {
    pub fn emit(&self, event: TransportEvent) {
        self.events.send(event).unwrap();
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    pub fn count(&self, matches: impl Fn(&TransportCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }
}

pub fn fake_transport() -> (FakeTransport, FakeRadio, TransportEventReceiver) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = transport_channel();
    (
        FakeTransport {
            calls: calls.clone(),
        },
        FakeRadio { calls, events: tx },
        rx,
    )
}

/// Characteristics an IronOS device exposes for `service`
pub fn iron_characteristics(service: Uuid) -> Vec<CharacteristicInfo> {
    catalog::entries()
        .iter()
        .filter(|spec| spec.service.uuid() == service)
        .map(|spec| {
            let properties = match spec.kind {
                FieldKind::Telemetry | FieldKind::BulkPayload => CharacteristicProperties {
                    read: true,
                    notify: true,
                    ..Default::default()
                },
                FieldKind::Text => CharacteristicProperties {
                    read: true,
                    ..Default::default()
                },
                FieldKind::Setting(_) => CharacteristicProperties {
                    read: true,
                    write: true,
                    ..Default::default()
                },
                FieldKind::Control => CharacteristicProperties {
                    write: true,
                    write_without_response: true,
                    ..Default::default()
                },
            };
            CharacteristicInfo {
                uuid: spec.uuid,
                service,
                properties,
            }
        })
        .collect()
}

impl BleTransport for FakeTransport {
    fn start_scan(&mut self, _scan_id: u64, services: &[Uuid]) {
        self.record(TransportCall::StartScan(services.to_vec()));
    }

    fn stop_scan(&mut self) {
        self.record(TransportCall::StopScan);
    }

    fn connect(&mut self, device_id: &str) {
        self.record(TransportCall::Connect(device_id.to_string()));
    }

    fn disconnect(&mut self, device_id: &str) {
        self.record(TransportCall::Disconnect(device_id.to_string()));
    }

    fn discover_services(&mut self, services: &[Uuid]) {
        self.record(TransportCall::DiscoverServices(services.to_vec()));
    }

    fn discover_characteristics(&mut self, service: Uuid) {
        self.record(TransportCall::DiscoverCharacteristics(service));
    }

    fn subscribe(&mut self, characteristic: Uuid) {
        self.record(TransportCall::Subscribe(characteristic));
    }

    fn read(&mut self, characteristic: Uuid) {
        self.record(TransportCall::Read(characteristic));
    }

    fn write(&mut self, characteristic: Uuid, value: Vec<u8>, mode: WriteMode) {
        self.record(TransportCall::Write(characteristic, value, mode));
    }
}
