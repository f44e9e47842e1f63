//! In-memory transport used by the unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::ble::transport::{
    CharacteristicHandle, DeviceHandle, DisconnectCallback, GattConnector, GattSession,
    NotificationHandler,
};
use crate::ble::uuids::REAL_TIME_INDICATION_UUID;
use crate::error::{Error, Result};

pub(crate) const SERVICE_UUID: Uuid = Uuid::from_u128(0xecec_0001);

/// Payload decoding to target 30.0 °C and room/floor 24.4 °C.
pub(crate) fn sample_payload() -> Vec<u8> {
    let mut data = vec![0u8; 20];
    data[1] = 0x2C;
    data[2] = 0x01;
    data[4] = 0xF4;
    data[5] = 0x00;
    data
}

pub(crate) fn state_characteristic() -> CharacteristicHandle {
    CharacteristicHandle::new(REAL_TIME_INDICATION_UUID, SERVICE_UUID)
}

/// Counters of the side effects observed by the fake radio.
#[derive(Default)]
pub(crate) struct Counters {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub start_notifies: AtomicUsize,
    pub stop_notifies: AtomicUsize,
    pub discovers: AtomicUsize,
    pub reads: AtomicUsize,
}

impl Counters {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn start_notifies(&self) -> usize {
        self.start_notifies.load(Ordering::SeqCst)
    }

    pub fn stop_notifies(&self) -> usize {
        self.stop_notifies.load(Ordering::SeqCst)
    }

    pub fn discovers(&self) -> usize {
        self.discovers.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

struct Radio {
    counters: Counters,
    connect_delay: Mutex<Duration>,
    read_delay: Mutex<Duration>,
    connect_failures: Mutex<VecDeque<Error>>,
    cached: Mutex<Vec<CharacteristicHandle>>,
    discovered: Mutex<Vec<CharacteristicHandle>>,
    read_results: Mutex<VecDeque<Result<Vec<u8>>>>,
    write_results: Mutex<VecDeque<Result<()>>>,
    payload: Mutex<Vec<u8>>,
    writes: Mutex<Vec<Vec<u8>>>,
    notify_handler: Mutex<Option<NotificationHandler>>,
    current: Mutex<Option<Arc<FakeSession>>>,
}

/// Fake connector with scriptable failures and counters.
#[derive(Clone)]
pub(crate) struct FakeConnector {
    radio: Arc<Radio>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            radio: Arc::new(Radio {
                counters: Counters::default(),
                connect_delay: Mutex::new(Duration::ZERO),
                read_delay: Mutex::new(Duration::ZERO),
                connect_failures: Mutex::new(VecDeque::new()),
                cached: Mutex::new(vec![state_characteristic()]),
                discovered: Mutex::new(vec![state_characteristic()]),
                read_results: Mutex::new(VecDeque::new()),
                write_results: Mutex::new(VecDeque::new()),
                payload: Mutex::new(sample_payload()),
                writes: Mutex::new(Vec::new()),
                notify_handler: Mutex::new(None),
                current: Mutex::new(None),
            }),
        }
    }

    pub fn counters(&self) -> &Counters {
        &self.radio.counters
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.radio.connect_delay.lock() = delay;
        self
    }

    pub fn with_read_delay(self, delay: Duration) -> Self {
        *self.radio.read_delay.lock() = delay;
        self
    }

    /// The characteristic only shows up after a full re-discovery.
    pub fn with_stale_service_cache(self) -> Self {
        self.radio.cached.lock().clear();
        self
    }

    /// The characteristic never shows up.
    pub fn without_state_characteristic(self) -> Self {
        self.radio.cached.lock().clear();
        self.radio.discovered.lock().clear();
        self
    }

    pub fn with_characteristic(self, characteristic: CharacteristicHandle) -> Self {
        self.radio.cached.lock().push(characteristic);
        self.radio.discovered.lock().push(characteristic);
        self
    }

    pub fn fail_next_connect(&self, error: Error) {
        self.radio.connect_failures.lock().push_back(error);
    }

    pub fn push_read(&self, result: Result<Vec<u8>>) {
        self.radio.read_results.lock().push_back(result);
    }

    pub fn push_write(&self, result: Result<()>) {
        self.radio.write_results.lock().push_back(result);
    }

    pub fn set_payload(&self, payload: Vec<u8>) {
        *self.radio.payload.lock() = payload;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.radio.writes.lock().clone()
    }

    /// Push a notification through the currently subscribed handler.
    pub fn notify(&self, data: &[u8]) {
        let handler = self.radio.notify_handler.lock().clone();
        if let Some(handler) = handler {
            handler(data);
        }
    }

    /// Drop the link from the peripheral side.
    pub fn drop_link(&self) {
        let session = self.radio.current.lock().clone();
        if let Some(session) = session {
            session.connected.store(false, Ordering::SeqCst);
            (session.on_disconnect)();
        }
    }
}

#[async_trait]
impl GattConnector for FakeConnector {
    async fn connect(
        &self,
        _device: DeviceHandle,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn GattSession>> {
        self.radio.counters.connects.fetch_add(1, Ordering::SeqCst);

        let delay = *self.radio.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.radio.connect_failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let session = Arc::new(FakeSession {
            radio: self.radio.clone(),
            connected: AtomicBool::new(true),
            on_disconnect,
        });
        *self.radio.current.lock() = Some(session.clone());
        Ok(session)
    }
}

pub(crate) struct FakeSession {
    radio: Arc<Radio>,
    connected: AtomicBool,
    on_disconnect: DisconnectCallback,
}

#[async_trait]
impl GattSession for FakeSession {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn cached_characteristics(&self) -> Vec<CharacteristicHandle> {
        self.radio.cached.lock().clone()
    }

    async fn discover_characteristics(&self) -> Result<Vec<CharacteristicHandle>> {
        self.radio.counters.discovers.fetch_add(1, Ordering::SeqCst);
        Ok(self.radio.discovered.lock().clone())
    }

    async fn start_notify(
        &self,
        _characteristic: CharacteristicHandle,
        handler: NotificationHandler,
    ) -> Result<()> {
        self.radio.counters.start_notifies.fetch_add(1, Ordering::SeqCst);
        *self.radio.notify_handler.lock() = Some(handler);
        Ok(())
    }

    async fn stop_notify(&self, _characteristic: CharacteristicHandle) -> Result<()> {
        self.radio.counters.stop_notifies.fetch_add(1, Ordering::SeqCst);
        *self.radio.notify_handler.lock() = None;
        Ok(())
    }

    async fn write(&self, _characteristic: CharacteristicHandle, data: Vec<u8>) -> Result<()> {
        let scripted = self.radio.write_results.lock().pop_front();
        if let Some(Err(error)) = scripted {
            return Err(error);
        }
        self.radio.writes.lock().push(data);
        Ok(())
    }

    async fn read(&self, _characteristic: CharacteristicHandle) -> Result<Vec<u8>> {
        self.radio.counters.reads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.radio.read_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.radio.read_results.lock().pop_front();
        match scripted {
            Some(result) => result,
            None => Ok(self.radio.payload.lock().clone()),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.radio.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        (self.on_disconnect)();
        Ok(())
    }
}
