//! Scripted in-memory scale for exercising the session without a radio.

use crate::domain::models::RawFrame;
use crate::infrastructure::bluetooth::platform::{
    matches_name_prefix, BleError, BlePlatform, DeviceHandle, Discovery,
};
use crate::infrastructure::bluetooth::protocol::{
    BATTERY_LEVEL, BATTERY_SERVICE, BODY_COMPOSITION_SERVICE, WEIGHT_MEASUREMENT,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const FAKE_ADDRESS: u64 = 0xA4C1_3800_0042;

/// How the fake scale behaves.
#[derive(Debug, Clone)]
pub struct FakeScale {
    pub available: bool,
    /// Advertised name; `None` means the scan never finds anything.
    pub name: Option<String>,
    pub connect_fails: bool,
    /// `connect` never completes.
    pub connect_hangs: bool,
    pub services: Vec<Uuid>,
    pub characteristics: Vec<Uuid>,
    /// Lookups of these identifiers fail with a platform error.
    pub failing_lookups: Vec<Uuid>,
    /// Lookups of these identifiers never complete.
    pub hanging_lookups: Vec<Uuid>,
    pub subscribe_fails: bool,
    /// Pushed as notifications as soon as the subscription is made.
    pub notifications: Vec<Vec<u8>>,
    /// Drop the notification sender after the scripted frames.
    pub close_after_notifications: bool,
    /// Values returned by successive reads; blank once exhausted.
    pub poll_values: Vec<Vec<u8>>,
    pub readable: bool,
    pub battery: Option<u8>,
}

impl Default for FakeScale {
    fn default() -> Self {
        Self {
            available: true,
            name: Some("MIBFS-0042".to_string()),
            connect_fails: false,
            connect_hangs: false,
            services: vec![BODY_COMPOSITION_SERVICE],
            characteristics: vec![WEIGHT_MEASUREMENT],
            failing_lookups: Vec::new(),
            hanging_lookups: Vec::new(),
            subscribe_fails: false,
            notifications: Vec::new(),
            close_after_notifications: false,
            poll_values: Vec::new(),
            readable: true,
            battery: None,
        }
    }
}

/// What the session asked of the platform.
#[derive(Debug, Clone, Default)]
pub struct FakeCalls {
    pub connects: usize,
    pub disconnects: usize,
    pub subscribes: usize,
    pub unsubscribes: usize,
    pub reads: usize,
    pub service_lookups: Vec<Uuid>,
    pub characteristic_lookups: Vec<Uuid>,
}

pub struct FakePlatform {
    scale: FakeScale,
    poll_values: Mutex<VecDeque<Vec<u8>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RawFrame>>>,
    calls: Mutex<FakeCalls>,
}

impl FakePlatform {
    pub fn new(scale: FakeScale) -> Self {
        Self {
            poll_values: Mutex::new(scale.poll_values.iter().cloned().collect()),
            scale,
            subscribers: Mutex::new(Vec::new()),
            calls: Mutex::new(FakeCalls::default()),
        }
    }

    pub fn calls(&self) -> FakeCalls {
        self.calls.lock().unwrap().clone()
    }

    /// Deliver a notification to every live subscriber.
    pub fn push_frame(&self, bytes: &[u8]) {
        for tx in self.subscribers.lock().unwrap().iter() {
            let _ = tx.send(RawFrame::new(bytes.to_vec()));
        }
    }

    /// Simulate the link dropping.
    pub fn drop_link(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

#[async_trait]
impl BlePlatform for FakePlatform {
    type Service = Uuid;
    type Characteristic = Uuid;

    async fn ensure_available(&self) -> Result<(), BleError> {
        if self.scale.available {
            Ok(())
        } else {
            Err(BleError::Unavailable)
        }
    }

    async fn scan(&self, name_prefixes: &[String]) -> Result<DeviceHandle, BleError> {
        if matches_name_prefix(self.scale.name.as_deref(), name_prefixes) {
            return Ok(DeviceHandle::new(FAKE_ADDRESS, self.scale.name.clone()));
        }
        std::future::pending::<Result<DeviceHandle, BleError>>().await
    }

    async fn connect(&self, device: &mut DeviceHandle) -> Result<(), BleError> {
        self.calls.lock().unwrap().connects += 1;
        if self.scale.connect_fails {
            return Err(BleError::Platform("connection attempt timed out".to_string()));
        }
        if self.scale.connect_hangs {
            return std::future::pending::<Result<(), BleError>>().await;
        }
        device.is_connected = true;
        Ok(())
    }

    async fn discover_service(
        &self,
        _device: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<Discovery<Uuid>, BleError> {
        self.calls.lock().unwrap().service_lookups.push(uuid);
        if self.scale.failing_lookups.contains(&uuid) {
            return Err(BleError::Platform("lookup failed".to_string()));
        }
        if self.scale.hanging_lookups.contains(&uuid) {
            return std::future::pending::<Result<Discovery<Uuid>, BleError>>().await;
        }
        let present = self.scale.services.contains(&uuid)
            || (uuid == BATTERY_SERVICE && self.scale.battery.is_some());
        Ok(if present {
            Discovery::Found(uuid)
        } else {
            Discovery::NotFound
        })
    }

    async fn discover_characteristic(
        &self,
        _service: &Uuid,
        uuid: Uuid,
    ) -> Result<Discovery<Uuid>, BleError> {
        self.calls.lock().unwrap().characteristic_lookups.push(uuid);
        if self.scale.failing_lookups.contains(&uuid) {
            return Err(BleError::Platform("lookup failed".to_string()));
        }
        if self.scale.hanging_lookups.contains(&uuid) {
            return std::future::pending::<Result<Discovery<Uuid>, BleError>>().await;
        }
        let present = self.scale.characteristics.contains(&uuid)
            || (uuid == BATTERY_LEVEL && self.scale.battery.is_some());
        Ok(if present {
            Discovery::Found(uuid)
        } else {
            Discovery::NotFound
        })
    }

    async fn subscribe(
        &self,
        _characteristic: &Uuid,
        frames: mpsc::UnboundedSender<RawFrame>,
    ) -> Result<(), BleError> {
        self.calls.lock().unwrap().subscribes += 1;
        if self.scale.subscribe_fails {
            return Err(BleError::SubscriptionRejected("notify not permitted".to_string()));
        }
        for bytes in &self.scale.notifications {
            let _ = frames.send(RawFrame::new(bytes.clone()));
        }
        if !self.scale.close_after_notifications {
            self.subscribers.lock().unwrap().push(frames);
        }
        Ok(())
    }

    async fn unsubscribe(&self, _characteristic: &Uuid) -> Result<(), BleError> {
        self.calls.lock().unwrap().unsubscribes += 1;
        self.subscribers.lock().unwrap().clear();
        Ok(())
    }

    async fn read_value(&self, characteristic: &Uuid) -> Result<Vec<u8>, BleError> {
        self.calls.lock().unwrap().reads += 1;
        if *characteristic == BATTERY_LEVEL {
            return self.scale.battery.map(|b| vec![b]).ok_or(BleError::NotReadable);
        }
        if !self.scale.readable {
            return Err(BleError::NotReadable);
        }
        Ok(self.poll_values.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn disconnect(&self, device: &mut DeviceHandle) -> Result<(), BleError> {
        self.calls.lock().unwrap().disconnects += 1;
        self.subscribers.lock().unwrap().clear();
        device.is_connected = false;
        Ok(())
    }
}
