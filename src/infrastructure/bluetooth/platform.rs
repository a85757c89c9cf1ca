//! Platform BLE capability
//!
//! Everything the session needs from the operating system's Bluetooth stack.
//! The controller is generic over this trait so the same state machine runs
//! against WinRT and against scripted devices in tests.

use crate::domain::models::RawFrame;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A scale found by scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Platform address (the 48-bit Bluetooth address on WinRT).
    pub address: u64,
    pub display_name: Option<String>,
    pub is_connected: bool,
}

impl DeviceHandle {
    pub fn new(address: u64, display_name: Option<String>) -> Self {
        Self {
            address,
            display_name,
            is_connected: false,
        }
    }
}

/// Result of looking up one GATT identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery<T> {
    Found(T),
    NotFound,
}

#[derive(Debug, Error)]
pub enum BleError {
    #[error("Bluetooth LE adapter unavailable")]
    Unavailable,
    #[error("Characteristic is not readable")]
    NotReadable,
    #[error("Notification subscription rejected: {0}")]
    SubscriptionRejected(String),
    #[error("Device disconnected")]
    Disconnected,
    #[error("Bluetooth platform error: {0}")]
    Platform(String),
}

#[cfg(windows)]
impl From<windows::core::Error> for BleError {
    fn from(error: windows::core::Error) -> Self {
        BleError::Platform(error.to_string())
    }
}

#[async_trait]
pub trait BlePlatform: Send + Sync + 'static {
    type Service: Send + Sync;
    type Characteristic: Clone + Send + Sync + 'static;

    /// Fails with `Unavailable` when there is no usable LE adapter.
    async fn ensure_available(&self) -> Result<(), BleError>;

    /// Scan until a device whose advertised name starts with one of
    /// `name_prefixes` shows up. Callers bound this with a timeout.
    async fn scan(&self, name_prefixes: &[String]) -> Result<DeviceHandle, BleError>;

    async fn connect(&self, device: &mut DeviceHandle) -> Result<(), BleError>;

    async fn discover_service(
        &self,
        device: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<Discovery<Self::Service>, BleError>;

    async fn discover_characteristic(
        &self,
        service: &Self::Service,
        uuid: Uuid,
    ) -> Result<Discovery<Self::Characteristic>, BleError>;

    /// Register for value-changed notifications. Each update is pushed into
    /// `frames`; the platform drops the sender when the link goes away.
    async fn subscribe(
        &self,
        characteristic: &Self::Characteristic,
        frames: mpsc::UnboundedSender<RawFrame>,
    ) -> Result<(), BleError>;

    async fn unsubscribe(&self, characteristic: &Self::Characteristic) -> Result<(), BleError>;

    /// Current value of the characteristic.
    async fn read_value(&self, characteristic: &Self::Characteristic) -> Result<Vec<u8>, BleError>;

    async fn disconnect(&self, device: &mut DeviceHandle) -> Result<(), BleError>;
}

/// Case-sensitive prefix match on the advertised name.
pub fn matches_name_prefix(name: Option<&str>, prefixes: &[String]) -> bool {
    match name {
        Some(name) => prefixes.iter().any(|prefix| name.starts_with(prefix.as_str())),
        None => false,
    }
}
