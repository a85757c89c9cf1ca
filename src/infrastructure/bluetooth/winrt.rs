//! WinRT Bluetooth LE backend
//!
//! Implements [`BlePlatform`] on top of `Windows.Devices.Bluetooth`. GATT
//! lookups always bypass the system cache; scales change their attribute
//! table between firmware revisions.

use crate::domain::models::RawFrame;
use crate::infrastructure::bluetooth::platform::{
    matches_name_prefix, BleError, BlePlatform, DeviceHandle, Discovery,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattDeviceService, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, IBuffer};

/// Where a notification handler delivers frames. Emptied when the link drops
/// so the session sees the stream close.
type FrameSlot = Arc<Mutex<Option<mpsc::UnboundedSender<RawFrame>>>>;

struct ConnectedScale {
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    status_token: i64,
}

struct Subscription {
    token: i64,
    slot: FrameSlot,
}

#[derive(Default)]
pub struct WinRtPlatform {
    connected: Mutex<HashMap<u64, ConnectedScale>>,
    /// Keyed by characteristic attribute handle.
    subscriptions: Arc<Mutex<HashMap<u16, Subscription>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn buffer_bytes(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

fn check_status(status: GattCommunicationStatus, what: &str) -> Result<(), BleError> {
    if status == GattCommunicationStatus::Success {
        Ok(())
    } else {
        Err(BleError::Platform(format!("{what}: {status:?}")))
    }
}

/// Stops the advertisement watcher when the scan future is dropped.
struct WatcherGuard(BluetoothLEAdvertisementWatcher);

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.Stop() {
            debug!(error = %e, "Failed to stop advertisement watcher");
        }
    }
}

impl WinRtPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn device(&self, address: u64) -> Result<BluetoothLEDevice, BleError> {
        lock(&self.connected)
            .get(&address)
            .map(|scale| scale.device.clone())
            .ok_or(BleError::Disconnected)
    }

    async fn open_gatt_session(device: &BluetoothLEDevice) -> windows::core::Result<GattSession> {
        let device_id = device.BluetoothDeviceId()?;
        let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        Ok(session)
    }

    /// Close every notification stream when the scale goes out of range.
    fn watch_connection(&self, device: &BluetoothLEDevice) -> windows::core::Result<i64> {
        let subscriptions = self.subscriptions.clone();
        let handler = TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    info!("Scale disconnected");
                    for subscription in lock(&subscriptions).values() {
                        lock(&subscription.slot).take();
                    }
                }
            }
            Ok(())
        });
        device.ConnectionStatusChanged(&handler)
    }
}

#[async_trait]
impl BlePlatform for WinRtPlatform {
    type Service = GattDeviceService;
    type Characteristic = GattCharacteristic;

    async fn ensure_available(&self) -> Result<(), BleError> {
        let adapter = match BluetoothAdapter::GetDefaultAsync()?.await {
            Ok(adapter) => adapter,
            Err(e) => {
                debug!(error = %e, "No default Bluetooth adapter");
                return Err(BleError::Unavailable);
            }
        };
        if !adapter.IsLowEnergySupported()? {
            return Err(BleError::Unavailable);
        }
        Ok(())
    }

    async fn scan(&self, name_prefixes: &[String]) -> Result<DeviceHandle, BleError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let prefixes = name_prefixes.to_vec();

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    if matches_name_prefix(Some(&name), &prefixes) {
                        let _ = tx.send(DeviceHandle::new(args.BluetoothAddress()?, Some(name)));
                    }
                }
                Ok(())
            },
        );
        watcher.Received(&handler)?;
        watcher.Start()?;
        let _guard = WatcherGuard(watcher);

        rx.recv()
            .await
            .ok_or_else(|| BleError::Platform("advertisement watcher stopped".to_string()))
    }

    async fn connect(&self, device: &mut DeviceHandle) -> Result<(), BleError> {
        info!("Connecting to {:#X}", device.address);
        let le_device = BluetoothLEDevice::FromBluetoothAddressAsync(device.address)?.await?;

        let session = match Self::open_gatt_session(&le_device).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "Failed to create GattSession, continuing without it");
                None
            }
        };
        let status_token = self.watch_connection(&le_device)?;

        if device.display_name.is_none() {
            device.display_name = le_device.Name().ok().map(|name| name.to_string());
        }
        lock(&self.connected).insert(
            device.address,
            ConnectedScale {
                device: le_device,
                session,
                status_token,
            },
        );
        device.is_connected = true;
        Ok(())
    }

    async fn discover_service(
        &self,
        device: &DeviceHandle,
        uuid: Uuid,
    ) -> Result<Discovery<GattDeviceService>, BleError> {
        let le_device = self.device(device.address)?;
        let result = le_device
            .GetGattServicesForUuidWithCacheModeAsync(to_guid(uuid), BluetoothCacheMode::Uncached)?
            .await?;
        check_status(result.Status()?, "service lookup")?;

        let services = result.Services()?;
        if services.Size()? == 0 {
            return Ok(Discovery::NotFound);
        }
        Ok(Discovery::Found(services.GetAt(0)?))
    }

    async fn discover_characteristic(
        &self,
        service: &GattDeviceService,
        uuid: Uuid,
    ) -> Result<Discovery<GattCharacteristic>, BleError> {
        let result = service
            .GetCharacteristicsForUuidWithCacheModeAsync(to_guid(uuid), BluetoothCacheMode::Uncached)?
            .await?;
        check_status(result.Status()?, "characteristic lookup")?;

        let characteristics = result.Characteristics()?;
        if characteristics.Size()? == 0 {
            return Ok(Discovery::NotFound);
        }
        Ok(Discovery::Found(characteristics.GetAt(0)?))
    }

    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
        frames: mpsc::UnboundedSender<RawFrame>,
    ) -> Result<(), BleError> {
        let properties = characteristic.CharacteristicProperties()?;
        if !properties.contains(GattCharacteristicProperties::Notify) {
            return Err(BleError::SubscriptionRejected(
                "characteristic does not notify".to_string(),
            ));
        }

        let slot: FrameSlot = Arc::new(Mutex::new(Some(frames)));
        let handler_slot = slot.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let bytes = buffer_bytes(&args.CharacteristicValue()?)?;
                    if let Some(frames) = lock(&handler_slot).as_ref() {
                        let _ = frames.send(RawFrame::new(bytes));
                    }
                }
                Ok(())
            },
        );
        let token = characteristic.ValueChanged(&handler)?;

        let status = characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )?
            .await;
        match status {
            Ok(status) if status == GattCommunicationStatus::Success => {}
            Ok(status) => {
                let _ = characteristic.RemoveValueChanged(token);
                return Err(BleError::SubscriptionRejected(format!("{status:?}")));
            }
            Err(e) => {
                let _ = characteristic.RemoveValueChanged(token);
                return Err(BleError::SubscriptionRejected(e.to_string()));
            }
        }

        lock(&self.subscriptions).insert(
            characteristic.AttributeHandle()?,
            Subscription { token, slot },
        );
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &GattCharacteristic) -> Result<(), BleError> {
        let handle = characteristic.AttributeHandle()?;
        let Some(subscription) = lock(&self.subscriptions).remove(&handle) else {
            return Ok(());
        };
        lock(&subscription.slot).take();
        characteristic.RemoveValueChanged(subscription.token)?;

        let status = characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::None,
            )?
            .await?;
        check_status(status, "disable notifications")
    }

    async fn read_value(&self, characteristic: &GattCharacteristic) -> Result<Vec<u8>, BleError> {
        let properties = characteristic.CharacteristicProperties()?;
        if !properties.contains(GattCharacteristicProperties::Read) {
            return Err(BleError::NotReadable);
        }

        let result = characteristic
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        match result.Status()? {
            GattCommunicationStatus::Success => Ok(buffer_bytes(&result.Value()?)?),
            GattCommunicationStatus::AccessDenied => Err(BleError::NotReadable),
            status => Err(BleError::Platform(format!("read: {status:?}"))),
        }
    }

    async fn disconnect(&self, device: &mut DeviceHandle) -> Result<(), BleError> {
        device.is_connected = false;
        let Some(scale) = lock(&self.connected).remove(&device.address) else {
            return Ok(());
        };
        let _ = scale.device.RemoveConnectionStatusChanged(scale.status_token);
        if let Some(session) = scale.session {
            session.Close()?;
        }
        scale.device.Close()?;
        info!("Disconnected from {:#X}", device.address);
        Ok(())
    }
}
