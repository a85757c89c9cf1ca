//! Scale Protocol Constants
//!
//! GATT identifiers and timing for the Mi Scale family. Candidate lists are
//! ordered by priority; discovery takes the first one the device exposes.

use std::time::Duration;
use uuid::Uuid;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
/// `0000xxxx-0000-1000-8000-00805f9b34fb`.
pub const fn bluetooth_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb | ((short as u128) << 96))
}

/// Body Composition Service
pub const BODY_COMPOSITION_SERVICE: Uuid = bluetooth_uuid(0x181B);
/// Weight Scale Service
pub const WEIGHT_SCALE_SERVICE: Uuid = bluetooth_uuid(0x181D);
/// Xiaomi vendor services
pub const XIAOMI_SERVICE: Uuid = bluetooth_uuid(0xFEE0);
pub const XIAOMI_SERVICE_ALT: Uuid = bluetooth_uuid(0xFEE1);

pub const CANDIDATE_SERVICES: &[Uuid] = &[
    BODY_COMPOSITION_SERVICE,
    WEIGHT_SCALE_SERVICE,
    XIAOMI_SERVICE,
    XIAOMI_SERVICE_ALT,
];

/// Weight Measurement
pub const WEIGHT_MEASUREMENT: Uuid = bluetooth_uuid(0x2A9D);
pub const WEIGHT_FEATURE: Uuid = bluetooth_uuid(0x2A98);
/// Body Composition Measurement
pub const BODY_COMPOSITION_MEASUREMENT: Uuid = bluetooth_uuid(0x2A9C);
pub const WEIGHT_SCALE_FEATURE: Uuid = bluetooth_uuid(0x2A9E);
/// Xiaomi notify characteristic
pub const XIAOMI_NOTIFY: Uuid = bluetooth_uuid(0xFEE1);
/// Xiaomi write characteristic
pub const XIAOMI_WRITE: Uuid = bluetooth_uuid(0xFEE2);

pub const CANDIDATE_CHARACTERISTICS: &[Uuid] = &[
    WEIGHT_MEASUREMENT,
    WEIGHT_FEATURE,
    BODY_COMPOSITION_MEASUREMENT,
    WEIGHT_SCALE_FEATURE,
    XIAOMI_NOTIFY,
    XIAOMI_WRITE,
];

pub const BATTERY_SERVICE: Uuid = bluetooth_uuid(0x180F);
pub const BATTERY_LEVEL: Uuid = bluetooth_uuid(0x2A19);

/// Wall-clock budget from `Connected` until a reading is captured.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between manual reads when notifications are unavailable.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polling gives up after this long.
pub const POLL_WINDOW: Duration = Duration::from_secs(60);
