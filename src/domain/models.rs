use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One value delivered by the scale, exactly as it came off the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Vec<u8>,
}

impl RawFrame {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Status/flags byte at offset 0.
    pub fn status_byte(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    /// Little-endian u16 starting at `offset`, if the frame is long enough.
    pub fn u16_le_at(&self, offset: usize) -> Option<u16> {
        let end = offset.checked_add(2)?;
        self.bytes
            .get(offset..end)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    }

    /// True when the frame carries nothing but zero bytes (or nothing at all).
    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

impl From<Vec<u8>> for RawFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// A weight measurement recovered from a stabilized frame.
///
/// Everything except `weight_kg` and `captured_at` is a best-effort estimate
/// derived from weight and impedance. `None` means "not measured", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedReading {
    pub weight_kg: f64,
    pub captured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impedance_ohms: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_fat_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_water_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muscle_mass_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visceral_fat_index: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basal_metabolism_kcal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_type_label: Option<String>,
}

impl DecodedReading {
    pub fn weight_only(weight_kg: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            weight_kg,
            captured_at,
            impedance_ohms: None,
            body_fat_percent: None,
            body_water_percent: None,
            muscle_mass_kg: None,
            visceral_fat_index: None,
            basal_metabolism_kcal: None,
            body_type_label: None,
        }
    }

    pub fn has_body_composition(&self) -> bool {
        self.body_fat_percent.is_some()
            || self.body_water_percent.is_some()
            || self.muscle_mass_kg.is_some()
            || self.visceral_fat_index.is_some()
            || self.basal_metabolism_kcal.is_some()
            || self.body_type_label.is_some()
    }
}

/// Which frame source delivered the captured reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Notification,
    Polling,
}

/// Successful result of a reading session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedReading {
    pub reading: DecodedReading,
    pub device_name: Option<String>,
    pub battery_percent: Option<u8>,
    pub channel: ChannelKind,
}

/// Why a reading session could not produce a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    #[error("Bluetooth LE is not available on this system")]
    BleUnsupported,
    #[error("No matching scale was found")]
    DeviceNotFound,
    #[error("Could not connect to the scale")]
    ConnectionFailed,
    #[error("Scale exposes none of the known services")]
    NoCompatibleService,
    #[error("Scale service exposes none of the known characteristics")]
    NoCompatibleCharacteristic,
    #[error("Characteristic supports neither notifications nor reads")]
    NotificationUnsupported,
    #[error("Frame matches no known weight layout")]
    UnrecognizedLayout,
    #[error("A reading session is already active")]
    SessionAlreadyActive,
    #[error("Connection to the scale was lost")]
    ConnectionLost,
}

/// Terminal result of one `start_reading` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    Captured(CapturedReading),
    Failed { reason: FailureKind },
    TimedOut,
    Cancelled,
}

impl SessionOutcome {
    pub fn failed(reason: FailureKind) -> Self {
        Self::Failed { reason }
    }

    pub fn captured(&self) -> Option<&CapturedReading> {
        match self {
            Self::Captured(capture) => Some(capture),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    ResolvingService,
    ResolvingCharacteristic,
    AwaitingSubscription,
    Listening,
    Stabilizing,
    Captured,
    Failed(FailureKind),
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Captured | Self::Failed(_) | Self::TimedOut | Self::Cancelled
        )
    }

    /// A session occupies the controller from `Scanning` until a terminal state.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != Self::Idle
    }

    fn rank(&self) -> Option<u8> {
        match self {
            Self::Idle => Some(0),
            Self::Scanning => Some(1),
            Self::Connecting => Some(2),
            Self::Connected => Some(3),
            Self::ResolvingService => Some(4),
            Self::ResolvingCharacteristic => Some(5),
            Self::AwaitingSubscription => Some(6),
            Self::Listening => Some(7),
            Self::Stabilizing => Some(8),
            Self::Captured => Some(9),
            Self::Failed(_) | Self::TimedOut | Self::Cancelled => None,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Progress is strictly forward one step at a time, except that a
    /// stabilized frame that fails to decode sends `Stabilizing` back to
    /// `Listening`. Any active state may end in `Failed`, `TimedOut` or
    /// `Cancelled`. A new session begins with `Scanning` once the previous one
    /// is idle or terminal.
    pub fn can_advance_to(&self, next: &SessionState) -> bool {
        if *next == Self::Scanning {
            return !self.is_active();
        }
        if !self.is_active() {
            return false;
        }
        match (self, next) {
            (Self::Stabilizing, Self::Listening) => true,
            (_, Self::Failed(_) | Self::TimedOut | Self::Cancelled) => true,
            (current, next) => match (current.rank(), next.rank()) {
                (Some(from), Some(to)) => to == from + 1,
                _ => false,
            },
        }
    }

    /// Coarse progress signal for the UI, when this state warrants one.
    pub fn status_update(&self) -> Option<StatusUpdate> {
        match self {
            Self::Scanning => Some(StatusUpdate::Scanning),
            Self::Connecting => Some(StatusUpdate::Connecting),
            Self::Connected => Some(StatusUpdate::Connected),
            Self::ResolvingService => Some(StatusUpdate::ResolvingProtocol),
            Self::Listening => Some(StatusUpdate::WaitingForStableReading),
            Self::Captured => Some(StatusUpdate::Captured),
            _ => None,
        }
    }
}

/// Best-effort progress events for whoever renders the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Scanning,
    Connecting,
    Connected,
    ResolvingProtocol,
    WaitingForStableReading,
    Captured,
}

impl StatusUpdate {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Scanning => "Looking for the scale...",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::ResolvingProtocol => "Discovering scale services...",
            Self::WaitingForStableReading => "Step on the scale and hold still",
            Self::Captured => "Weight captured",
        }
    }
}
