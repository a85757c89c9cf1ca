//! Frame Decoder
//!
//! Recovers a weight (and, on newer scales, an impedance-based body
//! composition estimate) from a stabilized frame.
//!
//! # Weight layouts
//!
//! Firmware revisions place the weight in different spots, so layouts are
//! tried in a fixed order and the first plausible value wins:
//!
//! ```text
//! [11-12] : Weight, u16 little-endian, kg * 200  (frames >= 13 bytes)
//! [1-2]   : Weight, u16 little-endian, kg * 200  (older Mi Scale)
//! [0-1]   : Weight, u16 little-endian, kg * 200  (fallback)
//! ```
//!
//! # Body composition (frames >= 20 bytes)
//!
//! ```text
//! [9-10]  : Impedance, u16 little-endian, ohms
//! ```

use crate::domain::models::{DecodedReading, FailureKind, RawFrame};
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

/// Raw weight units per kilogram.
pub const WEIGHT_DIVISOR: f64 = 200.0;
pub const MIN_WEIGHT_KG: f64 = 5.0;
pub const MAX_WEIGHT_KG: f64 = 300.0;

/// Frames at least this long may carry an impedance value.
pub const IMPEDANCE_MIN_LEN: usize = 20;
const IMPEDANCE_OFFSET: usize = 9;
/// Impedance is usable only strictly between these bounds.
const IMPEDANCE_EXCLUSIVE_MIN: u16 = 0;
const IMPEDANCE_EXCLUSIVE_MAX: u16 = 10_000;

const BODY_TYPE_LABEL: &str = "Normal";

/// Known placements of the weight field, in probing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightLayout {
    /// Mi Body Composition Scale 2.
    BodyComposition,
    /// Older Mi Scale models.
    Standard,
    Compact,
}

impl WeightLayout {
    pub const PRIORITY: [WeightLayout; 3] = [
        WeightLayout::BodyComposition,
        WeightLayout::Standard,
        WeightLayout::Compact,
    ];

    pub fn offset(self) -> usize {
        match self {
            Self::BodyComposition => 11,
            Self::Standard => 1,
            Self::Compact => 0,
        }
    }

    fn min_len(self) -> usize {
        match self {
            Self::BodyComposition => 13,
            Self::Standard | Self::Compact => self.offset() + 2,
        }
    }

    /// Weight in kilograms if this layout applies and yields a plausible value.
    pub fn weight_kg(self, frame: &RawFrame) -> Option<f64> {
        if frame.len() < self.min_len() {
            return None;
        }
        let raw = frame.u16_le_at(self.offset())?;
        let weight = f64::from(raw) / WEIGHT_DIVISOR;
        trace!(layout = ?self, raw, weight, "weight candidate");
        is_plausible_weight(weight).then_some(weight)
    }
}

pub fn is_plausible_weight(weight_kg: f64) -> bool {
    (MIN_WEIGHT_KG..=MAX_WEIGHT_KG).contains(&weight_kg)
}

/// Round to one decimal place; the wire values are fixed point anyway.
pub fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Decode a stabilized frame.
///
/// Returns `UnrecognizedLayout` when no layout gives a weight in range. That
/// is an expected outcome for noisy frames, not a fault.
pub fn decode(frame: &RawFrame, captured_at: DateTime<Utc>) -> Result<DecodedReading, FailureKind> {
    let (layout, weight) = WeightLayout::PRIORITY
        .iter()
        .find_map(|layout| layout.weight_kg(frame).map(|w| (*layout, w)))
        .ok_or(FailureKind::UnrecognizedLayout)?;

    debug!(?layout, weight, len = frame.len(), "decoded weight");

    let mut reading = DecodedReading::weight_only(round_tenth(weight), captured_at);
    if let Some(impedance) = impedance_ohms(frame) {
        apply_body_composition(&mut reading, weight, impedance);
    }
    Ok(reading)
}

fn impedance_ohms(frame: &RawFrame) -> Option<u16> {
    if frame.len() < IMPEDANCE_MIN_LEN {
        return None;
    }
    let impedance = frame.u16_le_at(IMPEDANCE_OFFSET)?;
    if impedance > IMPEDANCE_EXCLUSIVE_MIN && impedance < IMPEDANCE_EXCLUSIVE_MAX {
        Some(impedance)
    } else {
        trace!(impedance, "impedance out of range, skipping body composition");
        None
    }
}

// Fixed linear approximations. `weight` is the unrounded decoded value.
fn apply_body_composition(reading: &mut DecodedReading, weight: f64, impedance: u16) {
    let z = f64::from(impedance);
    reading.impedance_ohms = Some(impedance);
    reading.body_fat_percent = Some(round_tenth(15.0 + z / 200.0));
    reading.body_water_percent = Some(round_tenth(55.0 - z / 400.0));
    reading.muscle_mass_kg = Some(round_tenth(weight * 0.4));
    reading.visceral_fat_index = Some(round_tenth(z / 1000.0));
    reading.basal_metabolism_kcal = Some(round_tenth(weight * 24.0));
    reading.body_type_label = Some(BODY_TYPE_LABEL.to_string());
}
