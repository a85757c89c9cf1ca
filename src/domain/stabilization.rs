//! Stabilization Classifier
//!
//! The scale streams intermediate frames while the user steps on and
//! balances. Only a frame whose status byte carries one of the "final"
//! sentinels is worth decoding.

use crate::domain::models::RawFrame;

/// Frames at least this long come from a body-composition capable scale.
pub const BODY_COMPOSITION_MIN_LEN: usize = 13;

/// Final-reading status bytes for body-composition frames.
const BODY_COMPOSITION_FINAL: [u8; 2] = [0x02, 0x22];

/// Final-reading status bytes for weight-only frames.
const WEIGHT_ONLY_FINAL: [u8; 2] = [0x03, 0x23];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceGeneration {
    BodyComposition,
    WeightOnly,
}

impl DeviceGeneration {
    /// Infer the generation from frame length.
    pub fn of(frame: &RawFrame) -> Self {
        if frame.len() >= BODY_COMPOSITION_MIN_LEN {
            Self::BodyComposition
        } else {
            Self::WeightOnly
        }
    }

    fn final_status_bytes(self) -> &'static [u8] {
        match self {
            Self::BodyComposition => &BODY_COMPOSITION_FINAL,
            Self::WeightOnly => &WEIGHT_ONLY_FINAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stabilization {
    Stabilized,
    Transient,
    /// Nothing to look at. Handled exactly like `Transient`.
    Indeterminate,
}

impl Stabilization {
    pub fn is_stabilized(self) -> bool {
        self == Self::Stabilized
    }
}

/// Classify a frame. Never fails; unknown status bytes mean "keep waiting".
pub fn classify(frame: &RawFrame, generation: DeviceGeneration) -> Stabilization {
    match frame.status_byte() {
        None => Stabilization::Indeterminate,
        Some(status) if generation.final_status_bytes().contains(&status) => {
            Stabilization::Stabilized
        }
        Some(_) => Stabilization::Transient,
    }
}
