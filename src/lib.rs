//! Reads one weight measurement from a Bluetooth LE body-composition scale.

pub mod domain;
pub mod infrastructure;
