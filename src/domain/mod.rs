//! Pure scale logic: frame models, stabilization, decoding and settings.

pub mod decoder;
pub mod models;
pub mod settings;
pub mod stabilization;
