//! Bluetooth Module
//!
//! Takes a body-composition scale from advertisement to one decoded reading.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SessionController                      │
//! │  (one reading at a time, state machine, cancellation)     │
//! └──────────────┬──────────────────┬────────────────────────┘
//!                │                  │
//!                ▼                  ▼
//!        ┌──────────────┐   ┌──────────────┐
//!        │   Resolver   │   │ FrameChannel │
//!        │ - services   │   │ - notify     │
//!        │ - character- │   │ - polling    │
//!        │   istics     │   │   fallback   │
//!        └──────┬───────┘   └──────┬───────┘
//!               └────────┬─────────┘
//!                        ▼
//!                ┌───────────────┐
//!                │  BlePlatform  │
//!                │ (WinRT, fake) │
//!                └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT identifiers and timing constants
//! - [`platform`] - The capability the operating system has to provide
//! - [`resolver`] - Ordered service and characteristic lookup
//! - [`channel`] - Notification subscription with polling fallback
//! - [`session`] - The reading session controller

pub mod channel;
#[cfg(test)]
pub(crate) mod fake;
pub mod platform;
pub mod protocol;
pub mod resolver;
pub mod session;
#[cfg(windows)]
pub mod winrt;

pub use platform::{BleError, BlePlatform, DeviceHandle};
pub use session::{ReadingHandle, SessionConfig, SessionController};
#[cfg(windows)]
pub use winrt::WinRtPlatform;
