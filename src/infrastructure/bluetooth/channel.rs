//! Frame channels
//!
//! A resolved characteristic becomes a stream of [`RawFrame`]s. Notifications
//! are preferred; when the scale refuses the subscription the channel polls
//! the characteristic value once per [`POLL_INTERVAL`] instead.

use crate::domain::models::{ChannelKind, FailureKind, RawFrame};
use crate::infrastructure::bluetooth::platform::{BleError, BlePlatform};
use crate::infrastructure::bluetooth::protocol::{POLL_INTERVAL, POLL_WINDOW};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

pub enum FrameChannel<P: BlePlatform> {
    Notification(NotificationChannel<P>),
    Polling(PollingChannel<P>),
}

impl<P: BlePlatform> FrameChannel<P> {
    /// Subscribe to notifications, falling back to polling if that fails.
    pub async fn open(platform: &P, characteristic: P::Characteristic) -> Self {
        match NotificationChannel::subscribe(platform, characteristic.clone()).await {
            Ok(channel) => {
                info!("Notifications enabled");
                Self::Notification(channel)
            }
            Err(e) => {
                warn!(error = %e, "Notifications unavailable, polling characteristic instead");
                Self::Polling(PollingChannel::new(characteristic))
            }
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Notification(_) => ChannelKind::Notification,
            Self::Polling(_) => ChannelKind::Polling,
        }
    }

    /// Next frame, `Ok(None)` once the source is exhausted.
    pub async fn next_frame(&mut self, platform: &P) -> Result<Option<RawFrame>, FailureKind> {
        match self {
            Self::Notification(channel) => Ok(channel.next_frame().await),
            Self::Polling(channel) => channel.next_frame(platform).await,
        }
    }

    /// Unsubscribe or stop polling.
    pub async fn close(self, platform: &P) {
        match self {
            Self::Notification(channel) => channel.close(platform).await,
            Self::Polling(_) => debug!("Polling stopped"),
        }
    }
}

pub struct NotificationChannel<P: BlePlatform> {
    characteristic: P::Characteristic,
    frames: mpsc::UnboundedReceiver<RawFrame>,
}

impl<P: BlePlatform> NotificationChannel<P> {
    pub async fn subscribe(platform: &P, characteristic: P::Characteristic) -> Result<Self, BleError> {
        let (tx, rx) = mpsc::unbounded_channel();
        platform.subscribe(&characteristic, tx).await?;
        Ok(Self {
            characteristic,
            frames: rx,
        })
    }

    async fn next_frame(&mut self) -> Option<RawFrame> {
        self.frames.recv().await
    }

    async fn close(mut self, platform: &P) {
        self.frames.close();
        if let Err(e) = platform.unsubscribe(&self.characteristic).await {
            warn!(error = %e, "Failed to unsubscribe from notifications");
        } else {
            debug!("Unsubscribed from notifications");
        }
    }
}

pub struct PollingChannel<P: BlePlatform> {
    characteristic: P::Characteristic,
    ticker: Interval,
    deadline: Instant,
}

impl<P: BlePlatform> PollingChannel<P> {
    pub fn new(characteristic: P::Characteristic) -> Self {
        let mut ticker = time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            characteristic,
            ticker,
            deadline: Instant::now() + POLL_WINDOW,
        }
    }

    /// Reads once per tick until a non-blank value shows up.
    ///
    /// A characteristic that cannot be read at all ends the channel with
    /// `NotificationUnsupported`; other read errors only skip the tick.
    async fn next_frame(&mut self, platform: &P) -> Result<Option<RawFrame>, FailureKind> {
        loop {
            if Instant::now() >= self.deadline {
                info!("Polling window elapsed");
                return Ok(None);
            }
            self.ticker.tick().await;

            match platform.read_value(&self.characteristic).await {
                Ok(bytes) => {
                    let frame = RawFrame::new(bytes);
                    if frame.is_blank() {
                        trace!("Polled blank value");
                        continue;
                    }
                    return Ok(Some(frame));
                }
                Err(BleError::NotReadable) => {
                    warn!("Characteristic cannot be read either");
                    return Err(FailureKind::NotificationUnsupported);
                }
                Err(e) => debug!(error = %e, "Poll read failed, retrying next tick"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::fake::{FakePlatform, FakeScale};
    use crate::infrastructure::bluetooth::protocol::WEIGHT_MEASUREMENT;

    #[tokio::test(start_paused = true)]
    async fn test_notifications_preferred() {
        let platform = FakePlatform::new(FakeScale {
            notifications: vec![vec![0x22, 0x01]],
            ..FakeScale::default()
        });

        let mut channel = FrameChannel::open(&platform, WEIGHT_MEASUREMENT).await;
        assert_eq!(channel.kind(), ChannelKind::Notification);
        assert_eq!(
            channel.next_frame(&platform).await,
            Ok(Some(RawFrame::new(vec![0x22, 0x01])))
        );

        channel.close(&platform).await;
        let calls = platform.calls();
        assert_eq!(calls.subscribes, 1);
        assert_eq!(calls.unsubscribes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_skips_blank_values() {
        let platform = FakePlatform::new(FakeScale {
            subscribe_fails: true,
            poll_values: vec![Vec::new(), vec![0, 0, 0], vec![0x03, 0x40, 0x1F]],
            ..FakeScale::default()
        });

        let started = Instant::now();
        let mut channel = FrameChannel::open(&platform, WEIGHT_MEASUREMENT).await;
        assert_eq!(channel.kind(), ChannelKind::Polling);

        let frame = channel.next_frame(&platform).await.unwrap();
        assert_eq!(frame, Some(RawFrame::new(vec![0x03, 0x40, 0x1F])));
        // first tick is immediate, then two more one second apart
        assert_eq!(started.elapsed(), POLL_INTERVAL * 2);
        assert_eq!(platform.calls().reads, 3);

        channel.close(&platform).await;
        assert_eq!(platform.calls().unsubscribes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_window_is_bounded() {
        let platform = FakePlatform::new(FakeScale {
            subscribe_fails: true,
            ..FakeScale::default()
        });

        let mut channel = FrameChannel::open(&platform, WEIGHT_MEASUREMENT).await;
        assert_eq!(channel.next_frame(&platform).await, Ok(None));
        assert!(platform.calls().reads as u64 >= POLL_WINDOW.as_secs());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_characteristic_fails_polling() {
        let platform = FakePlatform::new(FakeScale {
            subscribe_fails: true,
            readable: false,
            ..FakeScale::default()
        });

        let mut channel = FrameChannel::open(&platform, WEIGHT_MEASUREMENT).await;
        assert_eq!(
            channel.next_frame(&platform).await,
            Err(FailureKind::NotificationUnsupported)
        );
    }
}
