use scale_link::domain::models::SessionOutcome;
use scale_link::domain::settings::SettingsService;
use scale_link::infrastructure::bluetooth::{BlePlatform, SessionConfig, SessionController};
use scale_link::infrastructure::logging;
use scale_link::infrastructure::storage::{JsonLinesSink, ReadingSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let _log_guard = logging::init_logger(&settings_service.get().log_settings)?;
    info!("Starting ScaleLink v{}", env!("CARGO_PKG_VERSION"));

    let config = SessionConfig::from(settings_service.get());
    let outcome = run(config).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let Some(capture) = outcome.captured() {
        let mut sink = JsonLinesSink::new(settings_service.readings_path());
        if let Err(e) = sink.record(capture) {
            error!(error = %e, path = %sink.path().display(), "Failed to save reading");
        }
    }
    Ok(())
}

#[cfg(windows)]
async fn run(config: SessionConfig) -> anyhow::Result<SessionOutcome> {
    use scale_link::infrastructure::bluetooth::WinRtPlatform;

    read_once(Arc::new(WinRtPlatform::new()), config).await
}

#[cfg(not(windows))]
async fn run(_config: SessionConfig) -> anyhow::Result<SessionOutcome> {
    use scale_link::domain::models::FailureKind;

    tracing::warn!("No Bluetooth LE backend for this platform");
    Ok(SessionOutcome::failed(FailureKind::BleUnsupported))
}

/// One reading session; Ctrl-C cancels it.
#[cfg_attr(not(windows), allow(dead_code))]
async fn read_once<P: BlePlatform>(
    platform: Arc<P>,
    config: SessionConfig,
) -> anyhow::Result<SessionOutcome> {
    let (event_sender, mut events) = mpsc::unbounded_channel();
    let controller = SessionController::new(platform, config, event_sender);

    let printer = tokio::spawn(async move {
        while let Some(update) = events.recv().await {
            eprintln!("{}", update.message());
        }
    });

    let outcome = controller
        .read_until_interrupted(tokio::signal::ctrl_c())
        .await;

    drop(controller);
    printer.await?;
    Ok(outcome)
}
