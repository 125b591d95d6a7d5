use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use super::engine::SyncMode;
use crate::session::{SessionError, SyncSession};

/// Runs `mode` every `interval` until `cancel` fires. Cancellation is only
/// observed between passes; a pass that panics or finds the session busy is
/// logged and the loop carries on. Returns the number of completed passes.
pub async fn run_watch(
    session: &SyncSession,
    mode: SyncMode,
    interval: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut passes = 0u64;
    tracing::info!(%mode, interval_secs = interval.as_secs(), "watch started");
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match AssertUnwindSafe(session.try_sync(mode)).catch_unwind().await {
            Ok(Ok(result)) => {
                passes += 1;
                if result.transferred() > 0 {
                    tracing::info!(
                        uploaded = result.uploaded,
                        downloaded = result.downloaded,
                        errors = result.errors,
                        "watch pass transferred files"
                    );
                }
            }
            Ok(Err(SessionError::Busy)) => {
                tracing::debug!("previous pass still running, skipping this tick");
            }
            Ok(Err(err)) => tracing::warn!(error = %err, "watch pass failed"),
            Err(_) => tracing::error!("watch pass panicked"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::info!(passes, "watch stopped");
    passes
}
