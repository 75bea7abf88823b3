use std::sync::Arc;

use chrono::Local;
use tracing::debug;

use crate::shared_state::{AppState, Updater};

/// Drives the host poll timer: waits for the armed deadline, advances the
/// recurring timer and runs one update cycle. Re-arming or stopping the timer
/// wakes the loop so the new deadline is picked up at once.
pub async fn run_timer_loop(state: AppState, updater: Arc<Updater>) {
    loop {
        let Some(timer) = state.timer() else {
            debug!("poll timer stopped, waiting");
            state.timer_changed().await;
            continue;
        };

        let wait = timer
            .next
            .signed_duration_since(Local::now())
            .to_std()
            .unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                if state.advance_timer(&timer, Local::now()) {
                    debug!("poll timer fired");
                    updater.update().await;
                }
            }
            _ = state.timer_changed() => {}
        }
    }
}
