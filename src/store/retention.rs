//! Background retention sweeper.

use std::sync::Arc;
use std::time::Duration;

use super::LocalStore;

/// Spawn a task that periodically applies the age-based retention rule to
/// the whole store.
///
/// Each cycle runs on its own blocking task so a slow sweep never delays the
/// next tick. The task lives for the lifetime of the process.
pub fn spawn_sweeper(store: Arc<LocalStore>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            tracing::debug!("starting periodic retention sweep");
            let store = store.clone();
            tokio::task::spawn_blocking(move || store.sweep());
        }
    });
}
