// Waits for either completion-side cancellation or Ctrl+C. On Ctrl+C the
// deletion token is cancelled so no further chunk is dispatched.

use objrecycle_rs::DeletionCancellationToken;
use tokio::task::JoinHandle;
use tokio::{select, signal};
use tracing::{debug, warn};

pub fn spawn_ctrl_c_handler(cancellation_token: DeletionCancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = cancellation_token.cancelled() => {
                debug!("cancellation_token canceled.")
            }
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received, stopping after in-flight requests.");
                cancellation_token.cancel();
            }
        }
    })
}
