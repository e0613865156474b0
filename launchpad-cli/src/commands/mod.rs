pub mod config;
pub mod deploy;
pub mod loadtest;
pub mod plan;

use tokio_util::sync::CancellationToken;

/// Token cancelled on the first Ctrl+C
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, stopping after the current step...");
            trigger.cancel();
        }
    });
    cancel
}
