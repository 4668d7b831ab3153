pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod usage;
pub mod walkthrough;

use anyhow::{Result, bail};
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

//
// Re-export
//
pub use api::{StegClient, UsageQuery};
pub use config::{Config, DecodeUpload, PollMode};
pub use error::StegError;
pub use job::{AsyncJob, DecodeJob, EncodeJob, PollPolicy, UploadedMedia, poll_until_complete};
pub use walkthrough::Walkthrough;

pub async fn run(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();

    // Ctrl-C abandons whichever step is in flight
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    let result = run_until_cancelled(&config, cancel, std::io::stdout()).await;
    watcher.abort();

    result?;
    info!("Walkthrough finished");
    Ok(())
}

/// Runs every walkthrough step, reporting to `out`, and stops as soon as
/// `cancel` fires. Hands `out` back on success.
pub async fn run_until_cancelled<W: Write>(
    config: &Config,
    cancel: CancellationToken,
    out: W,
) -> Result<W> {
    let mut walkthrough = Walkthrough::new(config, cancel.clone(), out)?;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => bail!("Walkthrough interrupted"),
        result = walkthrough.run() => result?,
    }

    Ok(walkthrough.into_output())
}
