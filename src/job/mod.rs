pub mod decode;
pub mod encode;
pub mod poll;
pub mod upload;

use crate::api::StegClient;
use crate::api::models::AsyncSubmission;
use crate::error::{Result, StegError};
use serde_json::Value as JsonValue;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

// Re-exports for convenience
pub use decode::{DecodeJob, DecodeOutcome};
pub use encode::{EncodeJob, EncodeOutcome};
pub use poll::{Completion, PollPolicy, poll_until_complete};
pub use upload::{UploadedMedia, upload_media};

pub type JobKind = &'static str;
pub const ENCODE_KIND: JobKind = "encode";
pub const DECODE_KIND: JobKind = "decode";

/// An asynchronous request against the service: submitted once, then polled
/// until the status endpoint reports completion.
pub trait AsyncJob: Send + Sync + Sized {
    type Output: Send;

    fn kind(&self) -> JobKind;

    fn media_id(&self) -> &str;

    fn submit(&self, client: &StegClient) -> impl Future<Output = Result<AsyncSubmission>> + Send;

    /// Turns the `media_data` of the completed status into the job's output.
    fn on_completed(
        self,
        client: &StegClient,
        completion: Completion,
    ) -> impl Future<Output = Result<Self::Output>> + Send;

    fn run(
        self,
        client: &StegClient,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Self::Output>> + Send {
        async move {
            let kind = self.kind();
            let media_id = self.media_id().to_string();

            // a submitted request runs remotely whether or not it is polled
            if cancel.is_cancelled() {
                return Err(StegError::CancelledBeforeSubmit { kind, media_id });
            }

            let submission = self.submit(client).await?;
            let request_id = submission.request_id;
            info!(kind, %media_id, %request_id, "Request submitted");

            let completion = poll_until_complete(client, &request_id, policy, cancel)
                .await
                .inspect_err(|error| {
                    error!(kind, %media_id, %request_id, %error, "Request did not complete")
                })?;
            info!(kind, %request_id, attempts = completion.attempts, "Request completed");

            self.on_completed(client, completion).await
        }
    }
}

/// `media_data` of a completed status, `null` when the service sent none.
pub(crate) fn media_data(completion: &Completion) -> JsonValue {
    completion
        .status
        .media_data
        .clone()
        .unwrap_or(JsonValue::Null)
}
