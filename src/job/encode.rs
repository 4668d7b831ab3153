use crate::api::StegClient;
use crate::api::models::{AsyncSubmission, EncodeRequest};
use crate::error::{Result, StegError};
use crate::job::{AsyncJob, Completion, ENCODE_KIND, JobKind, media_data};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tracing::info;

/// Encodes an uploaded image and saves the result to `output_path`.
#[derive(Clone, Debug)]
pub struct EncodeJob {
    pub request: EncodeRequest,
    pub output_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct EncodeOutcome {
    pub request_id: String,
    pub output_path: PathBuf,
    pub bytes_written: u64,
    pub status_checks: u32,
    pub media_data: JsonValue,
}

impl AsyncJob for EncodeJob {
    type Output = EncodeOutcome;

    fn kind(&self) -> JobKind {
        ENCODE_KIND
    }

    fn media_id(&self) -> &str {
        &self.request.media_id
    }

    async fn submit(&self, client: &StegClient) -> Result<AsyncSubmission> {
        client.submit_encode(&self.request).await
    }

    async fn on_completed(
        self,
        client: &StegClient,
        completion: Completion,
    ) -> Result<EncodeOutcome> {
        let media_url = completion
            .status
            .media_url()
            .ok_or(StegError::MissingField {
                endpoint: "media_status",
                field: "media_data.media_url",
            })?
            .to_string();

        let bytes_written = client.download_to(&media_url, &self.output_path).await?;
        info!(output = %self.output_path.display(), bytes_written, "Encoded media saved");

        Ok(EncodeOutcome {
            media_data: media_data(&completion),
            request_id: completion.request_id,
            output_path: self.output_path,
            bytes_written,
            status_checks: completion.attempts,
        })
    }
}
