use crate::api::StegClient;
use crate::api::models::{AsyncSubmission, DecodeRequest};
use crate::error::Result;
use crate::job::{AsyncJob, Completion, DECODE_KIND, JobKind, media_data};
use serde_json::Value as JsonValue;

/// Decodes an uploaded image. Nothing is written locally; the decoded
/// payload is handed back as-is.
#[derive(Clone, Debug)]
pub struct DecodeJob {
    pub request: DecodeRequest,
}

impl DecodeJob {
    pub fn new(media_id: impl Into<String>) -> Self {
        Self {
            request: DecodeRequest {
                media_id: media_id.into(),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct DecodeOutcome {
    pub request_id: String,
    pub media_id: String,
    pub status_checks: u32,
    pub media_data: JsonValue,
}

impl AsyncJob for DecodeJob {
    type Output = DecodeOutcome;

    fn kind(&self) -> JobKind {
        DECODE_KIND
    }

    fn media_id(&self) -> &str {
        &self.request.media_id
    }

    async fn submit(&self, client: &StegClient) -> Result<AsyncSubmission> {
        client.submit_decode(&self.request).await
    }

    async fn on_completed(
        self,
        _client: &StegClient,
        completion: Completion,
    ) -> Result<DecodeOutcome> {
        Ok(DecodeOutcome {
            media_data: media_data(&completion),
            request_id: completion.request_id,
            media_id: self.request.media_id,
            status_checks: completion.attempts,
        })
    }
}
