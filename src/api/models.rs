use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

/// Literal status the service reports once an async request is done.
pub const COMPLETED_STATUS: &str = "Completed.";

/// Why a file is being uploaded. Mostly matters for videos, where the
/// service builds thumbnails for encode requests.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Encode,
    Decode,
}

/// See https://docs.steg.ai/#license-object
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct License {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editorial: Option<bool>,
}

impl License {
    pub fn editorial() -> Self {
        Self {
            editorial: Some(true),
        }
    }
}

/// Body of `POST /upload`
#[derive(Clone, Debug, Serialize)]
pub struct UploadRequest {
    pub name: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<RequestType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<BTreeMap<String, String>>,
}

/// Presigned location a file is pushed to, without the API key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadTarget {
    pub url: String,
    #[serde(default, deserialize_with = "de_fields")]
    pub fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UploadGrant {
    pub post_to: UploadTarget,
    pub media_id: String,
}

/// Body of `POST /encode_image_async`
#[derive(Clone, Debug, Serialize)]
pub struct EncodeRequest {
    pub media_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    pub method: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<BTreeMap<String, String>>,
}

/// Body of `POST /decode_image_async`
#[derive(Clone, Debug, Serialize)]
pub struct DecodeRequest {
    pub media_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AsyncSubmission {
    pub request_id: String,
}

/// One answer of `GET /media_status`
#[derive(Clone, Debug, Deserialize)]
pub struct StatusResult {
    pub status: String,
    #[serde(default)]
    pub media_data: Option<JsonValue>,
}

impl StatusResult {
    pub fn state(&self) -> RequestState {
        RequestState::from_status(&self.status)
    }

    /// `media_data.media_url`, present once an encode has completed.
    pub fn media_url(&self) -> Option<&str> {
        self.media_data.as_ref()?.get("media_url")?.as_str()
    }
}

/// Lifecycle of an async encode/decode request as seen by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    Submitted,
    Polling,
    Completed,
    Failed,
}

impl RequestState {
    /// Only the exact completion literal counts as done.
    pub fn from_status(status: &str) -> Self {
        if status == COMPLETED_STATUS {
            return RequestState::Completed;
        }

        let lowered = status.to_ascii_lowercase();
        if lowered.contains("fail") || lowered.contains("error") {
            RequestState::Failed
        } else {
            RequestState::Polling
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Submitted => "submitted",
            RequestState::Polling => "polling",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UsageItems {
    #[serde(default)]
    pub items: Vec<JsonValue>,
}

/// Answer of `GET /usage`
#[derive(Clone, Debug, Deserialize)]
pub struct UsageReport {
    /// Total number of items, as the service reports it.
    pub message: JsonValue,
    pub data: UsageItems,
}

impl UsageReport {
    pub fn items(&self) -> &[JsonValue] {
        &self.data.items
    }

    /// Writes the total followed by a 1-indexed line per usage record.
    pub fn render(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "Total number of items: {}", display_json(&self.message))?;
        for (index, item) in self.items().iter().enumerate() {
            writeln!(out, "{}: {}", index + 1, display_json(item))?;
        }
        Ok(())
    }
}

/// Strings print bare, everything else as compact JSON.
pub fn display_json(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Raw `{ "data": ... }` envelope every API answer is wrapped in.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub data: Option<JsonValue>,
    #[serde(default)]
    pub message: Option<JsonValue>,
}

impl Envelope {
    pub(crate) fn message_text(&self) -> Option<String> {
        self.message.as_ref().map(display_json)
    }
}

/// Flattens an arbitrary JSON object into form fields, for presigned
/// targets that hand back non-string values.
fn stringify_fields(fields: JsonMap<String, JsonValue>) -> BTreeMap<String, String> {
    fields
        .into_iter()
        .map(|(key, value)| (key, display_json(&value)))
        .collect()
}

fn de_fields<'de, D>(de: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = Option::<JsonMap<String, JsonValue>>::deserialize(de)?;
    Ok(repr.map(stringify_fields).unwrap_or_default())
}
