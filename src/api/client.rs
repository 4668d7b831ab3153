use crate::api::models::{
    AsyncSubmission, DecodeRequest, EncodeRequest, Envelope, StatusResult, UploadGrant,
    UploadRequest, UploadTarget, UsageReport,
};
use crate::error::{Endpoint, Result, StegError};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt as _;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.steg.ai/";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Multipart field the presigned target expects the file under.
pub const FILE_FIELD: &str = "file";

const UPLOAD: Endpoint = "upload";
const PUSH: Endpoint = "presigned upload";
const ENCODE: Endpoint = "encode_image_async";
const DECODE: Endpoint = "decode_image_async";
const MEDIA_STATUS: Endpoint = "media_status";
const USAGE: Endpoint = "usage";
const DOWNLOAD: Endpoint = "media download";

/// Date range of a usage query. Values are sent exactly as given.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsageQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl UsageQuery {
    fn params(&self) -> Vec<(&'static str, &str)> {
        let mut params = Vec::new();
        if let Some(start) = &self.start {
            params.push(("start", start.as_str()));
        }
        if let Some(end) = &self.end {
            params.push(("end", end.as_str()));
        }
        params
    }
}

/// Thin client over the Steg.AI REST endpoints.
///
/// Two inner clients are kept: `api` carries the `x-api-key` header on every
/// request, `storage` talks to presigned targets and media URLs and never
/// sees the key.
#[derive(Clone, Debug)]
pub struct StegClient {
    api: Client,
    storage: Client,
    base_url: Url,
}

impl StegClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let base_url = parse_base_url(base_url)?;

        let mut key = HeaderValue::from_str(api_key).map_err(|_| StegError::InvalidApiKey)?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);

        let api = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(StegError::ClientBuild)?;
        let storage = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(StegError::ClientBuild)?;

        Ok(Self {
            api,
            storage,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|error| StegError::InvalidUrl {
                url: format!("{}{path}", self.base_url),
                reason: error.to_string(),
            })
    }

    /// `POST /upload`: asks for a presigned target and a media id.
    pub async fn init_upload(&self, request: &UploadRequest) -> Result<UploadGrant> {
        debug!(
            name = %request.name,
            content_type = %request.content_type,
            "Requesting upload target"
        );
        let url = self.endpoint("upload")?;
        self.send_json(UPLOAD, self.api.post(url).json(request)).await
    }

    /// Multipart POST of `path` to a presigned target. The form carries every
    /// field of the target followed by the file itself.
    pub async fn push_to_target(
        &self,
        target: &UploadTarget,
        path: &Path,
        content_type: &str,
    ) -> Result<()> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(StegError::io(path))?;
        let len = file
            .metadata()
            .await
            .map_err(StegError::io(path))?
            .len();

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| FILE_FIELD.to_string());
        let part = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(file)), len)
            .file_name(file_name)
            .mime_str(content_type)
            .map_err(StegError::http(PUSH))?;

        let form = target
            .fields
            .iter()
            .fold(Form::new(), |form, (name, value)| {
                form.text(name.clone(), value.clone())
            })
            .part(FILE_FIELD, part);

        info!(url = %target.url, bytes = len, "Pushing file to presigned target");
        let response = self
            .storage
            .post(&target.url)
            .multipart(form)
            .send()
            .await
            .map_err(StegError::http(PUSH))?;
        ensure_success(PUSH, response).await?;
        Ok(())
    }

    /// `POST /encode_image_async`
    pub async fn submit_encode(&self, request: &EncodeRequest) -> Result<AsyncSubmission> {
        let url = self.endpoint("encode_image_async")?;
        self.send_json(ENCODE, self.api.post(url).json(request)).await
    }

    /// `POST /decode_image_async`
    pub async fn submit_decode(&self, request: &DecodeRequest) -> Result<AsyncSubmission> {
        let url = self.endpoint("decode_image_async")?;
        self.send_json(DECODE, self.api.post(url).json(request)).await
    }

    /// `GET /media_status?request_id=ID`
    pub async fn media_status(&self, request_id: &str) -> Result<StatusResult> {
        let url = self.endpoint("media_status")?;
        self.send_json(
            MEDIA_STATUS,
            self.api.get(url).query(&[("request_id", request_id)]),
        )
        .await
    }

    /// `GET /usage`. Unlike the other endpoints the count lives at the top
    /// level of the answer, so the whole body is decoded.
    pub async fn usage(&self, query: &UsageQuery) -> Result<UsageReport> {
        let url = self.endpoint("usage")?;
        let response = self
            .api
            .get(url)
            .query(&query.params())
            .send()
            .await
            .map_err(StegError::http(USAGE))?;
        let body = ensure_success(USAGE, response).await?;
        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|source| StegError::Malformed {
                endpoint: USAGE,
                source,
            })?;
        if value.get("data").is_none_or(serde_json::Value::is_null) {
            return Err(StegError::MissingField {
                endpoint: USAGE,
                field: "data",
            });
        }
        serde_json::from_value(value).map_err(|source| StegError::Malformed {
            endpoint: USAGE,
            source,
        })
    }

    /// Streams the body of `url` into `dest`. An existing file is only
    /// replaced once the whole body arrived. Returns the number of bytes
    /// written.
    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self
            .storage
            .get(url)
            .send()
            .await
            .map_err(StegError::http(DOWNLOAD))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StegError::Status {
                endpoint: DOWNLOAD,
                status,
                message: format!("cannot fetch {url}"),
            });
        }

        let partial = partial_path(dest);
        let written = match stream_to_file(response, &partial).await {
            Ok(written) => written,
            Err(error) => {
                // leaves whatever was at `dest` untouched
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(error);
            }
        };
        tokio::fs::rename(&partial, dest)
            .await
            .map_err(StegError::io(dest))?;

        debug!(dest = %dest.display(), written, "Media downloaded");
        Ok(written)
    }

    async fn send_json<T>(&self, endpoint: Endpoint, request: RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = request.send().await.map_err(StegError::http(endpoint))?;
        let body = ensure_success(endpoint, response).await?;
        decode_envelope(endpoint, &body)
    }
}

/// `.<name>.part` next to `dest`, renamed over it once complete.
fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.part"))
}

async fn stream_to_file(response: Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(StegError::io(path))?;
    let mut written = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk: Bytes = chunk.map_err(StegError::http(DOWNLOAD))?;
        file.write_all(&chunk).await.map_err(StegError::io(path))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(StegError::io(path))?;
    Ok(written)
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url).map_err(|error| StegError::InvalidUrl {
        url: base_url.to_string(),
        reason: error.to_string(),
    })?;
    // `join` would otherwise drop the last path segment
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Reads the body, turning a non-2xx answer into [`StegError::Status`]
/// carrying the server's `message` when it sent one.
async fn ensure_success(endpoint: Endpoint, response: Response) -> Result<Bytes> {
    let status = response.status();
    let body = response.bytes().await.map_err(StegError::http(endpoint))?;
    if status.is_success() {
        return Ok(body);
    }

    let message = serde_json::from_slice::<Envelope>(&body)
        .ok()
        .and_then(|envelope| envelope.message_text())
        .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
    Err(StegError::Status {
        endpoint,
        status,
        message,
    })
}

/// Unwraps `{ "data": ... }`, failing on a missing or null `data`.
fn decode_envelope<T: DeserializeOwned>(endpoint: Endpoint, body: &[u8]) -> Result<T> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|source| StegError::Malformed { endpoint, source })?;
    let data = envelope
        .data
        .filter(|data| !data.is_null())
        .ok_or(StegError::MissingField {
            endpoint,
            field: "data",
        })?;
    serde_json::from_value(data).map_err(|source| StegError::Malformed { endpoint, source })
}
