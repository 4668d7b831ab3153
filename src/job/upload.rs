use crate::api::StegClient;
use crate::api::models::{RequestType, UploadRequest, UploadTarget};
use crate::config::Config;
use crate::error::{Result, StegError};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A file the service knows about, plus where it was pushed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedMedia {
    pub media_id: String,
    pub target: UploadTarget,
    pub path: PathBuf,
}

impl UploadedMedia {
    /// Name the encoded copy of this file is saved under.
    pub fn encoded_file_name(&self) -> String {
        encoded_file_name(&self.path)
    }
}

/// `<stem>_encoded.png`, whatever the source extension.
pub fn encoded_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());
    format!("{stem}_encoded.png")
}

/// Content type sent to `/upload`. Guessed from the extension, falling back
/// to `image/<ext>`.
pub fn content_type_for(path: &Path) -> String {
    if let Some(mime) = mime_guess::from_path(path).first() {
        return mime.essence_str().to_string();
    }

    match path.extension() {
        Some(ext) => format!("image/{}", ext.to_string_lossy().to_ascii_lowercase()),
        None => "application/octet-stream".to_string(),
    }
}

/// Asks for a presigned target, then pushes `path` to it.
///
/// The push is only attempted once the service handed back both a target and
/// a media id.
pub async fn upload_media(
    client: &StegClient,
    config: &Config,
    path: &Path,
    request_type: RequestType,
) -> Result<UploadedMedia> {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| StegError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        })?;
    let content_type = content_type_for(path);
    if !content_type.starts_with("image/") {
        warn!(
            path = %path.display(),
            %content_type,
            "Uploading a file that does not look like an image"
        );
    }

    let request = UploadRequest {
        name,
        content_type: content_type.clone(),
        request_type: Some(request_type),
        owner: config.owner.clone(),
        license: config.license(),
        custom: config.custom_data(),
    };
    let grant = client.init_upload(&request).await?;
    info!(media_id = %grant.media_id, ?request_type, "Upload target granted");

    client.push_to_target(&grant.post_to, path, &content_type).await?;

    Ok(UploadedMedia {
        media_id: grant.media_id,
        target: grant.post_to,
        path: path.to_path_buf(),
    })
}

/// Pushes `path` to a target handed out earlier and keeps that upload's media
/// id. Presigned targets are usually short-lived, so this can be refused.
pub async fn reupload_to_target(
    client: &StegClient,
    previous: &UploadedMedia,
    path: &Path,
) -> Result<UploadedMedia> {
    let content_type = content_type_for(path);
    info!(
        media_id = %previous.media_id,
        path = %path.display(),
        "Reusing earlier upload target"
    );
    client.push_to_target(&previous.target, path, &content_type).await?;

    Ok(UploadedMedia {
        media_id: previous.media_id.clone(),
        target: previous.target.clone(),
        path: path.to_path_buf(),
    })
}
