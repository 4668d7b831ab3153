use crate::api::models::{EncodeRequest, RequestType, UsageReport, display_json};
use crate::api::{StegClient, UsageQuery};
use crate::config::{Config, DecodeUpload};
use crate::job::upload::reupload_to_target;
use crate::job::{
    AsyncJob, DecodeJob, DecodeOutcome, EncodeJob, EncodeOutcome, PollPolicy, UploadedMedia,
    upload_media,
};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs the upload → encode → decode → usage tour against the service,
/// reporting each step to `out`.
pub struct Walkthrough<'a, W: Write> {
    client: StegClient,
    config: &'a Config,
    policy: PollPolicy,
    cancel: CancellationToken,
    out: W,
}

impl<'a, W: Write> Walkthrough<'a, W> {
    pub fn new(config: &'a Config, cancel: CancellationToken, out: W) -> Result<Self> {
        let client = StegClient::new(&config.base_url, &config.api_key, config.request_timeout())
            .context("Failed to build API client")?;
        info!(base_url = %client.base_url(), poll_mode = ?config.poll_mode, "Client ready");

        Ok(Self {
            client,
            config,
            policy: config.poll_policy(),
            cancel,
            out,
        })
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// All four steps in order.
    pub async fn run(&mut self) -> Result<()> {
        writeln!(
            self.out,
            "This walkthrough runs you through Steg.AI's API for uploading an image, encoding / decoding it, and checking the status and usage endpoints."
        )?;

        let image = self.config.image_path()?.to_path_buf();
        let uploaded = self.upload(&image).await?;
        let encoded = self.encode(&uploaded).await?;
        self.decode(&uploaded, &encoded.output_path).await?;
        self.usage().await?;
        Ok(())
    }

    pub async fn upload(&mut self, image: &Path) -> Result<UploadedMedia> {
        writeln!(self.out)?;
        writeln!(self.out, "1. Now running the Upload endpoint.")?;
        writeln!(self.out, "Uploading file. Please wait.")?;

        let uploaded = upload_media(&self.client, self.config, image, RequestType::Encode)
            .await
            .with_context(|| format!("Failed to upload {}", image.display()))?;

        writeln!(
            self.out,
            "The image has successfully been uploaded (media id {}).",
            uploaded.media_id
        )?;
        Ok(uploaded)
    }

    pub async fn encode(&mut self, uploaded: &UploadedMedia) -> Result<EncodeOutcome> {
        writeln!(self.out)?;
        writeln!(self.out, "2. Now running the Encode endpoint.")?;
        writeln!(self.out, "Encoding file and checking media status. Please wait.")?;

        let job = EncodeJob {
            request: EncodeRequest {
                media_id: uploaded.media_id.clone(),
                owner: self.config.owner.clone(),
                license: self.config.license(),
                method: self.config.method,
                custom: self.config.custom_data(),
            },
            output_path: self.config.output_dir.join(uploaded.encoded_file_name()),
        };
        let outcome = job
            .run(&self.client, &self.policy, &self.cancel)
            .await
            .inspect_err(|error| {
                if error.is_remote_failure() {
                    error!(
                        media_id = %uploaded.media_id,
                        %error,
                        "Service could not encode the image"
                    );
                }
            })
            .context("Encoding failed")?;

        writeln!(
            self.out,
            "The media status is successful, and the file has been encoded and saved to {}.",
            outcome.output_path.display()
        )?;
        Ok(outcome)
    }

    pub async fn decode(
        &mut self,
        original: &UploadedMedia,
        encoded: &Path,
    ) -> Result<DecodeOutcome> {
        writeln!(self.out)?;
        writeln!(self.out, "3. Now running the Decode endpoint.")?;

        let uploaded = match self.config.decode_upload {
            DecodeUpload::Fresh => {
                upload_media(&self.client, self.config, encoded, RequestType::Decode).await
            }
            DecodeUpload::ReuseTarget => reupload_to_target(&self.client, original, encoded).await,
        }
        .with_context(|| format!("Failed to upload {}", encoded.display()))?;

        writeln!(self.out, "Decoding file. Please wait.")?;
        let outcome = DecodeJob::new(uploaded.media_id)
            .run(&self.client, &self.policy, &self.cancel)
            .await
            .context("Decoding failed")?;

        writeln!(
            self.out,
            "Decoded results: {}",
            display_json(&outcome.media_data)
        )?;
        Ok(outcome)
    }

    pub async fn usage(&mut self) -> Result<UsageReport> {
        writeln!(self.out)?;
        writeln!(self.out, "4. Now running the Usage endpoint.")?;

        let query = UsageQuery {
            start: self.config.start.clone(),
            end: self.config.end.clone(),
        };
        crate::usage::warn_on_questionable_dates(
            query.start.as_deref(),
            query.end.as_deref(),
            chrono::Local::now().date_naive(),
        );

        writeln!(self.out, "Checking usage endpoint. Please wait.")?;
        let report = self
            .client
            .usage(&query)
            .await
            .context("Usage query failed")?;
        report.render(&mut self.out)?;
        Ok(report)
    }
}
