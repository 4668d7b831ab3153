use crate::api::DEFAULT_BASE_URL;
use crate::api::models::License;
use crate::job::poll::PollPolicy;
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How the status endpoint is polled while an async request runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PollMode {
    /// Exponential backoff bounded by an attempt ceiling and a deadline
    #[default]
    Backoff,
    /// Back-to-back status checks with no delay, ceiling or deadline
    Busy,
}

/// Where the encoded file goes before it is decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeUpload {
    /// Ask `/upload` for a new presigned target and media id
    #[default]
    Fresh,
    /// Push to the target handed out for the original image and keep its media id
    ReuseTarget,
}

/// Walkthrough configuration, loaded from CLI, environment or a TOML file.
/// Built once at startup and only ever borrowed afterwards.
///
/// Example configuration file content
/// # Steg.AI walkthrough
/// api_key = "..."
/// image = "/home/me/cat.png"
/// start = "2024-01"            # YYYY-MM-DD, YYYY-MM or YYYY
/// owner = "Owner Name"
/// editorial = true
/// poll_mode = "backoff"        # or "busy"
/// poll_max_attempts = 120
/// decode_upload = "fresh"      # or "reuse-target"
///
/// [custom]
/// project = "demo"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Steg.AI API key
    #[arg(short = 'k', long, env = "STEG_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Image to upload, encode and decode
    #[arg(short, long)]
    pub image: Option<PathBuf>,

    /// Start of the usage log: YYYY-MM-DD, YYYY-MM or YYYY
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    /// End of the usage log, same formats as --start
    #[arg(short, long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,

    /// API base URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Directory the encoded image is written to
    #[arg(short, long, default_value = ".")]
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Owner recorded with the upload and the encode request
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Mark the media as editorial in its license
    #[arg(long)]
    pub editorial: bool,

    /// Custom key=value data attached to the upload and the encode request
    #[arg(long = "custom", value_parser = parse_key_value)]
    #[serde(serialize_with = "ser_custom", deserialize_with = "de_custom")]
    pub custom: Vec<(String, String)>,

    /// Encoding method selector
    #[arg(short, long, default_value_t = 0)]
    pub method: u8,

    /// Status polling strategy
    #[arg(long, value_enum, default_value_t = PollMode::Backoff)]
    pub poll_mode: PollMode,

    /// First delay between status checks, in milliseconds
    #[arg(long, default_value_t = 500)]
    #[serde(default = "default_poll_initial_delay_ms")]
    pub poll_initial_delay_ms: u64,

    /// Upper bound of the delay between status checks, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    #[serde(default = "default_poll_max_delay_ms")]
    pub poll_max_delay_ms: u64,

    /// Give up after this many status checks (0 = no ceiling)
    #[arg(long, default_value_t = 120)]
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    /// Give up after this many seconds of polling (0 = no deadline)
    #[arg(long, default_value_t = 600)]
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// How the encoded image is uploaded before decoding
    #[arg(long, value_enum, default_value_t = DecodeUpload::Fresh)]
    pub decode_upload: DecodeUpload,

    /// Timeout of each HTTP request, in seconds
    #[arg(long, default_value_t = 30)]
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            image: None,
            start: None,
            end: None,
            base_url: default_base_url(),
            output_dir: default_output_dir(),
            owner: None,
            editorial: false,
            custom: Vec::new(),
            method: 0,
            poll_mode: PollMode::default(),
            poll_initial_delay_ms: default_poll_initial_delay_ms(),
            poll_max_delay_ms: default_poll_max_delay_ms(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_timeout_secs: default_poll_timeout_secs(),
            decode_upload: DecodeUpload::default(),
            request_timeout_secs: default_request_timeout_secs(),
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))
                .with_context(|| format!("Failed to read config file {config_path}"))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    pub fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.api_key.is_empty() {
            self.api_key = file_config.api_key;
        }
        if self.base_url == default_base_url() {
            self.base_url = file_config.base_url;
        }
        if self.output_dir == default_output_dir() {
            self.output_dir = file_config.output_dir;
        }
        if !self.editorial {
            self.editorial = file_config.editorial;
        }
        if self.custom.is_empty() {
            self.custom = file_config.custom;
        }
        if self.method == 0 {
            self.method = file_config.method;
        }
        if self.poll_mode == PollMode::default() {
            self.poll_mode = file_config.poll_mode;
        }
        if self.poll_initial_delay_ms == default_poll_initial_delay_ms() {
            self.poll_initial_delay_ms = file_config.poll_initial_delay_ms;
        }
        if self.poll_max_delay_ms == default_poll_max_delay_ms() {
            self.poll_max_delay_ms = file_config.poll_max_delay_ms;
        }
        if self.poll_max_attempts == default_poll_max_attempts() {
            self.poll_max_attempts = file_config.poll_max_attempts;
        }
        if self.poll_timeout_secs == default_poll_timeout_secs() {
            self.poll_timeout_secs = file_config.poll_timeout_secs;
        }
        if self.decode_upload == DecodeUpload::default() {
            self.decode_upload = file_config.decode_upload;
        }
        if self.request_timeout_secs == default_request_timeout_secs() {
            self.request_timeout_secs = file_config.request_timeout_secs;
        }

        // For Option fields, CLI takes precedence if Some
        if self.image.is_none() {
            self.image = file_config.image;
        }
        if self.start.is_none() {
            self.start = file_config.start;
        }
        if self.end.is_none() {
            self.end = file_config.end;
        }
        if self.owner.is_none() {
            self.owner = file_config.owner;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("An API key is required (--api-key or STEG_API_KEY)");
        }

        let image = self.image_path()?;
        if !image.is_file() {
            bail!("Image {} does not exist or is not a file", image.display());
        }
        if image.file_stem().is_none() {
            bail!("Image path {} has no file name", image.display());
        }

        Url::parse(&self.base_url)
            .map_err(|error| anyhow!("Invalid base URL {}: {error}", self.base_url))?;

        if self.poll_mode == PollMode::Backoff {
            if self.poll_max_delay_ms < self.poll_initial_delay_ms {
                bail!(
                    "poll_max_delay_ms ({}) must not be lower than poll_initial_delay_ms ({})",
                    self.poll_max_delay_ms,
                    self.poll_initial_delay_ms
                );
            }
            if self.poll_max_attempts == 0 && self.poll_timeout_secs == 0 {
                bail!(
                    "Backoff polling needs an attempt ceiling or a deadline, use --poll-mode busy for unbounded polling"
                );
            }
        }

        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than 0");
        }

        Ok(())
    }

    pub fn image_path(&self) -> Result<&Path> {
        self.image
            .as_deref()
            .ok_or_else(|| anyhow!("An image path is required (--image)"))
    }

    pub fn license(&self) -> Option<License> {
        self.editorial.then(License::editorial)
    }

    /// Later entries win over earlier ones with the same key.
    pub fn custom_data(&self) -> Option<BTreeMap<String, String>> {
        (!self.custom.is_empty()).then(|| self.custom.iter().cloned().collect())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        match self.poll_mode {
            PollMode::Busy => PollPolicy::busy(),
            PollMode::Backoff => PollPolicy {
                initial_delay: Duration::from_millis(self.poll_initial_delay_ms),
                max_delay: Duration::from_millis(self.poll_max_delay_ms),
                multiplier: 2.0,
                max_attempts: (self.poll_max_attempts > 0).then_some(self.poll_max_attempts),
                deadline: (self.poll_timeout_secs > 0)
                    .then(|| Duration::from_secs(self.poll_timeout_secs)),
            },
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Invalid custom entry '{raw}', expected key=value"))?;
    if key.is_empty() {
        return Err(format!("Invalid custom entry '{raw}', key is empty"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn ser_custom<S>(custom: &[(String, String)], ser: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    ser.collect_map(custom.iter().map(|(key, value)| (key, value)))
}

fn de_custom<'de, D>(de: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = Option::<BTreeMap<String, String>>::deserialize(de)?;
    Ok(repr.map(|map| map.into_iter().collect()).unwrap_or_default())
}

// Default value functions
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_initial_delay_ms() -> u64 {
    500
}

fn default_poll_max_delay_ms() -> u64 {
    10_000
}

fn default_poll_max_attempts() -> u32 {
    120
}

fn default_poll_timeout_secs() -> u64 {
    600
}

fn default_request_timeout_secs() -> u64 {
    30
}
