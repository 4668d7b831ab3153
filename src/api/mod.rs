pub mod client;
pub mod models;

// Re-export public types and functions
pub use client::{API_KEY_HEADER, DEFAULT_BASE_URL, FILE_FIELD, StegClient, UsageQuery};
pub use models::{COMPLETED_STATUS, RequestState, StatusResult, UploadTarget, UsageReport};
