use super::types::MediaDescriptor;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The site refused us (rate limiting, bot detection, geo/age gates).
    #[error("access blocked by upstream: {0}")]
    Blocked(String),

    #[error("extraction failed: {0}")]
    Failed(String),

    #[error("extraction timed out after {0}s")]
    Timeout(u64),

    #[error("failed to run extractor: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to parse extractor output: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ExtractError {
    /// Sort extractor stderr into a blocked or a generic failure.
    pub fn from_stderr(stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let lower = message.to_lowercase();

        let blocked = lower.contains("http error 403")
            || lower.contains("http error 429")
            || lower.contains("blocked")
            || lower.contains("not a bot")
            || lower.contains("too many requests")
            || lower.contains("rate-limit")
            || lower.contains("rate limit");

        if blocked {
            Self::Blocked(message)
        } else {
            Self::Failed(message)
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Human-readable name of the extractor
    fn name(&self) -> &'static str;

    /// Quick lookup; playlists are listed without resolving each entry
    async fn basic_info(&self, url: &str) -> Result<MediaDescriptor, ExtractError>;

    /// Full resolution of stream URLs for the given format selector
    async fn full_info(&self, url: &str, format: &str) -> Result<MediaDescriptor, ExtractError>;

    /// Test if the extractor is available on the system
    async fn test_availability(&self) -> bool;
}
