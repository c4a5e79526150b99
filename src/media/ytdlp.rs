use super::{
    extractor::{ExtractError, Extractor},
    types::MediaDescriptor,
};
use crate::config::ExtractorConfig;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct YtDlpExtractor {
    config: ExtractorConfig,
}

impl YtDlpExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, url: &str, format: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
            "--no-progress".to_string(),
            "--user-agent".to_string(),
            self.config.user_agent.clone(),
        ];

        if let Some(cookies) = &self.config.cookies {
            args.push("--cookies".to_string());
            args.push(cookies.clone());
        }

        match format {
            Some(format) => {
                args.push("--format".to_string());
                args.push(format.to_string());
            }
            None => args.push("--flat-playlist".to_string()),
        }

        // Keep a URL that starts with '-' from being read as an option.
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    async fn dump_json(
        &self,
        url: &str,
        format: Option<&str>,
    ) -> Result<MediaDescriptor, ExtractError> {
        debug!("Extracting metadata with yt-dlp for: {}", url);

        let output = tokio::time::timeout(
            self.config.timeout(),
            Command::new(&self.config.program)
                .args(self.build_args(url, format))
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExtractError::Timeout(self.config.timeout_secs))??;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp failed with status {}: {}", output.status, error.trim());
            return Err(ExtractError::from_stderr(&error));
        }

        let descriptor: MediaDescriptor = serde_json::from_slice(&output.stdout)?;
        debug!(
            "yt-dlp resolved {:?} (collection: {})",
            descriptor.title,
            descriptor.is_collection()
        );
        Ok(descriptor)
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn basic_info(&self, url: &str) -> Result<MediaDescriptor, ExtractError> {
        self.dump_json(url, None).await
    }

    async fn full_info(&self, url: &str, format: &str) -> Result<MediaDescriptor, ExtractError> {
        self.dump_json(url, Some(format)).await
    }

    async fn test_availability(&self) -> bool {
        match Command::new(&self.config.program).arg("--version").output().await {
            Ok(output) => {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!("✅ yt-dlp is available, version: {}", version.trim());
                    true
                } else {
                    warn!("❌ yt-dlp command failed");
                    false
                }
            }
            Err(e) => {
                warn!("❌ yt-dlp not found: {}", e);
                false
            }
        }
    }
}
