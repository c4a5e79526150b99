use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_FORMAT: &str = "bestvideo+bestaudio/best";
pub const DEFAULT_AUDIO_FORMAT: &str = "bestaudio/best";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub extractor: ExtractorConfig,
    pub transcoder: TranscoderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Base URL the download handler uses to reach `/info`. Derived from the
    /// bound address when unset.
    pub public_url: Option<String>,
    pub info_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            public_url: None,
            info_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractorConfig {
    pub program: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub cookies: Option<String>,
    pub default_format: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            cookies: None,
            default_format: DEFAULT_FORMAT.to_string(),
        }
    }
}

impl ExtractorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TranscoderConfig {
    pub program: String,
    /// Upper bound on simultaneously running transcoder processes.
    pub max_concurrent: usize,
    pub queue_timeout_secs: u64,
    /// Longest silence on the transcoder's stdout before the job is killed.
    pub idle_timeout_secs: u64,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            max_concurrent: 4,
            queue_timeout_secs: 10,
            idle_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }

    fn validate(&self) -> Result<()> {
        if self.transcoder.max_concurrent == 0 {
            anyhow::bail!("transcoder.max_concurrent must be at least 1");
        }
        let timeouts = [
            ("server.info_timeout_secs", self.server.info_timeout_secs),
            ("extractor.timeout_secs", self.extractor.timeout_secs),
            ("transcoder.idle_timeout_secs", self.transcoder.idle_timeout_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                anyhow::bail!("{} must be at least 1", name);
            }
        }
        if self.extractor.program.trim().is_empty() || self.transcoder.program.trim().is_empty() {
            anyhow::bail!("extractor.program and transcoder.program must not be empty");
        }
        if let Some(public_url) = &self.server.public_url {
            url::Url::parse(public_url)
                .with_context(|| format!("Invalid server.public_url: {}", public_url))?;
        }
        Ok(())
    }
}
