mod extractor;
mod transcode;
mod types;
mod ytdlp;

pub use extractor::{ExtractError, Extractor};
pub use transcode::{OutputKind, PlanError, TranscodeError, TranscodePlan, Transcoder};
pub use types::MediaDescriptor;
#[cfg(test)]
pub use types::{Codec, StreamFormat};
pub use ytdlp::YtDlpExtractor;

use anyhow::Result;
use tracing::{info, warn};

/// Probe the external tools at startup. Missing tools are logged, not fatal,
/// so the service can come up before they are installed.
pub async fn test_setup(extractor: &dyn Extractor, transcoder: &Transcoder) -> Result<()> {
    info!("Testing media tool setup...");

    let extractor_available = extractor.test_availability().await;
    let transcoder_available = transcoder.test_availability().await;

    if !transcoder_available {
        warn!("⚠️  downloads will fail until ffmpeg is installed");
    }

    if extractor_available {
        info!("✅ {} is available", extractor.name());
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} is not available. Please install it or set extractor.program.",
            extractor.name()
        ))
    }
}
