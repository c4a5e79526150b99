//! Stand-ins for yt-dlp and ffmpeg used by the tests.

use crate::media::{ExtractError, Extractor, MediaDescriptor};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

#[derive(Clone)]
pub enum FakeOutcome {
    Descriptor(MediaDescriptor),
    Blocked(&'static str),
    Failed(&'static str),
}

/// Extractor that answers every lookup with the same outcome and counts calls.
#[derive(Clone)]
pub struct FakeExtractor {
    outcome: FakeOutcome,
    calls: Arc<AtomicUsize>,
}

impl FakeExtractor {
    pub fn new(outcome: FakeOutcome) -> Self {
        Self {
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn returning(descriptor: MediaDescriptor) -> Self {
        Self::new(FakeOutcome::Descriptor(descriptor))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self) -> Result<MediaDescriptor, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            FakeOutcome::Descriptor(descriptor) => Ok(descriptor.clone()),
            FakeOutcome::Blocked(message) => Err(ExtractError::Blocked(message.to_string())),
            FakeOutcome::Failed(message) => Err(ExtractError::Failed(message.to_string())),
        }
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn basic_info(&self, _url: &str) -> Result<MediaDescriptor, ExtractError> {
        self.answer()
    }

    async fn full_info(&self, _url: &str, _format: &str) -> Result<MediaDescriptor, ExtractError> {
        self.answer()
    }

    async fn test_availability(&self) -> bool {
        true
    }
}

/// Write an executable shell script named `name` into `dir`.
#[cfg(unix)]
pub fn fake_program(dir: &std::path::Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_str().unwrap().to_string()
}

#[cfg(unix)]
pub fn fake_ffmpeg(dir: &std::path::Path, body: &str) -> String {
    fake_program(dir, "ffmpeg", body)
}
