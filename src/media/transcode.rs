use super::types::{MediaDescriptor, StreamFormat};
use crate::config::TranscoderConfig;
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use std::{
    collections::{BTreeMap, VecDeque},
    io,
    process::{ExitStatus, Stdio},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout, Command},
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

const STDERR_TAIL_LINES: usize = 20;

/// What the client asked for via `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    #[default]
    Video,
    Audio,
}

impl OutputKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLayout {
    AudioOnly,
    Combined,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("This endpoint does not support playlists")]
    Playlist,
    #[error("Only video, no audio: video without audio not supported")]
    VideoWithoutAudio,
    #[error("Media has neither audio nor video streams")]
    NoStreams,
    #[error("No valid input URL found in info response")]
    NoInputUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeInput {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

impl TranscodeInput {
    fn from_format(format: &StreamFormat) -> Option<Self> {
        let url = format.url.as_deref().filter(|u| !u.is_empty())?;
        Some(Self {
            url: url.to_string(),
            headers: format.http_headers.clone(),
        })
    }
}

/// Everything needed to run one transcode, decided before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodePlan {
    pub layout: StreamLayout,
    pub inputs: Vec<TranscodeInput>,
    pub title: Option<String>,
}

impl TranscodePlan {
    pub fn from_descriptor(
        descriptor: &MediaDescriptor,
        kind: OutputKind,
    ) -> Result<Self, PlanError> {
        let layout = classify(descriptor, kind)?;

        let primary = descriptor
            .primary_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .map(|url| TranscodeInput {
                url: url.to_string(),
                headers: descriptor.http_headers.clone(),
            })
            .or_else(|| {
                let formats = &descriptor.alternate_formats;
                let chosen = match kind {
                    OutputKind::Audio => formats
                        .iter()
                        .find(|f| f.audio_codec.is_present())
                        .or_else(|| formats.first()),
                    OutputKind::Video => formats.first(),
                };
                chosen.and_then(TranscodeInput::from_format)
            })
            .ok_or(PlanError::NoInputUrl)?;

        let mut inputs = vec![primary];
        if layout == StreamLayout::Combined {
            if let Some(second) = descriptor
                .alternate_formats
                .get(1)
                .and_then(TranscodeInput::from_format)
            {
                inputs.push(second);
            }
        }

        Ok(Self {
            layout,
            inputs,
            title: descriptor.title.clone(),
        })
    }

    pub fn content_type(&self) -> &'static str {
        match self.layout {
            StreamLayout::AudioOnly => "audio/mpeg3",
            StreamLayout::Combined => "video/mp4",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self.layout {
            StreamLayout::AudioOnly => "mp3",
            StreamLayout::Combined => "mp4",
        }
    }

    pub fn filename(&self) -> String {
        let stem = self
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("download");
        format!("{}.{}", stem, self.extension())
    }

    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        for input in &self.inputs {
            // CR or LF inside a header would let it smuggle extra header lines.
            let headers: String = input
                .headers
                .iter()
                .filter(|(name, value)| !has_line_break(name) && !has_line_break(value))
                .map(|(name, value)| format!("{}: {}\r\n", name, value))
                .collect();
            if !headers.is_empty() {
                args.push("-headers".to_string());
                args.push(headers);
            }
            args.push("-i".to_string());
            args.push(input.url.clone());
        }

        let output: &[&str] = match self.layout {
            StreamLayout::AudioOnly => &["-vn", "-acodec", "libmp3lame", "-f", "mp3"],
            StreamLayout::Combined => &[
                "-c:v",
                "libx264",
                "-acodec",
                "aac",
                "-movflags",
                "frag_keyframe+empty_moov",
                "-f",
                "mp4",
            ],
        };
        args.extend(output.iter().map(|s| s.to_string()));
        args.push("-".to_string());
        args
    }
}

fn has_line_break(s: &str) -> bool {
    s.contains(['\r', '\n'])
}

pub fn classify(descriptor: &MediaDescriptor, kind: OutputKind) -> Result<StreamLayout, PlanError> {
    if descriptor.is_collection() {
        return Err(PlanError::Playlist);
    }

    let has_video = descriptor.video_codec.is_present();
    let has_audio = descriptor.audio_codec.is_present();

    match (has_video, has_audio) {
        (false, false) => Err(PlanError::NoStreams),
        (true, false) => Err(PlanError::VideoWithoutAudio),
        (false, true) => Ok(StreamLayout::AudioOnly),
        (true, true) if kind == OutputKind::Audio => Ok(StreamLayout::AudioOnly),
        (true, true) => Ok(StreamLayout::Combined),
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("too many concurrent downloads, try again later")]
    Busy,

    #[error("failed to spawn transcoder: {0}")]
    Spawn(io::Error),

    #[error("transcoder exited with {status}: {stderr}")]
    Exited { status: ExitStatus, stderr: String },

    #[error("transcoder produced no output for {0}s")]
    Stalled(u64),

    #[error("transcoder I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Spawns transcoder processes, at most `max_concurrent` at a time.
#[derive(Clone)]
pub struct Transcoder {
    program: String,
    permits: Arc<Semaphore>,
    queue_timeout: Duration,
    idle_timeout: Duration,
}

impl Transcoder {
    pub fn new(config: &TranscoderConfig) -> Self {
        Self {
            program: config.program.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            queue_timeout: Duration::from_secs(config.queue_timeout_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }

    pub async fn spawn(&self, plan: &TranscodePlan) -> Result<TranscodeJob, TranscodeError> {
        let permit = tokio::time::timeout(self.queue_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| TranscodeError::Busy)?
            .map_err(|_| TranscodeError::Busy)?;

        let args = plan.args();
        debug!("Spawning {} with {} inputs", self.program, plan.inputs.len());

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TranscodeError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| {
                TranscodeError::Spawn(io::Error::other("transcoder stdout not captured"))
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| {
                TranscodeError::Spawn(io::Error::other("transcoder stderr not captured"))
            })?;

        info!(
            "Transcoder started (pid {:?}) for {}",
            child.id(),
            plan.filename()
        );

        Ok(TranscodeJob {
            child,
            stdout: ReaderStream::new(stdout),
            stderr: Some(tokio::spawn(collect_stderr_tail(stderr))),
            idle_timeout: self.idle_timeout,
            bytes_sent: 0,
            finished: false,
            _permit: permit,
        })
    }

    pub async fn test_availability(&self) -> bool {
        match Command::new(&self.program).arg("-version").output().await {
            Ok(output) => {
                if output.status.success() {
                    let version_line = String::from_utf8_lossy(&output.stdout)
                        .lines()
                        .next()
                        .unwrap_or("unknown")
                        .to_string();
                    info!("✅ ffmpeg is available: {}", version_line);
                    true
                } else {
                    warn!("❌ ffmpeg command failed");
                    false
                }
            }
            Err(e) => {
                warn!("❌ ffmpeg not found: {} (required for downloads)", e);
                false
            }
        }
    }
}

async fn collect_stderr_tail(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        debug!("ffmpeg: {}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

/// A running transcoder process and its output.
///
/// Owns the child for its whole life: dropping the job before the output is
/// exhausted kills the process and frees its concurrency slot.
pub struct TranscodeJob {
    child: Child,
    stdout: ReaderStream<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    idle_timeout: Duration,
    bytes_sent: u64,
    finished: bool,
    _permit: OwnedSemaphorePermit,
}

impl TranscodeJob {
    /// Next chunk of output, `Ok(None)` once the process exited cleanly.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, TranscodeError> {
        if self.finished {
            return Ok(None);
        }

        match tokio::time::timeout(self.idle_timeout, self.stdout.next()).await {
            Err(_) => {
                self.abort();
                Err(TranscodeError::Stalled(self.idle_timeout.as_secs()))
            }
            Ok(Some(Ok(chunk))) => {
                self.bytes_sent += chunk.len() as u64;
                Ok(Some(chunk))
            }
            Ok(Some(Err(e))) => {
                self.abort();
                Err(TranscodeError::Io(e))
            }
            Ok(None) => {
                self.finished = true;
                let exit = tokio::time::timeout(self.idle_timeout, self.child.wait()).await;
                let status = match exit {
                    Ok(status) => status?,
                    Err(_) => {
                        let _ = self.child.start_kill();
                        return Err(TranscodeError::Stalled(self.idle_timeout.as_secs()));
                    }
                };

                if status.success() {
                    info!("Transcoder finished, {} bytes sent", self.bytes_sent);
                    Ok(None)
                } else {
                    let stderr = match self.stderr.take() {
                        Some(handle) => handle.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    Err(TranscodeError::Exited { status, stderr })
                }
            }
        }
    }

    fn abort(&mut self) {
        self.finished = true;
        if let Err(e) = self.child.start_kill() {
            debug!("Failed to kill transcoder: {}", e);
        }
    }

    /// Turn the job into a response body stream, starting with `first`.
    ///
    /// A failure after output has started surfaces as a stream error, which
    /// makes the server drop the connection.
    pub fn into_stream(self, first: Option<Bytes>) -> impl Stream<Item = io::Result<Bytes>> + Send {
        let head = futures::stream::iter(first.map(Ok));
        let rest = futures::stream::unfold(self, |mut job| async move {
            match job.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), job)),
                Ok(None) => None,
                Err(e) => {
                    error!(
                        "Transcoder failed after {} bytes were sent: {}",
                        job.bytes_sent, e
                    );
                    Some((Err(io::Error::other(e)), job))
                }
            }
        });
        head.chain(rest)
    }
}

impl Drop for TranscodeJob {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "Client went away after {} bytes, killing transcoder",
                self.bytes_sent
            );
            let _ = self.child.start_kill();
        }
        if let Some(handle) = self.stderr.take() {
            handle.abort();
        }
    }
}
