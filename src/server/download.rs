use super::{AppState, ProxyError};
use crate::{
    config::DEFAULT_AUDIO_FORMAT,
    media::{MediaDescriptor, OutputKind, TranscodePlan},
    utils::content_disposition,
};
use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, error, info};

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    url: Option<String>,
    f: Option<String>,
    kind: Option<String>,
}

/// `GET /download?url=<url>[&f=<format>][&kind=video|audio]`
pub async fn download(
    State(state): State<AppState>,
    params: Result<Query<DownloadParams>, QueryRejection>,
) -> Response {
    match start_download(&state, params).await {
        Ok(response) => response,
        Err(e) => {
            error!("Download error: {} ({:?})", e, e.details());
            e.into_response()
        }
    }
}

async fn start_download(
    state: &AppState,
    params: Result<Query<DownloadParams>, QueryRejection>,
) -> Result<Response, ProxyError> {
    let Query(params) = params.map_err(|e| ProxyError::InvalidInput(e.body_text()))?;

    let url = params
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| {
            ProxyError::InvalidInput(
                "URL parameter is required and must be a string".to_string(),
            )
        })?;

    let kind = match params.kind.as_deref() {
        None => OutputKind::Video,
        Some(kind) => OutputKind::parse(kind).ok_or_else(|| {
            ProxyError::InvalidInput(format!(
                "kind must be \"video\" or \"audio\", got {:?}",
                kind
            ))
        })?,
    };

    let format: &str = match params.f.as_deref().filter(|f| !f.is_empty()) {
        Some(format) => format,
        None if kind == OutputKind::Audio => DEFAULT_AUDIO_FORMAT,
        None => state.default_format.as_str(),
    };

    info!("Starting download for URL: {} (format {}, {:?})", url, format, kind);

    let descriptor = fetch_descriptor(state, url, format).await?;
    let plan = TranscodePlan::from_descriptor(&descriptor, kind)?;
    debug!("Transcode plan for {}: {:?}", url, plan);

    let mut job = state.transcoder.spawn(&plan).await?;

    // Hold the headers back until the transcoder has produced something, so
    // an early failure can still be reported with a proper status.
    let first = job.next_chunk().await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, plan.content_type())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&plan.filename()),
        )
        .body(Body::from_stream(job.into_stream(first)))
        .map_err(|e| ProxyError::Transcode(format!("Failed to build response: {}", e)))
}

/// Ask our own `/info` endpoint for the full descriptor.
async fn fetch_descriptor(
    state: &AppState,
    url: &str,
    format: &str,
) -> Result<MediaDescriptor, ProxyError> {
    let mut endpoint = state
        .info_base
        .join("info")
        .map_err(|e| ProxyError::InvalidInput(format!("Invalid info endpoint: {}", e)))?;
    endpoint
        .query_pairs_mut()
        .append_pair("q", url)
        .append_pair("f", format)
        .append_pair("full", "true");

    let upstream = |e: reqwest::Error| ProxyError::Upstream {
        status: StatusCode::BAD_REQUEST,
        message: "Processing failed: info fetch failed".to_string(),
        details: Some(e.to_string()),
    };

    let response = state.http.get(endpoint).send().await.map_err(upstream)?;
    let status = response.status();
    let body = response.text().await.map_err(upstream)?;

    if status != StatusCode::OK {
        return Err(ProxyError::Upstream {
            status,
            message: body,
            details: None,
        });
    }

    serde_json::from_str(&body).map_err(|e| {
        ProxyError::InvalidResponse(format!("Invalid response from info endpoint: {}", e))
    })
}

#[cfg(all(test, unix))]
mod tests {
    use crate::{
        config::Config,
        media::{Codec, MediaDescriptor, StreamFormat},
        server::Server,
        test_utils::{FakeExtractor, FakeOutcome},
    };
    use std::sync::Arc;

    struct TestServer {
        base: String,
        dir: tempfile::TempDir,
    }

    async fn start(extractor: FakeExtractor, ffmpeg_script: &str) -> TestServer {
        start_with(extractor, ffmpeg_script, |_| {}).await
    }

    async fn start_with(
        extractor: FakeExtractor,
        ffmpeg_script: &str,
        tweak: impl FnOnce(&mut Config),
    ) -> TestServer {
        let dir = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.server.bind = "127.0.0.1:0".to_string();
        config.transcoder.program = crate::test_utils::fake_ffmpeg(dir.path(), ffmpeg_script);
        config.transcoder.idle_timeout_secs = 5;
        tweak(&mut config);

        let server = Server::bind(&config, Arc::new(extractor)).await.unwrap();
        let base = format!("http://{}", server.local_addr().unwrap());
        tokio::spawn(server.serve());

        TestServer { base, dir }
    }

    fn demo(vcodec: &str, acodec: &str, url: &str) -> MediaDescriptor {
        let codec = |c: &str| {
            if c == "none" {
                Codec::None
            } else {
                Codec::Named(c.to_string())
            }
        };
        MediaDescriptor {
            title: Some("Demo".to_string()),
            uploader: Some("Someone".to_string()),
            webpage_url: Some("https://video.example/watch?id=abc".to_string()),
            video_codec: codec(vcodec),
            audio_codec: codec(acodec),
            primary_url: Some(url.to_string()),
            ..Default::default()
        }
    }

    async fn get(server: &TestServer, path_and_query: &str) -> reqwest::Response {
        reqwest::get(format!("{}{}", server.base, path_and_query))
            .await
            .unwrap()
    }

    const SOURCE: &str = "https%3A%2F%2Fvideo.example%2Fwatch%3Fid%3Dabc";

    #[tokio::test]
    async fn test_health() {
        let server = start(FakeExtractor::returning(MediaDescriptor::default()), "exit 0").await;
        let response = get(&server, "/health").await;
        assert_eq!(response.status(), 200);
        let json: serde_json::Value = response.json().await.unwrap();
        assert_eq!(json["ok"], true);
    }

    #[tokio::test]
    async fn test_combined_download_streams_mp4() {
        let server = start(
            FakeExtractor::returning(demo("h264", "aac", "https://cdn/x.mp4")),
            "printf '%s\\n' \"$@\"",
        )
        .await;

        let response = get(&server, &format!("/download?url={}", SOURCE)).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "video/mp4");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"Demo.mp4\""
        );

        let body = response.text().await.unwrap();
        let args: Vec<&str> = body.lines().collect();
        assert!(args.contains(&"https://cdn/x.mp4"));
        assert!(args.contains(&"libx264"));
        assert!(args.contains(&"frag_keyframe+empty_moov"));
        assert_eq!(args.last(), Some(&"-"));
    }

    #[tokio::test]
    async fn test_audio_only_download_streams_mp3() {
        let mut descriptor = demo("none", "aac", "https://cdn/x.m4a");
        descriptor.title = None;
        let server = start(FakeExtractor::returning(descriptor), "printf '%s\\n' \"$@\"").await;

        let response = get(&server, &format!("/download?url={}", SOURCE)).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "audio/mpeg3");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"download.mp3\""
        );
        let body = response.text().await.unwrap();
        assert!(body.lines().any(|arg| arg == "libmp3lame"));
    }

    #[tokio::test]
    async fn test_split_formats_pass_two_inputs() {
        let mut descriptor = demo("avc1", "opus", "");
        descriptor.primary_url = None;
        descriptor.alternate_formats = vec![
            StreamFormat {
                url: Some("https://cdn/v.mp4".to_string()),
                ..Default::default()
            },
            StreamFormat {
                url: Some("https://cdn/a.webm".to_string()),
                ..Default::default()
            },
        ];
        let server = start(FakeExtractor::returning(descriptor), "printf '%s\\n' \"$@\"").await;

        let response = get(&server, &format!("/download?url={}", SOURCE)).await;
        assert_eq!(response.status(), 200);
        let body = response.text().await.unwrap();
        assert_eq!(body.lines().filter(|arg| *arg == "-i").count(), 2);
        assert!(body.contains("https://cdn/a.webm"));
    }

    #[tokio::test]
    async fn test_forced_audio_kind() {
        let server = start(
            FakeExtractor::returning(demo("h264", "aac", "https://cdn/x.mp4")),
            "printf '%s\\n' \"$@\"",
        )
        .await;

        let response = get(&server, &format!("/download?url={}&kind=audio", SOURCE)).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "audio/mpeg3");
        let body = response.text().await.unwrap();
        assert!(body.lines().any(|arg| arg == "-vn"));

        let response = get(&server, &format!("/download?url={}&kind=gif", SOURCE)).await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_missing_url_never_calls_extractor() {
        let extractor = FakeExtractor::returning(demo("h264", "aac", "https://cdn/x.mp4"));
        let server = start(extractor.clone(), "exit 0").await;

        for query in ["/download", "/download?url=", "/download?url=%20%20", "/download?f=best"] {
            let response = get(&server, query).await;
            assert_eq!(response.status(), 400, "query {}", query);
        }
        let response = get(&server, "/download?url=a&url=b").await;
        assert_eq!(response.status(), 400);

        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_playlist_is_rejected() {
        let mut descriptor = demo("h264", "aac", "https://cdn/x.mp4");
        descriptor.entries = Some(vec![MediaDescriptor::default()]);
        let server = start(FakeExtractor::returning(descriptor), "echo spawned > \"$0.ran\"").await;

        let response = get(&server, &format!("/download?url={}", SOURCE)).await;
        assert_eq!(response.status(), 400);
        assert!(response
            .text()
            .await
            .unwrap()
            .contains("does not support playlists"));
        assert!(!server.dir.path().join("ffmpeg.ran").exists());
    }

    #[tokio::test]
    async fn test_video_without_audio_is_rejected() {
        let server = start(
            FakeExtractor::returning(demo("vp9", "none", "https://cdn/x.webm")),
            "exit 0",
        )
        .await;

        let response = get(&server, &format!("/download?url={}", SOURCE)).await;
        assert_eq!(response.status(), 400);
        assert!(response
            .text()
            .await
            .unwrap()
            .contains("video without audio not supported"));
    }

    #[tokio::test]
    async fn test_resolver_error_is_propagated() {
        let server = start(
            FakeExtractor::new(FakeOutcome::Blocked("HTTP Error 429: Too Many Requests")),
            "exit 0",
        )
        .await;

        let response = get(&server, &format!("/download?url={}", SOURCE)).await;
        assert_eq!(response.status(), 403);
        assert!(response.text().await.unwrap().contains("Too Many Requests"));
    }

    #[tokio::test]
    async fn test_transcoder_failure_before_output_is_500() {
        let server = start(
            FakeExtractor::returning(demo("h264", "aac", "https://cdn/x.mp4")),
            "echo 'Server returned 404 Not Found' >&2; exit 1",
        )
        .await;

        let response = get(&server, &format!("/download?url={}", SOURCE)).await;
        assert_eq!(response.status(), 500);
        assert!(response.text().await.unwrap().contains("404 Not Found"));
    }

    #[tokio::test]
    async fn test_info_summary() {
        let extractor = FakeExtractor::returning(demo("h264", "aac", "https://cdn/x.mp4"));
        let server = start(extractor.clone(), "exit 0").await;

        let first: serde_json::Value = get(&server, &format!("/info?q={}", SOURCE))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(first["title"], "Demo");
        assert_eq!(first["uploader"], "Someone");
        assert_eq!(first["webpage_url"], "https://video.example/watch?id=abc");
        assert!(first.get("acodec").is_none());

        let second: serde_json::Value = get(&server, &format!("/info?q={}", SOURCE))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(extractor.calls(), 2);
    }

    #[tokio::test]
    async fn test_info_full_descriptor() {
        let server = start(
            FakeExtractor::returning(demo("none", "aac", "https://cdn/x.m4a")),
            "exit 0",
        )
        .await;

        let response = get(&server, &format!("/info?q={}&full=true", SOURCE)).await;
        assert_eq!(response.status(), 200);
        let descriptor: MediaDescriptor = response.json().await.unwrap();
        assert_eq!(descriptor.video_codec, Codec::None);
        assert_eq!(descriptor.primary_url.as_deref(), Some("https://cdn/x.m4a"));
    }

    #[tokio::test]
    async fn test_info_validation() {
        let extractor = FakeExtractor::returning(MediaDescriptor::default());
        let server = start(extractor.clone(), "exit 0").await;

        let response = get(&server, "/info?q=%20").await;
        assert_eq!(response.status(), 400);
        let json: serde_json::Value = response.json().await.unwrap();
        assert!(json["error"].as_str().unwrap().contains("\"q\""));
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_info_blocked_is_403() {
        let server = start(
            FakeExtractor::new(FakeOutcome::Blocked("Sign in to confirm you're not a bot")),
            "exit 0",
        )
        .await;

        let response = get(&server, &format!("/info?q={}", SOURCE)).await;
        assert_eq!(response.status(), 403);
        let json: serde_json::Value = response.json().await.unwrap();
        assert!(json["error"].as_str().unwrap().contains("blocked"));
        assert_eq!(json["details"], "Sign in to confirm you're not a bot");
    }

    #[tokio::test]
    async fn test_info_failure_is_500() {
        let server = start(
            FakeExtractor::new(FakeOutcome::Failed("Unsupported URL")),
            "exit 0",
        )
        .await;

        let response = get(&server, &format!("/info?q={}", SOURCE)).await;
        assert_eq!(response.status(), 500);
        let json: serde_json::Value = response.json().await.unwrap();
        assert_eq!(json["error"], "Failed to fetch info");
        assert_eq!(json["details"], "Unsupported URL");
    }

    /// Serve `body` as the `/info` response so downloads can be pointed at it.
    async fn info_stub(body: &'static str) -> String {
        let app = axum::Router::new()
            .route("/info", axum::routing::get(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await });
        base
    }

    #[tokio::test]
    async fn test_unreachable_info_endpoint_is_400() {
        let extractor = FakeExtractor::returning(demo("h264", "aac", "https://cdn/x.mp4"));
        let server = start_with(extractor.clone(), "exit 0", |config| {
            config.server.public_url = Some("http://127.0.0.1:1".to_string());
        })
        .await;

        let response = get(&server, &format!("/download?url={}", SOURCE)).await;
        assert_eq!(response.status(), 400);
        assert!(response.text().await.unwrap().starts_with("Processing failed"));
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_info_response_is_400() {
        for body in ["42", "[1,2]", "not json"] {
            let stub = info_stub(body).await;
            let extractor = FakeExtractor::returning(MediaDescriptor::default());
            let server = start_with(extractor, "exit 0", |config| {
                config.server.public_url = Some(stub);
            })
            .await;

            let response = get(&server, &format!("/download?url={}", SOURCE)).await;
            assert_eq!(response.status(), 400, "body {}", body);
            assert!(response
                .text()
                .await
                .unwrap()
                .contains("Invalid response from info endpoint"));
        }
    }

    #[tokio::test]
    async fn test_client_disconnect_frees_transcoder_slot() {
        let server = start_with(
            FakeExtractor::returning(demo("h264", "aac", "https://cdn/x.mp4")),
            "printf 'x'; exec sleep 30",
            |config| {
                config.transcoder.max_concurrent = 1;
                config.transcoder.queue_timeout_secs = 3;
                config.transcoder.idle_timeout_secs = 60;
            },
        )
        .await;

        let mut first = get(&server, &format!("/download?url={}", SOURCE)).await;
        assert_eq!(first.status(), 200);
        assert_eq!(first.chunk().await.unwrap().as_deref(), Some(&b"x"[..]));
        drop(first);

        // The only permit is released once the abandoned ffmpeg is killed.
        let mut second = get(&server, &format!("/download?url={}", SOURCE)).await;
        assert_eq!(second.status(), 200);
        assert_eq!(second.chunk().await.unwrap().as_deref(), Some(&b"x"[..]));
    }
}
