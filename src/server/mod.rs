mod download;
mod error;
mod info;

pub use error::ProxyError;

use crate::{
    config::Config,
    media::{Extractor, Transcoder},
};
use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use url::Url;

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<dyn Extractor>,
    pub transcoder: Transcoder,
    pub http: reqwest::Client,
    /// Where the download handler reaches `/info`; always ends in `/`.
    pub info_base: Url,
    pub default_format: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info::info))
        .route("/download", get(download::download))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

pub struct Server {
    listener: TcpListener,
    app: Router,
}

impl Server {
    pub async fn bind(config: &Config, extractor: Arc<dyn Extractor>) -> Result<Self> {
        let listener = TcpListener::bind(&config.server.bind)
            .await
            .with_context(|| format!("Failed to bind {}", config.server.bind))?;
        let local_addr = listener.local_addr()?;

        let info_base = match &config.server.public_url {
            Some(public_url) => base_url(public_url)?,
            None => base_url(&format!("http://{}", loopback_for(local_addr)))?,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.server.info_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let state = AppState {
            extractor,
            transcoder: Transcoder::new(&config.transcoder),
            http,
            info_base,
            default_format: config.extractor.default_format.clone(),
        };

        Ok(Self {
            listener,
            app: router(state),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self) -> Result<()> {
        info!("Listening on http://{}", self.local_addr()?);
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down...");
            })
            .await
            .context("HTTP server failed")
    }
}

/// A wildcard bind address is not something we can connect back to.
fn loopback_for(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port())
        }
        _ => addr,
    }
}

fn base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("Invalid base URL {}", raw))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
