use super::{AppState, ProxyError};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct InfoParams {
    q: Option<String>,
    f: Option<String>,
    /// Return the full descriptor instead of the summary.
    #[serde(default)]
    full: bool,
}

/// `GET /info?q=<url>[&f=<format>][&full=true]`
pub async fn info(
    State(state): State<AppState>,
    params: Result<Query<InfoParams>, QueryRejection>,
) -> Response {
    match resolve(&state, params).await {
        Ok(response) => response,
        Err(e) => {
            error!("Error fetching info: {} ({:?})", e, e.details());
            e.into_json()
        }
    }
}

async fn resolve(
    state: &AppState,
    params: Result<Query<InfoParams>, QueryRejection>,
) -> Result<Response, ProxyError> {
    let Query(params) = params.map_err(|e| ProxyError::InvalidInput(e.body_text()))?;

    let url = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| {
            ProxyError::InvalidInput(
                "Query parameter \"q\" is required and must be a valid URL".to_string(),
            )
        })?;

    if params.full {
        let format = params
            .f
            .as_deref()
            .filter(|f| !f.is_empty())
            .unwrap_or(&state.default_format);
        info!("Fetching full info for URL: {} (format {})", url, format);
        let descriptor = state.extractor.full_info(url, format).await?;
        Ok(Json(descriptor).into_response())
    } else {
        info!("Fetching info for URL: {}", url);
        let descriptor = state.extractor.basic_info(url).await?;
        Ok(Json(descriptor.summary()).into_response())
    }
}
