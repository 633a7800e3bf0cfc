//! Proxy query handlers

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::api::server::AppState;
use crate::error::PoolError;
use crate::models::ProxyFilter;
use crate::retrieval::render_address;

/// Filter parameters shared by the selection endpoints
#[derive(Debug, Deserialize, Default)]
pub struct SelectQuery {
    pub protocol: Option<String>,
    pub domain: Option<String>,
    pub anonymity: Option<String>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    fn filter(&self) -> Result<ProxyFilter, PoolError> {
        ProxyFilter::from_params(
            self.protocol.as_deref(),
            self.domain.as_deref(),
            self.anonymity.as_deref(),
        )
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct DisableQuery {
    pub ip: Option<String>,
    pub domain: Option<String>,
}

/// One random proxy from the best matches, as plain text
pub async fn random_proxy(
    State(state): State<AppState>,
    Query(query): Query<SelectQuery>,
) -> Result<Response, PoolError> {
    let filter = query.filter()?;

    match state.engine.select(&filter).await? {
        Some(candidate) => Ok(render_address(&candidate, &filter).into_response()),
        None => Ok((StatusCode::NOT_FOUND, "no proxy matches the requested filter").into_response()),
    }
}

/// Ranked matches as JSON; `limit` defaults to the candidate window
pub async fn list_proxies(
    State(state): State<AppState>,
    Query(query): Query<SelectQuery>,
) -> Result<impl IntoResponse, PoolError> {
    let filter = query.filter()?;
    let limit = query.limit.unwrap_or_else(|| state.engine.candidate_window());

    let proxies = state.engine.select_many(&filter, limit).await?;
    if proxies.is_empty() {
        return Err(PoolError::NoProxiesAvailable);
    }

    Ok(Json(proxies))
}

/// Stop serving `ip` for `domain`
pub async fn disable_domain(
    State(state): State<AppState>,
    Query(query): Query<DisableQuery>,
) -> Result<impl IntoResponse, PoolError> {
    let ip = required(query.ip, "ip")?;
    let domain = required(query.domain, "domain")?;

    if !state.engine.disable_destination(&ip, &domain).await? {
        return Err(PoolError::ProxyNotFound { host: ip });
    }

    Ok(format!("{} disabled for {}", ip, domain))
}

fn required(value: Option<String>, name: &str) -> Result<String, PoolError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PoolError::InvalidRequest(format!("missing parameter: {}", name)))
}
