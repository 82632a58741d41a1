//! API route handlers.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use tracing::debug;
use warden_core::{AuditRecord, CheckKind, Decision, DecisionResponse, Verdict};

use crate::auth::Claims;
use crate::error::{ApiError, Result};
use crate::models::{
    CacheResponse, CacheRow, CheckHashRequest, CheckMimeRequest, CheckUrlRequest, HealthResponse,
    LogsQuery, LogsResponse,
};
use crate::state::AppState;

/// Maximum page size for GET /logs.
const MAX_LOG_PAGE: usize = 500;

/// Turns a verdict into the wire response. Error decisions carry their
/// kind's status code, every other decision is 200.
fn respond(verdict: &Verdict) -> Response {
    let status = match verdict.decision {
        Decision::Error { kind } => {
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        _ => StatusCode::OK,
    };
    (status, Json(DecisionResponse::from(&verdict.decision))).into_response()
}

fn audit(
    state: &AppState,
    check: CheckKind,
    subject: &str,
    verdict: &Verdict,
    started: Instant,
    claims: Option<&Claims>,
) {
    let mut record = AuditRecord::new(check, subject, verdict, started.elapsed());
    if let Some(sub) = claims.and_then(|c| c.sub.as_deref()) {
        record = record.with_client(sub);
    }
    state.audit.record(&record);
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// POST /checkUrl - Check a URL, or a hostname at handshake time.
pub async fn check_url(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    payload: std::result::Result<Json<CheckUrlRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let claims = claims.as_ref().map(|Extension(c)| c);
    let started = Instant::now();

    let (check, subject, verdict) = match (req.host, req.url) {
        (Some(host), _) => {
            let subject = host.to_string();
            debug!(host = %subject, "Checking host");
            let verdict = state.decisions.check_host_value(&host).await;
            let subject = host.as_str().map(str::to_string).unwrap_or(subject);
            (CheckKind::Host, subject, verdict)
        }
        (None, Some(url)) => {
            debug!(url = %url, "Checking URL");
            let verdict = state.decisions.check_url(&url).await;
            (CheckKind::Url, url, verdict)
        }
        (None, None) => (
            CheckKind::Url,
            String::new(),
            Verdict::invalid(warden_core::ErrorKind::MissingField),
        ),
    };

    audit(&state, check, &subject, &verdict, started, claims);
    Ok(respond(&verdict))
}

/// POST /checkHash - Check a body hash.
pub async fn check_hash(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    payload: std::result::Result<Json<CheckHashRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let claims = claims.as_ref().map(|Extension(c)| c);
    let started = Instant::now();

    let file_hash = req.file_hash.unwrap_or_default();
    debug!(sha256 = %file_hash, url = ?req.url, "Checking hash");
    let verdict = state.decisions.check_hash(&file_hash).await;

    audit(&state, CheckKind::Hash, &file_hash, &verdict, started, claims);
    Ok(respond(&verdict))
}

/// POST /checkMimeType - Check a sniffed content type.
pub async fn check_mime(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    payload: std::result::Result<Json<CheckMimeRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let claims = claims.as_ref().map(|Extension(c)| c);
    let started = Instant::now();

    let mime = req.mime_type.unwrap_or_default();
    debug!(mime = %mime, url = ?req.url, "Checking MIME type");
    let verdict = state.decisions.check_mime(&mime).await;

    audit(&state, CheckKind::Mime, &mime, &verdict, started, claims);
    Ok(respond(&verdict))
}

/// GET /cache - Dump the reputation cache, expired entries included.
pub async fn get_cache(State(state): State<AppState>) -> Result<Json<CacheResponse>> {
    let entries = state.cache.get_all()?;

    Ok(Json(CacheResponse {
        status: "success",
        cache: entries.into_iter().map(CacheRow::from).collect(),
    }))
}

/// GET /logs - Recent decisions with pagination.
pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>> {
    let limit = query.limit.min(MAX_LOG_PAGE);
    let logs = state.db.recent_decisions(limit, query.offset)?;
    let total = state.db.count_decisions()?;

    Ok(Json(LogsResponse {
        status: "success",
        logs,
        total,
    }))
}

/// GET /health - Liveness check.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
