//! Core library for linkguard.  This module wires together the URL
//! detector, the submission gate, the remote check endpoint and the
//! client bootstrap data behind an axum router.

mod config;
pub mod detector;
pub mod live;
pub mod nonce;
pub mod sanitize;
pub mod validator;

pub use config::AppConfig;

use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, FormRejection, JsonRejection},
    DefaultBodyLimit, State,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::detector::UrlDetector;
use crate::live::{FieldKind, LiveValidator};
use crate::nonce::{NonceIssuer, CHECK_ACTION};
use crate::sanitize::sanitize_textarea;
use crate::validator::{FieldError, SubmissionValidator};

pub use crate::detector::{contains_url, DetectionPolicy};
pub use crate::validator::{FieldValue, SubmissionGate};

/// Path of the remote check endpoint, advertised to clients.
pub const CHECK_PATH: &str = "/check";

/// Body posted by a form host once it has parsed a submission.
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub form_id: Option<String>,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub allowed: bool,
    pub invalid_fields: Vec<FieldError>,
}

/// Form-encoded remote check request.  `action` is what admin-ajax style
/// clients send alongside; it is accepted and ignored.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct CheckRequest {
    pub text: Option<String>,
    pub nonce: Option<String>,
    pub action: Option<String>,
}

/// `{"success": .., "data": ..}` envelope used by the remote check.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AjaxResponse<T> {
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub contains_url: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AjaxMessage {
    pub message: String,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
    #[error("Invalid or expired security token.")]
    InvalidNonce,
    #[error("No text provided.")]
    MissingText,
}

impl CheckError {
    fn status(self) -> StatusCode {
        match self {
            CheckError::InvalidNonce => StatusCode::FORBIDDEN,
            CheckError::MissingText => StatusCode::OK,
        }
    }

    fn metric_label(self) -> &'static str {
        match self {
            CheckError::InvalidNonce => "invalid_nonce",
            CheckError::MissingText => "missing_text",
        }
    }
}

impl IntoResponse for CheckError {
    fn into_response(self) -> axum::response::Response {
        let body = AjaxResponse {
            success: false,
            data: AjaxMessage {
                message: self.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: i32,
    pub message: String,
    pub http_status: u16,
}

/// The detector contract handed to browser validators.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PatternContract {
    pub source: String,
    pub flags: String,
}

/// Localised data a browser-side validator boots from.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub ajax_url: String,
    pub action: String,
    pub error_message: String,
    pub nonce: String,
    pub pattern: PatternContract,
    pub field_types: Vec<String>,
}

/// Request counters and a submission latency histogram.
pub struct Metrics {
    pub submissions_total: AtomicU64,
    pub submissions_rejected_total: AtomicU64,
    pub fields_invalidated_total: AtomicU64,
    pub checks_total: AtomicU64,
    pub check_urls_total: AtomicU64,
    pub check_invalid_nonce_total: AtomicU64,
    pub check_missing_text_total: AtomicU64,
    pub nonces_issued_total: AtomicU64,
    // Histogram bucket upper bounds in microseconds and their counts
    pub hist_buckets: Vec<u64>,
    pub hist_counts: Vec<AtomicU64>,
    pub hist_sum_us: AtomicU64,
    pub hist_count: AtomicU64,
}

impl Metrics {
    fn new() -> Self {
        let buckets: Vec<u64> = vec![10, 25, 50, 100, 250, 500, 1000, 5000, 10000];
        Self {
            submissions_total: AtomicU64::new(0),
            submissions_rejected_total: AtomicU64::new(0),
            fields_invalidated_total: AtomicU64::new(0),
            checks_total: AtomicU64::new(0),
            check_urls_total: AtomicU64::new(0),
            check_invalid_nonce_total: AtomicU64::new(0),
            check_missing_text_total: AtomicU64::new(0),
            nonces_issued_total: AtomicU64::new(0),
            hist_counts: buckets.iter().map(|_| AtomicU64::new(0)).collect(),
            hist_buckets: buckets,
            hist_sum_us: AtomicU64::new(0),
            hist_count: AtomicU64::new(0),
        }
    }

    fn observe_submission(&self, latency_us: u64) {
        self.hist_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.hist_count.fetch_add(1, Ordering::Relaxed);
        // find first bucket >= value
        for (idx, ub) in self.hist_buckets.iter().enumerate() {
            if latency_us <= *ub {
                self.hist_counts[idx].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    fn record_check_error(&self, err: CheckError) {
        let counter = match err {
            CheckError::InvalidNonce => &self.check_invalid_nonce_total,
            CheckError::MissingText => &self.check_missing_text_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Application state shared across handlers.  Built once at startup and
/// never mutated afterwards apart from the metric counters.
#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<UrlDetector>,
    pub validator: Arc<SubmissionValidator>,
    pub live: Arc<LiveValidator>,
    pub nonces: Arc<NonceIssuer>,
    pub allowed_tokens: Option<HashSet<String>>, // bearer allowlist for hosts
    /// Maximum accepted raw request body size in bytes (None => unlimited)
    pub max_request_bytes: Option<usize>,
    pub metrics: Arc<Metrics>,
    // Process start time (epoch secs) and instant for uptime computation
    pub process_start_epoch: f64,
    pub process_start_instant: Instant,
}

impl AppState {
    pub fn from_config(config: AppConfig) -> Self {
        let AppConfig {
            detector,
            field_message,
            banner_message,
            allowed_tokens,
            max_request_bytes,
            nonce_secret,
            nonce_lifetime_secs,
        } = config;

        let lifetime = Duration::from_secs(nonce_lifetime_secs);
        let nonces = match nonce_secret {
            Some(secret) => NonceIssuer::new(secret.into_bytes(), lifetime),
            None => {
                tracing::warn!(
                    "LINKGUARD_NONCE_SECRET not set; using a random secret, tokens will not survive restarts"
                );
                NonceIssuer::ephemeral(lifetime)
            }
        };

        if !detector.policy().is_default() {
            tracing::info!(pattern = %detector.policy().pattern, "custom detection pattern active");
        }

        let detector = Arc::new(detector);
        let start_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();

        AppState {
            validator: Arc::new(SubmissionValidator::new(detector.clone(), field_message)),
            live: Arc::new(LiveValidator::new(detector.clone(), banner_message)),
            detector,
            nonces: Arc::new(nonces),
            allowed_tokens,
            max_request_bytes,
            metrics: Arc::new(Metrics::new()),
            process_start_epoch: start_time.as_secs_f64(),
            process_start_instant: Instant::now(),
        }
    }
}

/// Build state from environment variables.  This function reads the
/// following variables:
///
/// * `LINKGUARD_POLICY_CONFIG` (optional) – path to a JSON policy file.
/// * `LINKGUARD_ALLOWED_TOKENS` (optional) – comma separated bearer allowlist.
/// * `LINKGUARD_MAX_REQUEST_BYTES` (optional) – request body limit.
/// * `LINKGUARD_NONCE_SECRET` / `LINKGUARD_NONCE_LIFETIME_SECS` (optional).
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    Ok(AppState::from_config(config))
}

/// Build the Axum router and attach handlers.  The router holds a copy
/// of the `AppState` for each invocation.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/submissions/validate", post(submission_handler))
        .route(CHECK_PATH, post(check_handler))
        .route("/client-config", get(client_config_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

fn respond_with_error(err: ErrorResponse) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

fn authorization_error() -> ErrorResponse {
    ErrorResponse {
        error_code: 2001,
        message: "Unauthorized".into(),
        http_status: 401,
    }
}

fn too_large_error(limit: Option<usize>) -> ErrorResponse {
    let message = match limit {
        Some(limit) => format!("Request too large (body exceeded limit {} bytes)", limit),
        None => "Request too large".to_string(),
    };
    ErrorResponse {
        error_code: 4001,
        message,
        http_status: 413,
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ErrorResponse> {
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(authorization_error)?;

    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return Err(authorization_error());
    }
    let token = raw[6..].trim();
    if token.is_empty() {
        return Err(authorization_error());
    }
    Ok(token.to_string())
}

fn ensure_authorized(
    headers: &HeaderMap,
    allowed_tokens: Option<&HashSet<String>>,
) -> Result<(), ErrorResponse> {
    let token = extract_bearer_token(headers)?;
    if let Some(tokens) = allowed_tokens {
        if !tokens.contains(&token) {
            return Err(authorization_error());
        }
    }
    Ok(())
}

fn content_length_exceeds(headers: &HeaderMap, limit: Option<usize>) -> bool {
    let Some(limit) = limit else {
        return false;
    };
    headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .map(|clen| clen > limit)
        .unwrap_or(false)
}

fn is_length_limit(rejection: &BytesRejection) -> bool {
    matches!(
        rejection,
        BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_))
    )
}

/// Handler for `/submissions/validate`.  The form host posts every parsed
/// field; the response lists each field that carries a URL.
async fn submission_handler(
    state: State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SubmissionRequest>, JsonRejection>,
) -> axum::response::Response {
    // Size guard: rely on Content-Length header if provided.
    if content_length_exceeds(&headers, state.max_request_bytes) {
        return respond_with_error(too_large_error(state.max_request_bytes));
    }
    if let Err(err) = ensure_authorized(&headers, state.allowed_tokens.as_ref()) {
        return respond_with_error(err);
    }

    let payload = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => {
            return handle_json_rejection(&state, rejection);
        }
    };

    let start = Instant::now();
    let invalid_fields = state.validator.validate_map(&payload.fields);
    let latency_us = start.elapsed().as_micros() as u64;

    let metrics = &state.metrics;
    metrics.observe_submission(latency_us);
    metrics.submissions_total.fetch_add(1, Ordering::Relaxed);

    let allowed = invalid_fields.is_empty();
    if !allowed {
        metrics
            .submissions_rejected_total
            .fetch_add(1, Ordering::Relaxed);
        metrics
            .fields_invalidated_total
            .fetch_add(invalid_fields.len() as u64, Ordering::Relaxed);
        let names: Vec<&str> = invalid_fields.iter().map(|e| e.field.as_str()).collect();
        tracing::info!(
            form_id = ?payload.form_id,
            invalid = invalid_fields.len(),
            fields = ?names,
            "submission rejected"
        );
    } else {
        tracing::debug!(form_id = ?payload.form_id, field_count = payload.fields.len(), "submission allowed");
    }

    let response = SubmissionResponse {
        allowed,
        invalid_fields,
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn handle_json_rejection(state: &AppState, rejection: JsonRejection) -> axum::response::Response {
    match rejection {
        JsonRejection::BytesRejection(bytes) if is_length_limit(&bytes) => {
            tracing::warn!(limit = ?state.max_request_bytes, "request body exceeded configured limit");
            respond_with_error(too_large_error(state.max_request_bytes))
        }
        JsonRejection::JsonDataError(err) => respond_with_error(ErrorResponse {
            error_code: 4002,
            message: format!("Invalid submission payload: {}", err.body_text()),
            http_status: 400,
        }),
        JsonRejection::JsonSyntaxError(err) => respond_with_error(ErrorResponse {
            error_code: 4002,
            message: format!("Malformed JSON: {}", err.body_text()),
            http_status: 400,
        }),
        other => other.into_response(),
    }
}

/// Handler for the remote check.  The token is verified before anything
/// else; only then is the text sanitised and run through the detector.
async fn check_handler(
    state: State<AppState>,
    headers: HeaderMap,
    payload: Result<Form<CheckRequest>, FormRejection>,
) -> axum::response::Response {
    if content_length_exceeds(&headers, state.max_request_bytes) {
        return respond_with_error(too_large_error(state.max_request_bytes));
    }
    let request = match payload {
        Ok(Form(inner)) => inner,
        Err(FormRejection::BytesRejection(bytes)) if is_length_limit(&bytes) => {
            return respond_with_error(too_large_error(state.max_request_bytes));
        }
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable check request");
            CheckRequest::default()
        }
    };

    state.metrics.checks_total.fetch_add(1, Ordering::Relaxed);
    match run_check(&state, request) {
        Ok(result) => {
            if result.contains_url {
                state
                    .metrics
                    .check_urls_total
                    .fetch_add(1, Ordering::Relaxed);
            }
            let body = AjaxResponse {
                success: true,
                data: result,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            state.metrics.record_check_error(err);
            err.into_response()
        }
    }
}

fn run_check(state: &AppState, request: CheckRequest) -> Result<CheckResult, CheckError> {
    let nonce = request.nonce.as_deref().unwrap_or_default();
    if state.nonces.verify(nonce, CHECK_ACTION).is_none() {
        tracing::warn!(reason = CheckError::InvalidNonce.metric_label(), "check rejected");
        return Err(CheckError::InvalidNonce);
    }
    let text = request.text.ok_or(CheckError::MissingText)?;
    let text = sanitize_textarea(&text);
    Ok(CheckResult {
        contains_url: state.detector.contains_url(&text),
    })
}

/// Bootstrap data for browser validators, including a fresh token.
async fn client_config_handler(State(state): State<AppState>) -> axum::response::Response {
    let policy = state.detector.policy();
    let config = ClientConfig {
        ajax_url: CHECK_PATH.to_owned(),
        action: CHECK_ACTION.to_owned(),
        error_message: state.live.banner_message().to_owned(),
        nonce: state.nonces.issue(CHECK_ACTION),
        pattern: PatternContract {
            source: policy.pattern.clone(),
            flags: policy.js_flags().to_owned(),
        },
        field_types: FieldKind::WATCHED
            .iter()
            .map(|k| k.as_str().to_owned())
            .collect(),
    };
    state
        .metrics
        .nonces_issued_total
        .fetch_add(1, Ordering::Relaxed);
    (StatusCode::OK, Json(config)).into_response()
}

/// Simple health endpoint for container readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "customPattern": !state.detector.policy().is_default(),
        "nonceLifetimeSecs": state.nonces.lifetime().as_secs(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition. Text format with simple counters.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    use std::fmt::Write as _;
    let m = &state.metrics;
    let mut buf = String::new();

    let counters: [(&str, &str, u64); 6] = [
        (
            "linkguard_submissions_total",
            "Submissions validated",
            m.submissions_total.load(Ordering::Relaxed),
        ),
        (
            "linkguard_submissions_rejected_total",
            "Submissions with at least one invalidated field",
            m.submissions_rejected_total.load(Ordering::Relaxed),
        ),
        (
            "linkguard_fields_invalidated_total",
            "Fields invalidated across all submissions",
            m.fields_invalidated_total.load(Ordering::Relaxed),
        ),
        (
            "linkguard_checks_total",
            "Remote check requests received",
            m.checks_total.load(Ordering::Relaxed),
        ),
        (
            "linkguard_check_urls_total",
            "Remote checks that found a URL",
            m.check_urls_total.load(Ordering::Relaxed),
        ),
        (
            "linkguard_nonces_issued_total",
            "Tokens issued through client-config",
            m.nonces_issued_total.load(Ordering::Relaxed),
        ),
    ];
    for (name, help, value) in counters {
        writeln!(&mut buf, "# HELP {} {}", name, help).ok();
        writeln!(&mut buf, "# TYPE {} counter", name).ok();
        writeln!(&mut buf, "{} {}", name, value).ok();
    }

    writeln!(
        &mut buf,
        "# HELP linkguard_check_errors_total Remote checks refused, by reason\n# TYPE linkguard_check_errors_total counter"
    )
    .ok();
    for err in [CheckError::InvalidNonce, CheckError::MissingText] {
        let value = match err {
            CheckError::InvalidNonce => m.check_invalid_nonce_total.load(Ordering::Relaxed),
            CheckError::MissingText => m.check_missing_text_total.load(Ordering::Relaxed),
        };
        writeln!(
            &mut buf,
            "linkguard_check_errors_total{{reason=\"{}\"}} {}",
            err.metric_label(),
            value
        )
        .ok();
    }

    // Histogram
    writeln!(
        &mut buf,
        "# HELP linkguard_submission_latency_us Submission validation latency histogram microseconds"
    )
    .ok();
    writeln!(&mut buf, "# TYPE linkguard_submission_latency_us histogram").ok();
    let mut cumulative: u64 = 0;
    for (i, ub) in m.hist_buckets.iter().enumerate() {
        cumulative += m.hist_counts[i].load(Ordering::Relaxed);
        writeln!(
            &mut buf,
            "linkguard_submission_latency_us_bucket{{le=\"{}\"}} {}",
            ub, cumulative
        )
        .ok();
    }
    let count = m.hist_count.load(Ordering::Relaxed);
    writeln!(
        &mut buf,
        "linkguard_submission_latency_us_bucket{{le=\"+Inf\"}} {}",
        count
    )
    .ok();
    writeln!(
        &mut buf,
        "linkguard_submission_latency_us_sum {}",
        m.hist_sum_us.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(&mut buf, "linkguard_submission_latency_us_count {}", count).ok();

    // Build info gauge (value 1)
    writeln!(
        &mut buf,
        "# HELP linkguard_build_info Build information\n# TYPE linkguard_build_info gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "linkguard_build_info{{version=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION")
    )
    .ok();
    // Process start & uptime
    writeln!(
        &mut buf,
        "# HELP linkguard_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE linkguard_process_start_time_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "linkguard_process_start_time_seconds {}",
        state.process_start_epoch
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP linkguard_process_uptime_seconds Process uptime seconds\n# TYPE linkguard_process_uptime_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "linkguard_process_uptime_seconds {}",
        state.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        buf,
    )
        .into_response()
}
