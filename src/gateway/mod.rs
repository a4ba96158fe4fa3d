//! Axum-based HTTP gateway exposing the device-auth and app-auth exchanges.
//!
//! - Request body size limits (64KB default)
//! - Request timeouts (30s default) to prevent slow-loris attacks
//! - Errors map to status codes by class: auth 401/403, config 500,
//!   transient 503

use crate::config::Config;
use crate::error::{AuthError, ConfigError, Error};
use crate::protocol::{AuthResponse, RequestHeaders};
use crate::server::{
    bearer_token, AppPrincipal, AppTokenValidator, DeviceAuthService, DeviceRegistry,
    SignatureValidator, SigningKey, SqliteDeviceRegistry, TokenIssuer, TokenPolicy,
    TokenVerifier,
};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DeviceAuthService>,
    pub verifier: Arc<TokenVerifier>,
    pub app_tokens: Arc<AppTokenValidator>,
    pub registry: Arc<dyn DeviceRegistry>,
}

impl AppState {
    /// Wire every component from configuration and the resolved signing key.
    pub fn from_config(
        config: &Config,
        signing_key: Arc<SigningKey>,
        registry: Arc<dyn DeviceRegistry>,
    ) -> std::result::Result<Self, ConfigError> {
        let validator = SignatureValidator::new(registry.clone(), config.signature.mode)
            .with_window(config.signature.window_secs);

        let policy = TokenPolicy {
            device_ttl_secs: config.tokens.device_ttl_secs,
            app_ttl_secs: config.tokens.app_ttl_secs,
            identity_key: config.tokens.identity_key,
        };
        let mut issuer = TokenIssuer::new(signing_key.clone(), policy);
        if let Some(secret) = config.app_secret() {
            issuer = issuer.with_app_secret(secret);
        }

        let service = DeviceAuthService::new(validator, issuer, registry.clone())
            .with_anon_key(config.gateway.anon_key.clone());

        let app_tokens =
            AppTokenValidator::configured(config.tokens.app_auth_mode, config.app_secret())?;

        Ok(Self {
            service: Arc::new(service),
            verifier: Arc::new(TokenVerifier::new(signing_key)),
            app_tokens: Arc::new(app_tokens),
            registry,
        })
    }
}

/// Build the router with body limit and timeout layers.
pub fn router(state: AppState, max_body_bytes: usize, timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/device-auth", post(handle_device_auth))
        .route("/device/me", get(handle_device_me))
        .route("/app-auth", post(handle_app_auth))
        .route("/app/me", get(handle_app_me))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
}

/// Run the HTTP gateway until Ctrl-C.
pub async fn run_gateway(config: Config, signing_key: Arc<SigningKey>) -> Result<()> {
    let host = config.gateway.host.as_str();
    let addr: SocketAddr = format!("{host}:{}", config.gateway.port)
        .parse()
        .with_context(|| format!("Invalid gateway address {host}"))?;

    let db_path = config.registry_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let registry: Arc<dyn DeviceRegistry> = Arc::new(
        SqliteDeviceRegistry::open(&db_path)
            .with_context(|| format!("Failed to open device registry {}", db_path.display()))?,
    );

    let state = AppState::from_config(&config, signing_key, registry)?;
    let app = router(
        state,
        config.gateway.max_body_bytes,
        Duration::from_secs(config.gateway.request_timeout_secs),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        registry = %db_path.display(),
        "Gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health: always public
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "app_tokens": if state.app_tokens.is_enforced() { "enforced" } else { "disabled" },
    }))
}

/// POST /device-auth: HMAC-signed request in, device token out
async fn handle_device_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth_headers = request_headers(&headers);
    match state.service.authenticate(&auth_headers, &body) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /app-auth: signed request naming the pairing code, app token out
async fn handle_app_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let auth_headers = request_headers(&headers);
    match state.service.exchange_app_token(&auth_headers, &body) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /device/me: device bearer token
async fn handle_device_me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = authorization(&headers) else {
        return error_response(&AuthError::MissingCredentials.into());
    };
    let claims = match state.verifier.verify_device_token(token) {
        Ok(c) => c,
        Err(e) => return error_response(&e.into()),
    };

    let device = match state.registry.find_by_serial(&claims.serial_number) {
        Ok(Some(d)) => d,
        Ok(None) => return error_response(&AuthError::DeviceNotFound.into()),
        Err(e) => return error_response(&e.into()),
    };
    if let Err(e) = device.status.ensure_active() {
        return error_response(&e.into());
    }

    let body = serde_json::json!({
        "serial_number": device.serial_number,
        "device_id": device.device_id,
        "device_uuid": device.device_uuid,
        "pairing_code": device.pairing_code,
        "debug_enabled": device.debug_enabled,
        "target_firmware_version": device.target_firmware_version,
        "expires_at": claims.exp,
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /app/me: companion app bearer token
async fn handle_app_me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = authorization(&headers).unwrap_or_default();
    match state.app_tokens.validate(token) {
        Ok(AppPrincipal::Verified(claims)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "verified": true,
                "serial_number": claims.serial_number,
                "device_id": claims.device_id,
                "pairing_code": claims.pairing_code,
                "expires_at": claims.exp,
            })),
        )
            .into_response(),
        Ok(AppPrincipal::Unverified) => (
            StatusCode::OK,
            Json(serde_json::json!({ "verified": false })),
        )
            .into_response(),
        Err(e) => error_response(&e.into()),
    }
}

fn request_headers(headers: &HeaderMap) -> RequestHeaders {
    RequestHeaders::from_lookup(|name| headers.get(name).and_then(|v| v.to_str().ok()))
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
}

/// Map an error to its status code and a `{success: false, error}` body.
fn error_response(error: &Error) -> Response {
    let (status, code) = match error {
        Error::Auth(e) if e.is_device_state() || *e == AuthError::NotPaired => {
            (StatusCode::FORBIDDEN, e.code())
        }
        Error::Auth(e) => (StatusCode::UNAUTHORIZED, e.code()),
        Error::Config(e) => {
            tracing::error!(error = %e, "Server misconfigured");
            (StatusCode::INTERNAL_SERVER_ERROR, "server_misconfigured")
        }
        Error::Transient(e) => {
            tracing::warn!(error = %e, "Transient failure");
            (StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable")
        }
    };
    (status, Json(AuthResponse::failure(code))).into_response()
}
