//! HTTP control plane on `krd.sock`.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Request as HttpRequest, State};
use axum::middleware::{self, Next};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use serde::Deserialize;
use serde_json::json;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use kr_core::protocol::{Request, RequestKind};

use crate::EnclaveClient;
use crate::error::DaemonError;

type AppState = Arc<EnclaveClient>;

/// Error body: `{"error": <tag>}`.
#[derive(Debug)]
pub struct ApiError(DaemonError);

impl From<DaemonError> for ApiError {
    fn from(err: DaemonError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self.0 {
            DaemonError::Unpaired | DaemonError::WaitingForKey => StatusCode::NOT_FOUND,
            DaemonError::Rejected => StatusCode::FORBIDDEN,
            DaemonError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DaemonError::Timeout
            | DaemonError::MalformedEnvelope(_)
            | DaemonError::AuthenticationFailure
            | DaemonError::RelayTransient(_)
            | DaemonError::RelayFatal(_)
            | DaemonError::ProtocolViolation(_)
            | DaemonError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(tag = self.0.tag(), error = %self.0, "Control request failed");
        }
        (status, Json(json!({ "error": self.0.tag() }))).into_response()
    }
}

/// Build the control router.
pub fn router(client: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/version", get(version))
        .route("/pair", get(get_pair).put(put_pair).delete(delete_pair))
        .route("/enclave", put(put_enclave))
        .route("/dashboard", get(dashboard))
        .layer(middleware::from_fn_with_state(request_timeout, enforce_deadline))
        .layer(TraceLayer::new_for_http())
        .with_state(client)
}

/// Requests still running after `limit` answer like any other timeout:
/// 500 with `{"error": "timeout"}`.
async fn enforce_deadline(
    State(limit): State<Duration>,
    request: HttpRequest,
    next: Next,
) -> Response {
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError(DaemonError::Timeout).into_response(),
    }
}

/// Serve `router` on `listener` until shutdown.
pub async fn serve(listener: UnixListener, router: Router, mut shutdown: watch::Receiver<bool>) {
    let stop = async move {
        let _ = shutdown.changed().await;
        info!("Control socket shutting down");
    };
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(stop)
        .await
    {
        warn!(error = %e, "Control server stopped");
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(DaemonError::InvalidRequest(format!("invalid JSON body: {e}"))))
}

/// `GET /ping`
async fn ping() -> Json<&'static str> {
    Json("pong")
}

/// `GET /version`
async fn version() -> Json<&'static str> {
    Json(crate::VERSION)
}

#[derive(Debug, Default, Deserialize)]
struct PairBody {
    #[serde(default)]
    name: Option<String>,
}

/// `PUT /pair`: start pairing and return the QR payload.
async fn put_pair(State(client): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let body: PairBody = if body.iter().all(u8::is_ascii_whitespace) {
        PairBody::default()
    } else {
        decode(&body)?
    };
    let payload = client.pair(body.name).await?;
    Ok(Json(payload).into_response())
}

/// `GET /pair`: paired channel details.
async fn get_pair(State(client): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(client.pairing_status().await?).into_response())
}

/// `DELETE /pair`
async fn delete_pair(State(client): State<AppState>) -> Result<Response, ApiError> {
    client.unpair().await?;
    Ok(Json(json!({})).into_response())
}

/// `PUT /enclave`: the generic tunnel to the phone.
async fn put_enclave(State(client): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: Request = decode(&body)?;
    let noop = request.kind() == RequestKind::NoOp;
    let response = client.request(request).await?;
    if noop {
        return Ok(Json(json!({})).into_response());
    }
    Ok(Json(response).into_response())
}

/// `GET /dashboard`
async fn dashboard(State(client): State<AppState>) -> Json<crate::enclave::Dashboard> {
    Json(client.dashboard().await)
}
