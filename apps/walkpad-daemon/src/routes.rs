use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::controller::{ControlError, Controller, StatusSnapshot};
use crate::metrics;

/// Optional fields every control request may carry.
///
/// Bodies are parsed leniently: anything unreadable degrades to the
/// defaults instead of failing the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlRequest {
    pub session: Option<String>,
    pub speed: Option<f64>,
}

impl ControlRequest {
    pub fn parse(body: &[u8]) -> Self {
        let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        Self {
            session: fields
                .get("session")
                .and_then(Value::as_str)
                .map(str::to_owned),
            speed: fields.get("speed").and_then(speed_value),
        }
    }
}

fn speed_value(value: &Value) -> Option<f64> {
    let speed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    speed.filter(|speed| speed.is_finite())
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
    #[serde(flatten)]
    status: StatusSnapshot,
}

#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

fn respond(result: Result<StatusSnapshot, ControlError>) -> Response {
    match result {
        Ok(status) => Json(OkResponse { ok: true, status }).into_response(),
        Err(err) => {
            let code = match err {
                ControlError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                ControlError::CommandFailure { .. } => StatusCode::BAD_GATEWAY,
            };
            (
                code,
                Json(ErrorResponse {
                    ok: false,
                    error: err.reason().to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn heartbeat(State(controller): State<Controller>, body: Bytes) -> Response {
    let request = ControlRequest::parse(&body);
    respond(controller.heartbeat(request.session, request.speed).await)
}

async fn start(State(controller): State<Controller>, body: Bytes) -> Response {
    let request = ControlRequest::parse(&body);
    respond(controller.start(request.session, request.speed).await)
}

async fn stop(State(controller): State<Controller>, body: Bytes) -> Response {
    let request = ControlRequest::parse(&body);
    respond(controller.stop(request.session).await)
}

async fn speed(State(controller): State<Controller>, body: Bytes) -> Response {
    let request = ControlRequest::parse(&body);
    respond(controller.set_speed(request.speed).await)
}

async fn status(State(controller): State<Controller>) -> Json<StatusSnapshot> {
    Json(controller.status())
}

async fn session_end(State(controller): State<Controller>, body: Bytes) -> Response {
    let request = ControlRequest::parse(&body);
    respond(controller.session_end(request.session).await)
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

pub fn router(controller: Controller) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/heartbeat", get(heartbeat).post(heartbeat))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/speed", post(speed))
        .route("/status", get(status))
        .route("/session/end", post(session_end))
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}
