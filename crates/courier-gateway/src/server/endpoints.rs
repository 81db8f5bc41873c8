//! HTTP endpoints
//!
//! Operator-facing metrics and health, plus the dispatch entry point for
//! business services that sit behind the gateway.

use crate::error::GatewayError;
use crate::metrics::{MetricsHistory, MetricsReport};
use crate::router::DeliveryResult;
use crate::server::GatewayState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier_common::{ErrorResponse, EventType, UserId};
use serde::Deserialize;
use serde_json::Value;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Current metrics document
pub async fn current_metrics(State(state): State<GatewayState>) -> Json<MetricsReport> {
    Json(state.router().metrics().current_metrics())
}

/// Retained metric snapshots, oldest first
pub async fn metrics_history(State(state): State<GatewayState>) -> Json<MetricsHistory> {
    Json(state.router().metrics().history())
}

/// Body of `POST /internal/dispatch`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub sender: UserId,
    /// Checked against the known event types before admission
    pub event_type: String,
    pub target: UserId,
    #[serde(default)]
    pub payload: Value,
}

/// Route an event on behalf of a business service
pub async fn dispatch_event(
    State(state): State<GatewayState>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DeliveryResult>, GatewayError> {
    let event_type: EventType = request.event_type.parse()?;
    let result = state
        .router()
        .dispatch(&request.sender, event_type, &request.target, request.payload)
        .await?;
    Ok(Json(result))
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ConnectionLimitExceeded { .. } => StatusCode::CONFLICT,
            Self::UnknownEventType(_) => StatusCode::BAD_REQUEST,
            Self::DeliveryTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Relay(_) => StatusCode::BAD_GATEWAY,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::TransportWriteFailure { .. } | Self::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = ErrorResponse::new(self.code(), self.to_string());
        if let Self::RateLimitExceeded { retry_after_ms, .. } = &self {
            body.details = Some(serde_json::json!({ "retryAfterMs": retry_after_ms }));
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_request_shape() {
        let request: DispatchRequest = serde_json::from_str(
            r#"{"sender":"u1","eventType":"notification","target":"u2","payload":{"n":1}}"#,
        )
        .unwrap();
        assert_eq!(request.event_type, "notification");
        assert_eq!(request.target, UserId::new("u2"));

        let request: DispatchRequest =
            serde_json::from_str(r#"{"sender":"u1","eventType":"typing-indicator","target":"u2"}"#).unwrap();
        assert_eq!(request.payload, Value::Null);
    }

    #[test]
    fn test_error_status_codes() {
        let response = GatewayError::RateLimitExceeded {
            event_type: EventType::MessageSend,
            retry_after_ms: 20,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = GatewayError::DeliveryTimeout { timeout_ms: 5000 }.into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response = GatewayError::from(courier_common::UnknownEventType("x1".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(
            GatewayError::ShuttingDown.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
