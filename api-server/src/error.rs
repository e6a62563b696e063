//! HTTP error mapping

use agent_exchange_contracts::ExchangeError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Wrapper turning the exchange error taxonomy into HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub ExchangeError);

impl From<ExchangeError> for ApiError {
    fn from(error: ExchangeError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.to_string(),
                "retryable": self.0.retryable(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_maps_to_429() {
        let response = ApiError(ExchangeError::QuotaExceeded {
            tenant_id: "t".to_string(),
            limit: "max_pending".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn not_found_maps_to_404() {
        let response = ApiError(ExchangeError::JobNotFound {
            job_id: "x".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
