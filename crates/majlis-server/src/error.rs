use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use majlis_core::{EconomyError, ErrorKind};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Economy(#[from] EconomyError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Economy(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
                ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_economy_kinds_map_to_status() {
        let cases = [
            (EconomyError::SeatOccupied(1), StatusCode::CONFLICT),
            (EconomyError::SeatLocked(1), StatusCode::FORBIDDEN),
            (EconomyError::InvalidAmount(0), StatusCode::BAD_REQUEST),
            (
                EconomyError::InsufficientWealth {
                    available: 0,
                    required: 1,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                EconomyError::UserNotFound("u".into()),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status(), status);
        }
    }
}
