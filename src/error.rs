use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("{0} is currently out of stock")]
    ItemUnavailable(String),

    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error("Missing or invalid user identity")]
    Unauthorized,

    #[error("Not found")]
    RecordNotFound,

    #[error("Failed to authenticate with M-Pesa: {0}")]
    AuthError(String),

    #[error("M-Pesa unreachable: {0}")]
    GatewayUnreachable(String),

    #[error("Payment request rejected: {0}")]
    GatewayRejected(String),

    #[error("Malformed callback payload")]
    MalformedCallback,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // External-dependency failures carry detail we keep server-side only.
        let (status, message) = match &self {
            AppError::EmptyCart => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::ItemUnavailable(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::InvalidQuantity => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::RecordNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::AuthError(detail) | AppError::GatewayUnreachable(detail) => {
                warn!("Gateway failure: {detail}");
                (
                    StatusCode::BAD_GATEWAY,
                    "Failed to initiate payment. Please try again.".to_string(),
                )
            }
            AppError::GatewayRejected(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::MalformedCallback => (StatusCode::BAD_REQUEST, self.to_string()),
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}
