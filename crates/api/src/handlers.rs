use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use payment::PaymentRequest;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::models::SessionStatus;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::qr;
use crate::AppState;

// Request types
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    pub callback_uri: String,
}

// Response types
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePaymentResponse {
    pub success: bool,
    pub id: Uuid,
    pub amount: Decimal,
    pub address: String,
    /// Base64 PNG of `qr_payload`
    pub qrcode: String,
    pub qr_payload: String,
    /// Unix seconds
    pub expires: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentStatusResponse {
    pub success: bool,
    pub id: Uuid,
    pub address: String,
    pub amount: Decimal,
    pub status: SessionStatus,
    pub expires: i64,
    pub swept: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Create a payment session and hand back the address to pay.
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<CreatePaymentResponse>> {
    if !is_json(&headers) {
        return Err(ApiError::NotJson("content type is not application/json".to_string()));
    }
    let request: CreatePaymentRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!("Rejected payment body: {}", e);
        ApiError::NotJson(e.to_string())
    })?;

    let ticket = state
        .payments
        .start(PaymentRequest {
            amount: request.amount,
            callback_uri: request.callback_uri,
        })
        .await?;

    let qr_payload = qr::payment_uri(&ticket.address, ticket.amount);
    let qrcode = qr::encode_png_base64(&qr_payload)?;

    Ok(Json(CreatePaymentResponse {
        success: true,
        id: ticket.id,
        amount: ticket.amount,
        address: ticket.address,
        qrcode,
        qr_payload,
        expires: ticket.expires_at.timestamp(),
    }))
}

/// Current snapshot of a payment session.
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PaymentStatusResponse>> {
    let session = state
        .payments
        .session(&id)
        .ok_or_else(|| ApiError::NotFound(format!("payment {}", id)))?;

    Ok(Json(PaymentStatusResponse {
        success: true,
        id: session.id,
        amount: session.desired_sol(),
        address: session.disposable_address,
        status: session.status,
        expires: session.expires_at.timestamp(),
        swept: session.swept,
        failure_reason: session.failure_reason,
    }))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active_sessions = state.payments.active_sessions();

    let (status, ledger) = match state.ledger.latest_blockhash().await {
        Ok(_) => (StatusCode::OK, "healthy"),
        Err(e) => {
            warn!("Health check failed to reach the ledger: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unreachable")
        }
    };

    (
        status,
        Json(serde_json::json!({
            "status": if status.is_success() { "healthy" } else { "unhealthy" },
            "ledger": ledger,
            "active_sessions": active_sessions,
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_json_content_type_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(is_json(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("Application/JSON; charset=utf-8"),
        );
        assert!(is_json(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(!is_json(&headers));
    }
}
