use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use depot_core::DepotError;
use serde_json::json;
use std::time::Duration;

#[derive(Debug)]
pub struct ApiError {
    code: &'static str,
    message: String,
    status: StatusCode,
    retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(code: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn unauthorized() -> Self {
        Self::new("Unauthorized", StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("Forbidden", StatusCode::FORBIDDEN, message)
    }

    /// 限流响应，附带剩余封禁时间。
    pub fn too_many_requests(remaining: Duration) -> Self {
        let message = if remaining.is_zero() {
            "too many concurrent requests, slow down".to_string()
        } else {
            format!("too many requests, try again in {}", describe_remaining(remaining))
        };
        Self {
            retry_after: Some(remaining),
            ..Self::new("TooManyRequests", StatusCode::TOO_MANY_REQUESTS, message)
        }
    }
}

/// 人类可读的剩余时间。
fn describe_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    match secs {
        0 => format!("{} ms", remaining.as_millis().max(1)),
        1 => "1 second".to_string(),
        2..=119 => format!("{secs} seconds"),
        _ => format!("{} minutes", secs.div_ceil(60)),
    }
}

impl From<DepotError> for ApiError {
    fn from(err: DepotError) -> Self {
        match err {
            DepotError::NotFound(name) => {
                ApiError::new("NotFound", StatusCode::NOT_FOUND, format!("{name} not found"))
            }
            DepotError::InvalidName(name) => ApiError::new(
                "InvalidName",
                StatusCode::BAD_REQUEST,
                format!("invalid artifact name: {name}"),
            ),
            DepotError::InvalidSchedule(msg) => {
                ApiError::new("InvalidSchedule", StatusCode::BAD_REQUEST, msg)
            }
            DepotError::Io(e) => {
                ApiError::new("IoError", StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            DepotError::Serde(e) => {
                ApiError::new("SerdeError", StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            DepotError::Other(msg) => {
                ApiError::new("Error", StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.code,
            "message": self.message,
        }));
        let mut response = (self.status, body).into_response();
        if let Some(remaining) = self.retry_after {
            // Retry-After 以整秒计，至少 1 秒
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
