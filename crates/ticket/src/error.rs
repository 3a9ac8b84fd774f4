use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug)]
pub enum TicketError {
    UpstreamTimeout,
    UpstreamHttp(u16),
    UpstreamInvalid(String),
    UpstreamTransport(String),
}

impl std::fmt::Display for TicketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketError::UpstreamTimeout => write!(f, "ticket service timeout"),
            TicketError::UpstreamHttp(status) => write!(f, "ticket service error ({status})"),
            TicketError::UpstreamInvalid(msg) => write!(f, "ticket service invalid response: {msg}"),
            TicketError::UpstreamTransport(msg) => write!(f, "ticket proxy failed: {msg}"),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for TicketError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            TicketError::UpstreamTimeout => (StatusCode::GATEWAY_TIMEOUT, "ticket service timeout"),
            TicketError::UpstreamHttp(_) => (StatusCode::BAD_GATEWAY, "ticket service error"),
            TicketError::UpstreamInvalid(_) => {
                (StatusCode::BAD_GATEWAY, "ticket service invalid response")
            }
            TicketError::UpstreamTransport(_) => (StatusCode::BAD_GATEWAY, "ticket proxy failed"),
        };
        let body = ErrorResponse {
            detail: detail.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for TicketError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TicketError::UpstreamTimeout
        } else if let Some(status) = err.status() {
            TicketError::UpstreamHttp(status.as_u16())
        } else {
            TicketError::UpstreamTransport(err.to_string())
        }
    }
}
