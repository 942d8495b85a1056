//! Centralized error types for the Audio Session Protocol core library.
//!
//! This module provides a unified error handling system that:
//! - Defines the §7 error taxonomy using `thiserror`
//! - Tags each error with a machine-readable code and handling locality
//! - Implements `IntoResponse` so transport-layer handlers can surface
//!   errors as ASP `error` control messages or HTTP error bodies uniformly

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Where an error's blast radius stops, per the §7 error handling table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLocality {
    /// Only the in-flight Response is affected; the Session survives.
    Response,
    /// The whole Session is closed.
    Session,
}

/// Application-wide error type for the ASP core and its two endpoints.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "kind", content = "details")]
pub enum AspError {
    /// Bad sequence, unknown message type, or a frame for a closed stream.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An audio frame doesn't match the session's negotiated codec.
    #[error("codec mismatch: {0}")]
    CodecMismatch(String),

    /// A payload length is not a multiple of the codec's sample size.
    #[error("frame misaligned: {0}")]
    FrameMisaligned(String),

    /// An unsupported encoding or sample rate was requested.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// The peer could not keep up with the outbound frame rate.
    #[error("backpressure: {0}")]
    Backpressure(String),

    /// A provider (STT/LLM/TTS) failed or was unavailable.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A language the provider does not support was requested.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// A timer (`starting`, `processing`, `idle`, provider deadline) elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The transport connection dropped.
    #[error("transport loss: {0}")]
    TransportLoss(String),

    /// Session or provider configuration failed validation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Anything else that should close the Session and be dumped for post-mortem.
    #[error("internal error: {0}")]
    Internal(String),

    /// `audio.end` closed an utterance with zero speech frames.
    #[error("empty utterance: {0}")]
    EmptyUtterance(String),
}

impl AspError {
    /// Machine-readable error code, carried on the wire in `error` control messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::CodecMismatch(_) => "codec_mismatch",
            Self::FrameMisaligned(_) => "frame_misaligned",
            Self::InvalidEncoding(_) => "invalid_encoding",
            Self::Backpressure(_) => "backpressure",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::UnsupportedLanguage(_) => "unsupported_language",
            Self::Timeout(_) => "timeout",
            Self::TransportLoss(_) => "transport_loss",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
            Self::EmptyUtterance(_) => "empty_utterance",
        }
    }

    /// Which scope (§7) this error's handling action applies to.
    pub fn locality(&self) -> ErrorLocality {
        match self {
            Self::Backpressure(_)
            | Self::ProviderUnavailable(_)
            | Self::UnsupportedLanguage(_)
            | Self::EmptyUtterance(_) => ErrorLocality::Response,
            _ => ErrorLocality::Session,
        }
    }

    /// Maps the error to an HTTP status for non-ASP (REST) surfaces.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::FrameMisaligned(_) | Self::InvalidEncoding(_) | Self::ProtocolViolation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type AspResult<T> = Result<T, AspError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for AspError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
