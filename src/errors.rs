use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Needs username and password")]
    InvalidCredentials,

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("SSO Login: State parameter missing")]
    MissingState,

    #[error("SSO Login is not enabled")]
    SsoDisabled,

    /// The identity provider (or endpoint) rejected a grant. `message` is safe to
    /// show to a user, `raw` is the upstream body as received.
    #[error("{message}")]
    UpstreamAuth {
        status: StatusCode,
        message: String,
        raw: String,
    },

    #[error("{0}")]
    SessionInvalid(String),

    #[error("Could not find correct session value")]
    Unauthenticated,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("Requested endpoint not registered")]
    EndpointNotFound(String),

    #[error("Endpoint connection not supported")]
    UnsupportedEndpointType(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("Could not connect to the endpoint: {0}")]
    ConnectFailed(String),

    #[error("Could not connect to the endpoint: {0}")]
    ValidationFailed(String),

    #[error("Endpoint is not connected")]
    NotConnected(String),

    #[error("XSRF token mismatch")]
    XsrfMismatch,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials
            | AppError::MissingState
            | AppError::Unauthenticated
            | AppError::PermissionDenied(_)
            | AppError::NotConnected(_) => StatusCode::UNAUTHORIZED,
            AppError::MissingParameter(_)
            | AppError::EndpointNotFound(_)
            | AppError::UnsupportedEndpointType(_)
            | AppError::ConnectFailed(_)
            | AppError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::SsoDisabled => StatusCode::NOT_FOUND,
            AppError::UpstreamAuth { status, .. } => *status,
            AppError::SessionInvalid(_) | AppError::MalformedToken(_) | AppError::XsrfMismatch => {
                StatusCode::FORBIDDEN
            }
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text that may be shown to an end user, e.g. inside an SSO redirect.
    /// Never contains upstream bodies or internal detail.
    pub fn user_message(&self) -> String {
        match self {
            AppError::UpstreamAuth { message, .. } => message.clone(),
            AppError::Database(_) | AppError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Same error, reported with a different HTTP status.
    pub fn with_status(self, new_status: StatusCode) -> Self {
        match self {
            AppError::UpstreamAuth { message, raw, .. } => AppError::UpstreamAuth {
                status: new_status,
                message,
                raw,
            },
            other => other,
        }
    }

    fn kind(&self) -> (&'static str, &'static str) {
        match self {
            AppError::InvalidCredentials => ("authentication_error", "invalid_credentials"),
            AppError::MissingParameter(_) => ("invalid_request_error", "missing_parameter"),
            AppError::MissingState => ("invalid_request_error", "missing_state"),
            AppError::SsoDisabled => ("not_found_error", "sso_disabled"),
            AppError::UpstreamAuth { .. } => ("upstream_error", "upstream_auth_failed"),
            AppError::SessionInvalid(_) => ("authentication_error", "session_invalid"),
            AppError::Unauthenticated => ("authentication_error", "unauthenticated"),
            AppError::MalformedToken(_) => ("authentication_error", "malformed_token"),
            AppError::EndpointNotFound(_) => ("invalid_request_error", "endpoint_not_found"),
            AppError::UnsupportedEndpointType(_) => {
                ("invalid_request_error", "unsupported_endpoint_type")
            }
            AppError::PermissionDenied(_) => ("permission_error", "permission_denied"),
            AppError::ConnectFailed(_) => ("upstream_error", "connect_failed"),
            AppError::ValidationFailed(_) => ("upstream_error", "validation_failed"),
            AppError::NotConnected(_) => ("authentication_error", "not_connected"),
            AppError::XsrfMismatch => ("permission_error", "xsrf_mismatch"),
            AppError::Database(_) | AppError::Internal(_) => {
                ("internal_error", "internal_server_error")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, code) = self.kind();

        match &self {
            AppError::Database(e) => tracing::error!("Database error: {}", e),
            AppError::Internal(e) => tracing::error!("Internal error: {:#}", e),
            AppError::UpstreamAuth { status, raw, .. } => {
                tracing::warn!(status = %status, "upstream auth failure: {}", raw)
            }
            _ => {}
        }

        let mut error = json!({
            "message": self.user_message(),
            "type": error_type,
            "code": code,
        });

        // Direct API callers get the upstream body; SSO flows only see user_message().
        if let AppError::UpstreamAuth { raw, .. } = &self {
            if !raw.is_empty() {
                error["upstream"] = serde_json::from_str(raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            }
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}
