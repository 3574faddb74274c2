//! ---
//! mhe_section: "05-networking-external-interfaces"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Mapping of lifecycle failures onto HTTP responses."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mhe_lifecycle::{ErrorKind, LifecycleError};
use tracing::error;

use crate::translate::TranslateError;
use crate::wire::ErrorResponse;

const BASIC_CHALLENGE: &str = "Basic realm=\"mhe-gateway\"";

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::IncompatibleVersion => StatusCode::CONFLICT,
        ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
        ErrorKind::MigrationFailed | ErrorKind::InfrastructureError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        Self::new(status_for(err.kind()), err.to_string())
    }
}

impl From<TranslateError> for ApiError {
    fn from(err: TranslateError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "api request failed");
        }
        let mut response = (
            self.status,
            Json(ErrorResponse {
                message: self.message,
            }),
        )
            .into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(BASIC_CHALLENGE),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mhe_lifecycle::{InfraError, MigrationError};

    #[test]
    fn lifecycle_errors_map_to_statuses() {
        let cases = [
            (LifecycleError::NotFound("vm-9".into()), StatusCode::NOT_FOUND),
            (LifecycleError::Conflict("busy".into()), StatusCode::CONFLICT),
            (
                LifecycleError::ValidationFailed("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                LifecycleError::MigrationFailed(MigrationError::Gap { from: 1, current: 3 }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                LifecycleError::IncompatibleVersion {
                    local: "v1.0.0-1-a".into(),
                    entity: "v2.0.0-1-a".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                LifecycleError::from_infra("delete", InfraError::Remote("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                LifecycleError::NotImplemented("debug".into()),
                StatusCode::NOT_IMPLEMENTED,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn unauthorized_carries_challenge() {
        let response = ApiError::unauthorized("credentials required").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            BASIC_CHALLENGE
        );
    }
}
