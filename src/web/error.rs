use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::db::executor::ExecutionError;
use crate::db::registry::RegistryError;
use crate::db::introspect::IntrospectionError;
use crate::history::filter::FilterError;
use crate::history::HistoryError;
use crate::llm::TranslationError;
use crate::schema::SchemaError;

/// Error body returned by every endpoint: `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
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

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SchemaError> for ApiError {
    fn from(err: SchemaError) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
    }
}

impl From<TranslationError> for ApiError {
    fn from(err: TranslationError) -> Self {
        let status = match err {
            TranslationError::EmptyResponse => StatusCode::BAD_GATEWAY,
            TranslationError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TranslationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TranslationError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// The user's own SQL failed; the database message is passed on verbatim.
impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        let status = match err {
            ExecutionError::SyntaxError(_) | ExecutionError::Statement(_) => StatusCode::BAD_REQUEST,
            ExecutionError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ExecutionError::ConnectionLost(_) => StatusCode::SERVICE_UNAVAILABLE,
            ExecutionError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        Self::new(status, err.to_string())
    }
}

impl From<IntrospectionError> for ApiError {
    fn from(err: IntrospectionError) -> Self {
        match err {
            IntrospectionError::Database(e) => e.into(),
            IntrospectionError::Schema(e) => e.into(),
        }
    }
}

/// Only reachable from the history endpoints themselves; recording
/// failures never get this far.
impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match err {
            RegistryError::InvalidName(_) => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::AlreadyExists(_) | RegistryError::InUse(_) => StatusCode::CONFLICT,
            RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// Malformed bodies keep axum's status (400, 415 or 422) but get the JSON error body.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn maps_translation_failures() {
        assert_eq!(
            ApiError::from(TranslationError::EmptyResponse).status,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(TranslationError::BackendUnavailable("down".into())).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(TranslationError::Timeout(Duration::from_secs(1))).status,
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn execution_messages_are_verbatim() {
        let err = ApiError::from(ExecutionError::SyntaxError("Parser Error: near SELEC".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Parser Error: near SELEC");
        assert_eq!(
            ApiError::from(ExecutionError::PermissionDenied("read-only".into())).status,
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn maps_registry_failures() {
        assert_eq!(
            ApiError::from(RegistryError::NotFound("sales".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RegistryError::InUse("sales".into())).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(RegistryError::InvalidName("a b".into())).status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn schema_errors_are_unprocessable() {
        let err = ApiError::from(IntrospectionError::Schema(SchemaError::EmptyName));
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
