use axum::{http::StatusCode, Json};
use serde::Serialize;

use crate::config::ConfigError;
use crate::db::DbError;
use crate::injector::InjectorError;
use crate::safe::SafeError;
use crate::token::TokenError;

/// Every failure a controller can surface, each bound to one HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// Developer error: the library was wired or called incorrectly.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Account blocked")]
    AccountBlocked,
    #[error("Account inactive")]
    AccountInactive,
    #[error("Account already exists")]
    AccountAlreadyExists,
    #[error("Internal error: {0}")]
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidArguments(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized
            | AppError::InvalidCredentials
            | AppError::InvalidToken
            | AppError::TokenExpired => StatusCode::UNAUTHORIZED,
            AppError::Forbidden | AppError::AccountBlocked | AppError::AccountInactive => {
                StatusCode::FORBIDDEN
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::AccountAlreadyExists => StatusCode::CONFLICT,
        }
    }

    /// Stable machine-readable code, also the key for localized messages.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidArguments(_) => "invalid_arguments",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::InvalidToken => "invalid_token",
            AppError::TokenExpired => "token_expired",
            AppError::AccountBlocked => "account_blocked",
            AppError::AccountInactive => "account_inactive",
            AppError::AccountAlreadyExists => "account_already_exists",
            AppError::InternalError(_) => "internal_error",
        }
    }

    /// Message sent to clients. Server-side details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::InvalidArguments(_) | AppError::InternalError(_) => {
                "Internal server error".to_string()
            }
            AppError::BadRequest(msg) | AppError::NotFound(msg) | AppError::Conflict(msg) => {
                msg.clone()
            }
            AppError::Unauthorized => "Authentication required".to_string(),
            AppError::Forbidden => "Access denied".to_string(),
            AppError::InvalidCredentials => "Invalid credentials".to_string(),
            AppError::InvalidToken => "Invalid token".to_string(),
            AppError::TokenExpired => "Token expired".to_string(),
            AppError::AccountBlocked => {
                "Account blocked due to too many failed attempts".to_string()
            }
            AppError::AccountInactive => "Account is not activated".to_string(),
            AppError::AccountAlreadyExists => {
                "An account with this identifier already exists".to_string()
            }
        }
    }

    /// Render the error, replacing the default message when a localized one is known.
    pub fn into_response_with(self, message: Option<String>) -> axum::response::Response {
        use axum::response::IntoResponse;

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: message.unwrap_or_else(|| self.public_message()),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.into_response_with(None)
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Duplicate(id) => {
                AppError::Conflict(format!("A document with _id '{id}' already exists"))
            }
            DbError::InvalidUpdate(reason) => {
                AppError::BadRequest(format!("Invalid update: {reason}"))
            }
            DbError::InvalidCollection(_) | DbError::MissingId | DbError::Unsupported(_) => {
                AppError::InvalidArguments(err.to_string())
            }
            DbError::Backend(_) => AppError::InternalError(err.to_string()),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AppError::TokenExpired,
            TokenError::Invalid(_) => AppError::InvalidToken,
            TokenError::Encoding(msg) => AppError::InternalError(msg),
        }
    }
}

impl From<SafeError> for AppError {
    fn from(err: SafeError) -> Self {
        AppError::InvalidArguments(err.to_string())
    }
}

impl From<InjectorError> for AppError {
    fn from(err: InjectorError) -> Self {
        AppError::InvalidArguments(err.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::InvalidArguments(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn test_config_error_is_developer_error() {
        let err: AppError = ConfigError {
            field: "auth.token_secret",
            reason: "must be set".to_string(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn test_unauthorized_status() {
        let response = AppError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_bad_request_status() {
        let response = AppError::BadRequest("test".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_conflict_status() {
        let response = AppError::Conflict("test".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_account_blocked_is_forbidden() {
        let response = AppError::AccountBlocked.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_token_kinds_are_distinct() {
        assert_eq!(AppError::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(AppError::TokenExpired.code(), AppError::InvalidToken.code());
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = AppError::InternalError("connection refused on 10.0.0.4".to_string());
        assert_eq!(err.public_message(), "Internal server error");
        let err = AppError::InvalidArguments("missing hook".to_string());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_duplicate_document_maps_to_conflict() {
        let err: AppError = DbError::Duplicate("abc".to_string()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_token_errors_map_to_kinds() {
        assert_eq!(AppError::from(TokenError::Expired), AppError::TokenExpired);
        assert_eq!(
            AppError::from(TokenError::Invalid("bad".to_string())),
            AppError::InvalidToken
        );
    }
}
