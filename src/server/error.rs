//! HTTP error type. Every failure renders as JSON `{message, code}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::cookies::CookieError;
use crate::kv::KvError;
use crate::oauth::OAuthError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not connected to Notion")]
    Unauthorized,
    #[error("authorization cancelled: {0}")]
    Cancelled(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("oauth: {0}")]
    OAuth(#[from] OAuthError),
    #[error("cookie: {0}")]
    Cookie(#[from] CookieError),
    #[error("store: {0}")]
    Store(#[from] KvError),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: u16,
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Cancelled(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::OAuth(OAuthError::MissingParentPage) => StatusCode::BAD_REQUEST,
            Error::OAuth(_) | Error::Cookie(_) | Error::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Details of server-side failures go to the log only.
            Error::OAuth(OAuthError::MissingParentPage) => self.to_string(),
            Error::OAuth(_) => {
                error!(err = ?self, "token exchange failed");
                "failed to obtain an access token from Notion".to_string()
            }
            Error::Cookie(_) | Error::Store(_) => {
                error!(err = ?self, "request failed");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };
        let body = ErrorBody {
            message,
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(Error::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::Cancelled("access_denied".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::OAuth(OAuthError::MissingToken).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::OAuth(OAuthError::MissingParentPage).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Cancelled("access_denied".into()).to_string(),
            "authorization cancelled: access_denied"
        );
    }
}
