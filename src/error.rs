//! Centralized error handling for the media endpoints and Sentry reporting.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;

pub const UPLOAD_FAILED: &str = "Could not upload the file. Please try again!";
pub const EDIT_FAILED: &str = "Could not update the file. Please try again!";
pub const VIEW_FAILED: &str = "Could not load the upload form. Please try again!";
pub const PERMISSION_LOOKUP_FAILED: &str = "Could not verify your permissions. Please try again!";

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub fn hash_pii(data: &str) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Error category determines whether an error should be reported to Sentry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Actual failures that need investigation - ALWAYS report to Sentry
    Bug,
    /// Expected failures (permissions, validation, not found) - breadcrumb only
    Expected,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("permission denied")]
    PermissionDenied,

    /// A required field is missing or malformed. The message is shown to the user.
    #[error("{0}")]
    Validation(String),

    /// The referenced session or record does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The store or the media directory rejected a write or read.
    /// Only `message` leaves the server.
    #[error("[{operation}] {message}: {source}")]
    Persistence {
        operation: &'static str,
        message: &'static str,
        #[source]
        source: BoxError,
    },

    /// The deployment is missing something the request needs (e.g. media path).
    #[error("{0}")]
    Configuration(String),

    #[error("Unknown action")]
    UnknownAction,
}

impl MediaError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn persistence(
        operation: &'static str,
        message: &'static str,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Persistence {
            operation,
            message,
            source: source.into(),
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::UnknownAction => StatusCode::BAD_REQUEST,
            Self::Validation(_)
            | Self::NotFound(_)
            | Self::Persistence { .. }
            | Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Persistence { .. } | Self::Configuration(_) => ErrorCategory::Bug,
            _ => ErrorCategory::Expected,
        }
    }

    /// The sanitized message returned to the caller.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Persistence { message, .. } => (*message).to_string(),
            other => other.to_string(),
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            Self::Persistence { operation, .. } => *operation,
            Self::PermissionDenied => "permission",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Configuration(_) => "configuration",
            Self::UnknownAction => "dispatch",
        }
    }

    /// Report this error to Sentry if appropriate
    pub fn report_to_sentry(&self) {
        match self.category() {
            ErrorCategory::Bug => {
                tracing::error!(operation = self.operation(), error = %self, "media request failed");
                sentry::with_scope(
                    |scope| {
                        scope.set_fingerprint(Some(&[self.operation(), self.status().as_str()]));
                        scope.set_tag("operation", self.operation());
                        scope.set_tag("error_category", "bug");
                    },
                    || {
                        sentry::capture_message(
                            &format!("[{}] {} - {}", self.operation(), self.status(), self),
                            sentry::Level::Error,
                        );
                    },
                );
            }
            ErrorCategory::Expected => {
                tracing::debug!(operation = self.operation(), error = %self, "media request rejected");
                sentry::add_breadcrumb(sentry::Breadcrumb {
                    category: Some("expected_error".into()),
                    message: Some(format!(
                        "[{}] {} - {}",
                        self.operation(),
                        self.status(),
                        self.user_message()
                    )),
                    level: sentry::Level::Info,
                    ..Default::default()
                });
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

impl IntoResponse for MediaError {
    fn into_response(self) -> Response {
        self.report_to_sentry();

        // Permission failures carry no body.
        if matches!(self, Self::PermissionDenied) {
            return self.status().into_response();
        }

        let body = Json(ErrorResponse {
            message: self.user_message(),
        });
        (self.status(), body).into_response()
    }
}
