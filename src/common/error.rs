use reqwest::StatusCode;
use serde::Serialize;
use std::fmt;
use tracing::error;

pub type ServiceResult<T> = Result<T, AppError>;

#[track_caller]
pub fn unexpected<T, E: Into<anyhow::Error>>(e: E) -> ServiceResult<T> {
    let caller = std::panic::Location::caller();
    error!("An unexpected error has occurred at {caller}: {}", e.into());
    Err(AppError::Unexpected)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    Unexpected,

    MessagesNotFound,
    /// The message exists but is not in the status the operation requires.
    MessagesInvalidState,
    MessagesEmptyText,
    MessagesTooLong,
    MessagesMissingFinalText,

    SchedulesNotFound,
    SchedulesNotPending,

    TonesUnknown,
    TonesCatalogEmpty,
    TonesGenerationUnavailable,
    TonesGenerationRejected,
    TonesGenerationTimedOut,
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    #[track_caller]
    fn from(e: E) -> Self {
        unexpected::<(), E>(e).unwrap_err()
    }
}

impl AppError {
    pub const fn code(&self) -> &'static str {
        match self {
            AppError::Unexpected => "unexpected",

            AppError::MessagesNotFound => "messages.not_found",
            AppError::MessagesInvalidState => "messages.invalid_state",
            AppError::MessagesEmptyText => "messages.empty_text",
            AppError::MessagesTooLong => "messages.too_long",
            AppError::MessagesMissingFinalText => "messages.missing_final_text",

            AppError::SchedulesNotFound => "schedules.not_found",
            AppError::SchedulesNotPending => "schedules.not_pending",

            AppError::TonesUnknown => "tones.unknown",
            AppError::TonesCatalogEmpty => "tones.catalog_empty",
            AppError::TonesGenerationUnavailable => "tones.generation_unavailable",
            AppError::TonesGenerationRejected => "tones.generation_rejected",
            AppError::TonesGenerationTimedOut => "tones.generation_timed_out",
        }
    }

    pub const fn message(&self) -> &'static str {
        match self {
            AppError::Unexpected => "An unexpected error has occurred.",

            AppError::MessagesNotFound => "The message could not be found.",
            AppError::MessagesInvalidState => {
                "The message is not in a state that allows this action."
            }
            AppError::MessagesEmptyText => "Please enter a message.",
            AppError::MessagesTooLong => "Your message is too long (max 1000 characters).",
            AppError::MessagesMissingFinalText => {
                "Choose the text to send before scheduling or sending the message."
            }

            AppError::SchedulesNotFound => "The schedule could not be found.",
            AppError::SchedulesNotPending => {
                "Only schedules that have not been sent yet can be changed."
            }

            AppError::TonesUnknown => "The selected tone is not available.",
            AppError::TonesCatalogEmpty => "No tones are configured.",
            AppError::TonesGenerationUnavailable => {
                "Tone generation is temporarily unavailable. Please try again."
            }
            AppError::TonesGenerationRejected => "The message could not be rephrased.",
            AppError::TonesGenerationTimedOut => {
                "Tone generation took too long. Please try again."
            }
        }
    }

    pub const fn http_status_code(&self) -> StatusCode {
        match self {
            AppError::MessagesEmptyText
            | AppError::MessagesTooLong
            | AppError::MessagesMissingFinalText
            | AppError::TonesUnknown => StatusCode::BAD_REQUEST,

            AppError::MessagesNotFound | AppError::SchedulesNotFound => StatusCode::NOT_FOUND,

            AppError::MessagesInvalidState | AppError::SchedulesNotPending => {
                StatusCode::CONFLICT
            }

            AppError::TonesGenerationRejected => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TonesGenerationUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::TonesGenerationTimedOut => StatusCode::GATEWAY_TIMEOUT,

            AppError::Unexpected | AppError::TonesCatalogEmpty => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TonesGenerationUnavailable | AppError::TonesGenerationTimedOut
        )
    }

    pub const fn response_parts(&self) -> (StatusCode, ErrorResponse) {
        let status = self.http_status_code();
        let response = ErrorResponse {
            code: self.code(),
            message: self.message(),
        };
        (status, response)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_collapse_to_unexpected() {
        let err: AppError = std::io::Error::other("disk on fire").into();
        assert_eq!(err, AppError::Unexpected);
        assert_eq!(err.http_status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn state_conflicts_are_reported_as_conflict() {
        let (status, body) = AppError::SchedulesNotPending.response_parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.code, "schedules.not_pending");
        assert!(!AppError::SchedulesNotPending.is_retryable());
        assert!(AppError::TonesGenerationUnavailable.is_retryable());
    }

    #[test]
    fn every_error_has_its_own_code() {
        let all = [
            AppError::Unexpected,
            AppError::MessagesNotFound,
            AppError::MessagesInvalidState,
            AppError::MessagesEmptyText,
            AppError::MessagesTooLong,
            AppError::MessagesMissingFinalText,
            AppError::SchedulesNotFound,
            AppError::SchedulesNotPending,
            AppError::TonesUnknown,
            AppError::TonesCatalogEmpty,
            AppError::TonesGenerationUnavailable,
            AppError::TonesGenerationRejected,
            AppError::TonesGenerationTimedOut,
        ];
        let codes: std::collections::HashSet<_> = all.iter().map(AppError::code).collect();
        assert_eq!(codes.len(), all.len());
        assert!(all.iter().all(|e| !e.message().is_empty()));
    }
}
