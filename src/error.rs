//! Error types shared by the discovery and check-in components.
//!
//! Component-local failures (geolocation, duplicate lookup) are folded into
//! component state; only [`VisitError`] travels up to the submission flow.
//! Cancellation is modelled explicitly so it can be filtered out before
//! anything user-visible happens.

use thiserror::Error;

/// Failure modes of the platform position service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("timed out waiting for a position fix")]
    Timeout,
    #[error("geolocation is not supported on this device")]
    Unsupported,
}

impl PositionError {
    /// Banner text shown to the user. These banners persist until an
    /// explicit refetch.
    pub fn user_message(&self) -> String {
        match self {
            PositionError::PermissionDenied => {
                "Location access was denied. Enable it in settings and tap refresh.".to_string()
            }
            PositionError::Unavailable(_) => {
                "Your position is unavailable right now. Tap refresh to try again.".to_string()
            }
            PositionError::Timeout => {
                "Finding your location took too long. Tap refresh to try again.".to_string()
            }
            PositionError::Unsupported => {
                "This device cannot report its location.".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("search service returned status {0}")]
    Status(u16),
    #[error("could not decode search response: {0}")]
    Decode(String),
    #[error("request was cancelled")]
    Cancelled,
}

impl SearchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchError::Cancelled)
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SearchError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            SearchError::Status(status.as_u16())
        } else {
            SearchError::Network(e.to_string())
        }
    }
}

/// Errors from the visit lookup used by duplicate detection. Never shown
/// to the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LookupError {
    #[error("network error: {0}")]
    Network(String),
    #[error("lookup service returned status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for LookupError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => LookupError::Status(status.as_u16()),
            None => LookupError::Network(e.to_string()),
        }
    }
}

/// Outcome of a rejected visit submission.
///
/// Distance mismatch is kept apart from generic field errors so the form can
/// explain the 1 km rule instead of printing a bare validation message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VisitError {
    #[error("{0}")]
    DistanceMismatch(String),
    #[error("{field}: {message}")]
    RatingRange { field: String, message: String },
    #[error("{0}")]
    DuplicateVisit(String),
    #[error("{field}: {message}")]
    Field { field: String, message: String },
    #[error("location unavailable: a check-in position is required to log a visit")]
    LocationUnavailable,
    #[error("network error: {0}")]
    Network(String),
    #[error("submission was cancelled")]
    Cancelled,
}

impl VisitError {
    /// Field the message belongs to, if it is field-scoped.
    pub fn field(&self) -> Option<&str> {
        match self {
            VisitError::DistanceMismatch(_) | VisitError::LocationUnavailable => {
                Some("check_in")
            }
            VisitError::RatingRange { field, .. } | VisitError::Field { field, .. } => Some(field),
            VisitError::DuplicateVisit(_) => Some("visit_date"),
            VisitError::Network(_) | VisitError::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, VisitError::Cancelled)
    }
}

impl From<reqwest::Error> for VisitError {
    fn from(e: reqwest::Error) -> Self {
        VisitError::Network(e.to_string())
    }
}
