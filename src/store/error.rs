use ulid::Ulid;

use crate::model::At;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Malformed identity reference, unparsable instant, bad label, role mismatch.
    Validation(String),
    LimitExceeded(&'static str),
    SlotTaken {
        provider_id: Ulid,
        instant: At,
    },
    NotFound(String),
    Forbidden,
    Storage(String),
}

impl BookingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        BookingError::Validation(msg.into())
    }

    /// Stable error code handed to external callers.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Validation(_) | BookingError::LimitExceeded(_) => "validation",
            BookingError::SlotTaken { .. } => "slot_taken",
            BookingError::NotFound(_) => "not_found",
            BookingError::Forbidden => "forbidden",
            BookingError::Storage(_) => "server_fault",
        }
    }

    /// Only storage faults are worth retrying with identical input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::Storage(_))
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Validation(msg) => write!(f, "invalid request: {msg}"),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::SlotTaken {
                provider_id,
                instant,
            } => write!(
                f,
                "slot taken: provider {provider_id} is already booked at {}",
                instant.to_rfc3339()
            ),
            BookingError::NotFound(id) => write!(f, "booking not found: {id}"),
            BookingError::Forbidden => write!(f, "not permitted to act on this booking"),
            BookingError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn kinds_are_stable() {
        assert_eq!(BookingError::validation("x").kind(), "validation");
        assert_eq!(BookingError::LimitExceeded("x").kind(), "validation");
        assert_eq!(BookingError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(BookingError::Forbidden.kind(), "forbidden");
        assert_eq!(BookingError::Storage("disk".into()).kind(), "server_fault");
    }

    #[test]
    fn only_storage_is_retryable() {
        assert!(BookingError::Storage("disk".into()).is_retryable());
        assert!(!BookingError::Forbidden.is_retryable());
        let taken = BookingError::SlotTaken {
            provider_id: Ulid::new(),
            instant: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
        };
        assert!(!taken.is_retryable());
        assert!(taken.to_string().contains("2024-06-01T10:00:00+00:00"));
    }
}
