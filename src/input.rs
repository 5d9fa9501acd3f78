//! Caller-supplied shapes and their validation.
//!
//! Everything arriving from outside is text. It becomes typed (`Ulid`, UTC
//! instants) here, and any bad shape maps to `BookingError::Validation`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use ulid::Ulid;

use crate::model::{At, BookingChange, NewBooking};
use crate::store::BookingError;

/// Accepted forms without an offset; these are read as UTC. Seconds may be
/// left out, as `datetime-local` form inputs do.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Minute-precision forms carrying a numeric offset (`+02:00`, `-0300`).
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M%#z", "%Y-%m-%d %H:%M%#z"];

/// Parse an instant and normalize it to UTC.
///
/// RFC 3339 with an offset is the canonical form. A trailing `Z` or a
/// missing offset both mean UTC, and seconds are optional throughout.
pub fn parse_instant(text: &str) -> Result<At, BookingError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    let naive = text
        .strip_suffix('Z')
        .or_else(|| text.strip_suffix('z'))
        .unwrap_or(text);
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }
    Err(BookingError::validation(format!("unparsable instant: {text:?}")))
}

/// Parse an identity reference. `what` names the field in the error.
pub fn parse_identity(text: &str, what: &str) -> Result<Ulid, BookingError> {
    Ulid::from_string(text.trim())
        .map_err(|_| BookingError::validation(format!("malformed {what} id: {text:?}")))
}

/// A malformed booking id cannot name an existing booking.
pub fn parse_booking_id(text: &str) -> Result<Ulid, BookingError> {
    Ulid::from_string(text.trim()).map_err(|_| BookingError::NotFound(text.to_string()))
}

/// Decode a JSON body into `T`, reporting shape errors as validation failures.
pub fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, BookingError> {
    serde_json::from_str(text).map_err(|e| BookingError::validation(e.to_string()))
}

/// Body of a create request. The client is the acting identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateBooking {
    pub provider_id: String,
    pub instant: String,
    pub service_label: String,
}

impl CreateBooking {
    pub fn validate(&self, client_id: Ulid) -> Result<NewBooking, BookingError> {
        Ok(NewBooking {
            client_id,
            provider_id: parse_identity(&self.provider_id, "provider")?,
            instant: parse_instant(&self.instant)?,
            service_label: self.service_label.trim().to_string(),
        })
    }
}

/// Body of an update request. Absent fields stay as they are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookingPatch {
    #[serde(default)]
    pub instant: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub service_label: Option<String>,
}

impl BookingPatch {
    pub fn validate(&self) -> Result<BookingChange, BookingError> {
        Ok(BookingChange {
            instant: self.instant.as_deref().map(parse_instant).transpose()?,
            provider_id: self
                .provider_id
                .as_deref()
                .map(|p| parse_identity(p, "provider"))
                .transpose()?,
            service_label: self.service_label.as_ref().map(|l| l.trim().to_string()),
        })
    }
}
