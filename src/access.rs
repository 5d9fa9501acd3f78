//! Who may see or touch a booking.
//!
//! Policy: either party of a booking (its client or its provider) may read,
//! update, or delete it. Nobody else may. A missing booking is reported as
//! not-found before this guard runs.

use ulid::Ulid;

use crate::model::{Booking, Role};
use crate::store::BookingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Update,
    Delete,
}

pub fn authorize(actor: Ulid, booking: &Booking, op: Operation) -> Result<(), BookingError> {
    if booking.involves(actor) {
        return Ok(());
    }
    tracing::debug!("{actor} denied {op:?} on booking {}", booking.id);
    Err(BookingError::Forbidden)
}

/// Listing visibility: the actor sees a booking only through the field its role selects.
pub fn visible_in_listing(actor: Ulid, role: Role, booking: &Booking) -> bool {
    booking.party(role) == actor
}
