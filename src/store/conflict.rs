use ulid::Ulid;

use crate::model::{At, ProviderSchedule};

use super::BookingError;

/// Commit-time slot guard. Fails if `instant` on this schedule is held by any
/// booking other than `exclude`.
pub fn check_slot_free(
    schedule: &ProviderSchedule,
    instant: At,
    exclude: Option<Ulid>,
) -> Result<(), BookingError> {
    match schedule.holder_at(instant) {
        Some(holder) if Some(holder) != exclude => Err(BookingError::SlotTaken {
            provider_id: schedule.provider_id,
            instant,
        }),
        _ => Ok(()),
    }
}

pub(crate) fn validate_label(label: &str) -> Result<(), BookingError> {
    use crate::limits::MAX_SERVICE_LABEL_LEN;
    if label.trim().is_empty() {
        return Err(BookingError::validation("service label must not be blank"));
    }
    if label.len() > MAX_SERVICE_LABEL_LEN {
        return Err(BookingError::LimitExceeded("service label too long"));
    }
    Ok(())
}
