use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Instants are always stored normalized to UTC.
pub type At = DateTime<Utc>;

/// Which side of a booking an identity sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Provider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Provider => "provider",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single fixed-instant appointment between a client and a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub client_id: Ulid,
    pub provider_id: Ulid,
    pub instant: At,
    pub service_label: String,
    pub created_at: At,
}

impl Booking {
    /// True if `identity` is either party of the booking.
    pub fn involves(&self, identity: Ulid) -> bool {
        self.client_id == identity || self.provider_id == identity
    }

    /// The identity referenced in the field `role` selects.
    pub fn party(&self, role: Role) -> Ulid {
        match role {
            Role::Client => self.client_id,
            Role::Provider => self.provider_id,
        }
    }
}

/// Fields of a booking before the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub client_id: Ulid,
    pub provider_id: Ulid,
    pub instant: At,
    pub service_label: String,
}

/// A validated partial update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingChange {
    pub instant: Option<At>,
    pub provider_id: Option<Ulid>,
    pub service_label: Option<String>,
}

impl BookingChange {
    pub fn is_empty(&self) -> bool {
        self.instant.is_none() && self.provider_id.is_none() && self.service_label.is_none()
    }

    /// True if the change can move the booking to a different slot.
    pub fn touches_slot(&self) -> bool {
        self.instant.is_some() || self.provider_id.is_some()
    }

    pub fn apply_to(&self, booking: &Booking) -> Booking {
        Booking {
            id: booking.id,
            client_id: booking.client_id,
            provider_id: self.provider_id.unwrap_or(booking.provider_id),
            instant: self.instant.unwrap_or(booking.instant),
            service_label: self
                .service_label
                .clone()
                .unwrap_or_else(|| booking.service_label.clone()),
            created_at: booking.created_at,
        }
    }
}

/// One occupied instant on a provider's schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub instant: At,
    pub booking_id: Ulid,
}

/// The set of occupied instants for one provider, sorted by instant.
/// At most one slot per instant.
#[derive(Debug, Clone)]
pub struct ProviderSchedule {
    pub provider_id: Ulid,
    pub slots: Vec<Slot>,
}

impl ProviderSchedule {
    pub fn new(provider_id: Ulid) -> Self {
        Self {
            provider_id,
            slots: Vec::new(),
        }
    }

    /// The booking occupying `instant`, if any.
    pub fn holder_at(&self, instant: At) -> Option<Ulid> {
        self.slots
            .binary_search_by_key(&instant, |s| s.instant)
            .ok()
            .map(|pos| self.slots[pos].booking_id)
    }

    /// Occupy `instant`. Returns the existing holder instead if the instant is taken.
    pub fn occupy(&mut self, instant: At, booking_id: Ulid) -> Result<(), Ulid> {
        match self.slots.binary_search_by_key(&instant, |s| s.instant) {
            Ok(pos) => Err(self.slots[pos].booking_id),
            Err(pos) => {
                self.slots.insert(pos, Slot { instant, booking_id });
                Ok(())
            }
        }
    }

    /// Free the slot held by `booking_id`.
    pub fn release(&mut self, booking_id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.booking_id == booking_id)?;
        Some(self.slots.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated { booking: Booking },
    /// Carries the full post-update record.
    BookingUpdated { booking: Booking },
    BookingDeleted { id: Ulid, provider_id: Ulid },
}

/// Published after a booking is committed, for downstream notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingNotice {
    pub booking_id: Ulid,
    pub client_id: Ulid,
    pub provider_id: Ulid,
    pub instant: At,
    pub service_label: String,
}

impl From<&Booking> for BookingNotice {
    fn from(b: &Booking) -> Self {
        Self {
            booking_id: b.id,
            client_id: b.client_id,
            provider_id: b.provider_id,
            instant: b.instant,
            service_label: b.service_label.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> At {
        Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap()
    }

    fn booking(provider_id: Ulid, instant: At) -> Booking {
        Booking {
            id: Ulid::new(),
            client_id: Ulid::new(),
            provider_id,
            instant,
            service_label: "haircut".into(),
            created_at: at(0),
        }
    }

    #[test]
    fn schedule_keeps_slots_sorted() {
        let mut s = ProviderSchedule::new(Ulid::new());
        s.occupy(at(12), Ulid::new()).unwrap();
        s.occupy(at(9), Ulid::new()).unwrap();
        s.occupy(at(10), Ulid::new()).unwrap();
        let hours: Vec<_> = s.slots.iter().map(|sl| sl.instant).collect();
        assert_eq!(hours, vec![at(9), at(10), at(12)]);
    }

    #[test]
    fn occupy_taken_instant_reports_holder() {
        let mut s = ProviderSchedule::new(Ulid::new());
        let first = Ulid::new();
        s.occupy(at(10), first).unwrap();
        assert_eq!(s.occupy(at(10), Ulid::new()), Err(first));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn one_second_apart_is_not_a_collision() {
        let mut s = ProviderSchedule::new(Ulid::new());
        let t = at(10);
        s.occupy(t, Ulid::new()).unwrap();
        s.occupy(t + chrono::Duration::seconds(1), Ulid::new()).unwrap();
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn release_frees_instant() {
        let mut s = ProviderSchedule::new(Ulid::new());
        let id = Ulid::new();
        s.occupy(at(10), id).unwrap();
        assert_eq!(s.holder_at(at(10)), Some(id));
        assert!(s.release(id).is_some());
        assert_eq!(s.holder_at(at(10)), None);
        assert!(s.release(id).is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn change_applies_only_given_fields() {
        let b = booking(Ulid::new(), at(10));
        let change = BookingChange {
            service_label: Some("massage".into()),
            ..Default::default()
        };
        let updated = change.apply_to(&b);
        assert_eq!(updated.service_label, "massage");
        assert_eq!(updated.instant, b.instant);
        assert_eq!(updated.provider_id, b.provider_id);
        assert_eq!(updated.created_at, b.created_at);
        assert!(!change.touches_slot());
        assert!(BookingChange::default().is_empty());
    }

    #[test]
    fn party_follows_role() {
        let b = booking(Ulid::new(), at(10));
        assert_eq!(b.party(Role::Client), b.client_id);
        assert_eq!(b.party(Role::Provider), b.provider_id);
        assert!(b.involves(b.client_id));
        assert!(!b.involves(Ulid::new()));
    }

    #[test]
    fn event_survives_bincode() {
        let event = Event::BookingCreated {
            booking: booking(Ulid::new(), at(10)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
