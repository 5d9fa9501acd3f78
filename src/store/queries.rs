use ulid::Ulid;

use crate::model::*;

use super::{BookingError, BookingStore};

impl BookingStore {
    pub fn find_by_id(&self, id: Ulid) -> Result<Booking, BookingError> {
        self.bookings
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| BookingError::NotFound(id.to_string()))
    }

    /// The booking holding `instant` on the provider's schedule, unless it is `exclude`.
    pub async fn find_conflicting(
        &self,
        provider_id: Ulid,
        instant: At,
        exclude: Option<Ulid>,
    ) -> Option<Booking> {
        let schedule = self.existing_schedule(&provider_id)?;
        let holder = schedule.read().await.holder_at(instant)?;
        if Some(holder) == exclude {
            return None;
        }
        self.bookings.get(&holder).map(|e| e.value().clone())
    }

    /// Bookings naming `identity` in the field `role` selects, by instant ascending.
    pub async fn list_for(&self, identity: Ulid, role: Role) -> Vec<Booking> {
        match role {
            Role::Provider => {
                let Some(schedule) = self.existing_schedule(&identity) else {
                    return Vec::new();
                };
                let guard = schedule.read().await;
                guard
                    .slots
                    .iter()
                    .filter_map(|slot| self.bookings.get(&slot.booking_id).map(|e| e.value().clone()))
                    .collect()
            }
            Role::Client => {
                let ids = self
                    .by_client
                    .get(&identity)
                    .map(|e| e.value().clone())
                    .unwrap_or_default();
                let mut found: Vec<Booking> = ids
                    .iter()
                    .filter_map(|id| self.bookings.get(id).map(|e| e.value().clone()))
                    .filter(|b| b.client_id == identity)
                    .collect();
                found.sort_by(|a, b| a.instant.cmp(&b.instant).then(a.id.cmp(&b.id)));
                found
            }
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// Every live booking, for invariant checks and diagnostics.
    pub fn all(&self) -> Vec<Booking> {
        let mut all: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.instant.cmp(&b.instant).then(a.id.cmp(&b.id)));
        all
    }
}
