use chrono::Utc;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::MAX_BOOKINGS_PER_PROVIDER;
use crate::model::*;

use super::conflict::{check_slot_free, validate_label};
use super::{locked, BookingError, BookingStore, ScheduleGuard, WalCommand};

fn commit_conflict(_: &BookingError) {
    metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL, "stage" => "commit").increment(1);
}

fn guard_for(guards: &mut [ScheduleGuard], provider_id: Ulid) -> Result<&mut ProviderSchedule, BookingError> {
    locked(guards, provider_id)
        .ok_or_else(|| BookingError::Storage(format!("schedule of provider {provider_id} not locked")))
}

impl BookingStore {
    /// Persist a new booking. The slot is re-checked under the provider's lock,
    /// so of two racing inserts for one slot exactly one wins.
    pub async fn insert(&self, new: NewBooking) -> Result<Booking, BookingError> {
        validate_label(&new.service_label)?;
        let mut guards = self.lock_providers(&[new.provider_id]).await;

        let schedule = guard_for(&mut guards, new.provider_id)?;
        if schedule.len() >= MAX_BOOKINGS_PER_PROVIDER {
            return Err(BookingError::LimitExceeded("too many bookings on provider"));
        }
        check_slot_free(schedule, new.instant, None).inspect_err(commit_conflict)?;

        let booking = Booking {
            id: Ulid::new(),
            client_id: new.client_id,
            provider_id: new.provider_id,
            instant: new.instant,
            service_label: new.service_label,
            created_at: Utc::now(),
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guards, &event).await?;
        Ok(booking)
    }

    pub async fn update(&self, id: Ulid, change: &BookingChange) -> Result<Booking, BookingError> {
        self.update_with(id, change, |_| Ok(())).await
    }

    /// Apply `change` if `precondition` accepts the current record. The
    /// precondition and the slot check both run under the affected providers'
    /// locks.
    pub async fn update_with<F>(
        &self,
        id: Ulid,
        change: &BookingChange,
        precondition: F,
    ) -> Result<Booking, BookingError>
    where
        F: Fn(&Booking) -> Result<(), BookingError>,
    {
        if let Some(label) = &change.service_label {
            validate_label(label)?;
        }
        loop {
            let seen = self.find_by_id(id)?;
            let target = change.provider_id.unwrap_or(seen.provider_id);
            let mut guards = self.lock_providers(&[seen.provider_id, target]).await;

            let current = self.find_by_id(id)?;
            if current.provider_id != seen.provider_id {
                // Re-assigned while we waited; lock the right schedules.
                continue;
            }
            precondition(&current)?;

            let updated = change.apply_to(&current);
            if updated == current {
                return Ok(updated);
            }
            if updated.provider_id != current.provider_id || updated.instant != current.instant {
                let schedule = guard_for(&mut guards, updated.provider_id)?;
                check_slot_free(schedule, updated.instant, Some(id)).inspect_err(commit_conflict)?;
                if updated.provider_id != current.provider_id
                    && schedule.len() >= MAX_BOOKINGS_PER_PROVIDER
                {
                    return Err(BookingError::LimitExceeded("too many bookings on provider"));
                }
            }

            let event = Event::BookingUpdated {
                booking: updated.clone(),
            };
            self.persist_and_apply(&mut guards, &event).await?;
            return Ok(updated);
        }
    }

    pub async fn remove(&self, id: Ulid) -> Result<Booking, BookingError> {
        self.remove_with(id, |_| Ok(())).await
    }

    /// Delete the booking if `precondition` accepts it, evaluated under the
    /// provider's lock. Returns the removed record.
    pub async fn remove_with<F>(&self, id: Ulid, precondition: F) -> Result<Booking, BookingError>
    where
        F: Fn(&Booking) -> Result<(), BookingError>,
    {
        loop {
            let seen = self.find_by_id(id)?;
            let mut guards = self.lock_providers(&[seen.provider_id]).await;

            let current = self.find_by_id(id)?;
            if current.provider_id != seen.provider_id {
                continue;
            }
            precondition(&current)?;

            let event = Event::BookingDeleted {
                id,
                provider_id: current.provider_id,
            };
            self.persist_and_apply(&mut guards, &event).await?;
            return Ok(current);
        }
    }

    /// Rewrite the WAL as one `BookingCreated` per live booking.
    pub async fn compact_wal(&self) -> Result<(), BookingError> {
        let _gate = self.commit_gate.write().await;

        let mut live: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        live.sort_by_key(|b| b.id);
        let events = live
            .into_iter()
            .map(|booking| Event::BookingCreated { booking })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| BookingError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
