use std::sync::Arc;

use ulid::Ulid;

use crate::model::At;
use crate::store::{BookingError, BookingStore};

/// Decides whether a (provider, instant) slot can be taken.
///
/// This is the early check done before any write. The store repeats the same
/// test under the provider's lock when it commits.
pub struct ConflictArbiter {
    store: Arc<BookingStore>,
}

impl ConflictArbiter {
    pub fn new(store: Arc<BookingStore>) -> Self {
        Self { store }
    }

    /// Exact-instant equality is the only collision test. `instant` is already
    /// UTC-normalized, so equal instants written with different offsets collide.
    pub async fn check_availability(
        &self,
        provider_id: Ulid,
        instant: At,
        exclude: Option<Ulid>,
    ) -> Result<(), BookingError> {
        match self.store.find_conflicting(provider_id, instant, exclude).await {
            Some(holder) => {
                tracing::debug!(
                    "slot {provider_id}@{} held by booking {}",
                    instant.to_rfc3339(),
                    holder.id
                );
                metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL, "stage" => "precheck")
                    .increment(1);
                Err(BookingError::SlotTaken {
                    provider_id,
                    instant,
                })
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::parse_instant;
    use crate::model::NewBooking;

    async fn store(name: &str) -> Arc<BookingStore> {
        let dir = std::env::temp_dir().join("slotkeeper_test_arbiter");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        Arc::new(BookingStore::open(path).await.unwrap())
    }

    #[tokio::test]
    async fn offsets_normalize_before_comparison() {
        let store = store("offsets.wal").await;
        let arbiter = ConflictArbiter::new(store.clone());
        let provider = Ulid::new();
        store
            .insert(NewBooking {
                client_id: Ulid::new(),
                provider_id: provider,
                instant: parse_instant("2024-06-01T10:00:00Z").unwrap(),
                service_label: "haircut".into(),
            })
            .await
            .unwrap();

        let same = parse_instant("2024-06-01T12:00:00+02:00").unwrap();
        assert!(matches!(
            arbiter.check_availability(provider, same, None).await,
            Err(BookingError::SlotTaken { .. })
        ));

        let next_second = parse_instant("2024-06-01T10:00:01Z").unwrap();
        assert!(arbiter.check_availability(provider, next_second, None).await.is_ok());
    }

    #[tokio::test]
    async fn own_booking_is_excluded() {
        let store = store("exclude.wal").await;
        let arbiter = ConflictArbiter::new(store.clone());
        let provider = Ulid::new();
        let instant = parse_instant("2024-06-01T10:00:00Z").unwrap();
        let b = store
            .insert(NewBooking {
                client_id: Ulid::new(),
                provider_id: provider,
                instant,
                service_label: "haircut".into(),
            })
            .await
            .unwrap();

        assert!(arbiter.check_availability(provider, instant, Some(b.id)).await.is_ok());
        assert!(arbiter.check_availability(provider, instant, Some(Ulid::new())).await.is_err());
        assert!(arbiter.check_availability(Ulid::new(), instant, None).await.is_ok());
    }
}
