mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::check_slot_free;
pub use error::BookingError;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<ProviderSchedule>>;
pub(crate) type ScheduleGuard = OwnedRwLockWriteGuard<ProviderSchedule>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends queued while a flush is pending share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't bleed into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let _ = tx.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Durable booking collection.
///
/// Every provider owns a schedule behind its own lock. All writes touching a
/// provider's slots happen under that schedule's write lock, so check-then-write
/// on a slot is atomic. `bookings` and `by_client` are only mutated while the
/// owning provider's schedule is write-locked.
pub struct BookingStore {
    schedules: DashMap<Ulid, SharedSchedule>,
    bookings: DashMap<Ulid, Booking>,
    /// Client → booking ids, for client-side listing.
    by_client: DashMap<Ulid, Vec<Ulid>>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Commits hold it shared; compaction holds it exclusively to snapshot.
    commit_gate: RwLock<()>,
}

impl BookingStore {
    /// Replay the log at `wal_path` and start the background writer.
    pub async fn open(wal_path: impl AsRef<Path>) -> io::Result<Self> {
        let wal_path: PathBuf = wal_path.as_ref().to_path_buf();
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            schedules: DashMap::new(),
            bookings: DashMap::new(),
            by_client: DashMap::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
        };

        // Nobody else can see the store yet, so these locks are uncontended.
        for event in &events {
            let mut guards = store.lock_providers(&event_providers(&store, event)).await;
            store.apply(&mut guards, event);
        }
        tracing::info!(
            "replayed {} events from {}: {} bookings",
            events.len(),
            wal_path.display(),
            store.bookings.len()
        );

        Ok(store)
    }

    async fn wal_append(&self, event: &Event) -> Result<(), BookingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| BookingError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::Storage(e.to_string()))
    }

    /// The provider's schedule, created empty on first use.
    pub(crate) fn schedule(&self, provider_id: Ulid) -> SharedSchedule {
        self.schedules
            .entry(provider_id)
            .or_insert_with(|| Arc::new(RwLock::new(ProviderSchedule::new(provider_id))))
            .clone()
    }

    pub(crate) fn existing_schedule(&self, provider_id: &Ulid) -> Option<SharedSchedule> {
        self.schedules.get(provider_id).map(|e| e.value().clone())
    }

    /// Write-lock the schedules of `provider_ids` in id order.
    pub(crate) async fn lock_providers(&self, provider_ids: &[Ulid]) -> Vec<ScheduleGuard> {
        let mut ids = provider_ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.schedule(id).write_owned().await);
        }
        guards
    }

    /// WAL-append then apply. Nothing changes in memory if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        guards: &mut [ScheduleGuard],
        event: &Event,
    ) -> Result<(), BookingError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        self.apply(guards, event);
        Ok(())
    }

    /// Apply an event to memory. The caller holds the write locks of every
    /// provider the event touches.
    fn apply(&self, guards: &mut [ScheduleGuard], event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                self.attach(guards, booking);
                self.by_client
                    .entry(booking.client_id)
                    .or_default()
                    .push(booking.id);
            }
            Event::BookingUpdated { booking } => {
                let previous = self.bookings.get(&booking.id).map(|b| b.provider_id);
                if let Some(old_provider) = previous
                    && let Some(schedule) = locked(guards, old_provider)
                {
                    schedule.release(booking.id);
                }
                self.attach(guards, booking);
            }
            Event::BookingDeleted { id, provider_id } => {
                if let Some(schedule) = locked(guards, *provider_id) {
                    schedule.release(*id);
                }
                if let Some((_, removed)) = self.bookings.remove(id)
                    && let Some(mut ids) = self.by_client.get_mut(&removed.client_id)
                {
                    ids.retain(|b| b != id);
                }
            }
        }
    }

    fn attach(&self, guards: &mut [ScheduleGuard], booking: &Booking) {
        match locked(guards, booking.provider_id) {
            Some(schedule) => {
                if let Err(holder) = schedule.occupy(booking.instant, booking.id) {
                    tracing::error!(
                        "slot of provider {} at {} already held by {holder}; dropping booking {}",
                        booking.provider_id,
                        booking.instant,
                        booking.id
                    );
                    return;
                }
            }
            None => {
                tracing::error!(
                    "apply without lock on provider {} for booking {}",
                    booking.provider_id,
                    booking.id
                );
                return;
            }
        }
        self.bookings.insert(booking.id, booking.clone());
    }
}

fn locked(guards: &mut [ScheduleGuard], provider_id: Ulid) -> Option<&mut ProviderSchedule> {
    guards
        .iter_mut()
        .find(|g| g.provider_id == provider_id)
        .map(|g| &mut **g)
}

/// Providers whose schedules an event touches, including the previous provider
/// of a re-assigned booking.
fn event_providers(store: &BookingStore, event: &Event) -> Vec<Ulid> {
    match event {
        Event::BookingCreated { booking } => vec![booking.provider_id],
        Event::BookingUpdated { booking } => {
            let mut ids = vec![booking.provider_id];
            if let Some(prev) = store.bookings.get(&booking.id) {
                ids.push(prev.provider_id);
            }
            ids
        }
        Event::BookingDeleted { provider_id, .. } => vec![*provider_id],
    }
}
