use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::access::{self, Operation};
use crate::arbiter::ConflictArbiter;
use crate::directory::{Identity, IdentityDirectory};
use crate::input::{parse_booking_id, parse_identity, BookingPatch, CreateBooking};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{BOOKINGS_CREATED_TOTAL, OPERATIONS_TOTAL, OPERATION_DURATION_SECONDS};
use crate::store::{BookingError, BookingStore};

fn record<T>(op: &'static str, started: Instant, result: &Result<T, BookingError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
    match result {
        Err(e) if e.is_retryable() => warn!("{op} failed: {e}"),
        Err(e) => debug!("{op} rejected: {e}"),
        Ok(_) => {}
    }
}

/// Entry point for every booking operation.
///
/// Orders the checks for each request: identity and input shape, then
/// existence, then authorization, then slot arbitration, then the commit.
/// Nothing is written unless every earlier step passed.
pub struct BookingController {
    store: Arc<BookingStore>,
    arbiter: ConflictArbiter,
    directory: Arc<dyn IdentityDirectory>,
    notify: Arc<NotifyHub>,
}

impl BookingController {
    pub fn new(
        store: Arc<BookingStore>,
        directory: Arc<dyn IdentityDirectory>,
        notify: Arc<NotifyHub>,
    ) -> Self {
        Self {
            arbiter: ConflictArbiter::new(store.clone()),
            store,
            directory,
            notify,
        }
    }

    pub fn store(&self) -> &Arc<BookingStore> {
        &self.store
    }

    async fn require_role(&self, id: Ulid, role: Role, what: &str) -> Result<(), BookingError> {
        match self.directory.role_of(id).await {
            Some(r) if r == role => Ok(()),
            Some(other) => Err(BookingError::validation(format!(
                "{what} {id} is a {other}, not a {role}"
            ))),
            None => Err(BookingError::validation(format!("unknown {what} {id}"))),
        }
    }

    // ── Create ───────────────────────────────────────────────

    pub async fn create_booking(
        &self,
        actor: &str,
        provider_id: &str,
        instant: &str,
        service_label: &str,
    ) -> Result<Booking, BookingError> {
        let request = CreateBooking {
            provider_id: provider_id.to_string(),
            instant: instant.to_string(),
            service_label: service_label.to_string(),
        };
        self.create(actor, &request).await
    }

    pub async fn create(&self, actor: &str, request: &CreateBooking) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.create_inner(actor, request).await;
        record("create", started, &result);
        result
    }

    async fn create_inner(&self, actor: &str, request: &CreateBooking) -> Result<Booking, BookingError> {
        let client_id = parse_identity(actor, "client")?;
        let new = request.validate(client_id)?;
        self.require_role(client_id, Role::Client, "client").await?;
        self.require_role(new.provider_id, Role::Provider, "provider").await?;

        self.arbiter
            .check_availability(new.provider_id, new.instant, None)
            .await?;
        let booking = self.store.insert(new).await?;

        info!(
            "booking {} created: client {} with provider {} at {}",
            booking.id,
            booking.client_id,
            booking.provider_id,
            booking.instant.to_rfc3339()
        );
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        self.notify.publish(BookingNotice::from(&booking));
        Ok(booking)
    }

    // ── Read ─────────────────────────────────────────────────

    /// Bookings the actor sees in `role`. Without an explicit role the
    /// directory decides.
    pub async fn list_bookings(
        &self,
        actor: &str,
        role: Option<Role>,
    ) -> Result<Vec<Booking>, BookingError> {
        let started = Instant::now();
        let result = self.list_inner(actor, role).await;
        record("list", started, &result);
        result
    }

    async fn list_inner(&self, actor: &str, role: Option<Role>) -> Result<Vec<Booking>, BookingError> {
        let actor = parse_identity(actor, "acting identity")?;
        let role = match role {
            Some(role) => role,
            None => self
                .directory
                .role_of(actor)
                .await
                .ok_or_else(|| BookingError::validation(format!("unknown identity {actor}")))?,
        };
        let mut bookings = self.store.list_for(actor, role).await;
        bookings.retain(|b| access::visible_in_listing(actor, role, b));
        Ok(bookings)
    }

    pub async fn get_booking(&self, actor: &str, booking_id: &str) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.get_inner(actor, booking_id);
        record("get", started, &result);
        result
    }

    fn get_inner(&self, actor: &str, booking_id: &str) -> Result<Booking, BookingError> {
        let actor = parse_identity(actor, "acting identity")?;
        let booking = self.store.find_by_id(parse_booking_id(booking_id)?)?;
        access::authorize(actor, &booking, Operation::Read)?;
        Ok(booking)
    }

    pub async fn providers(&self) -> Vec<Identity> {
        self.directory.providers().await
    }

    // ── Update ───────────────────────────────────────────────

    pub async fn update_booking(
        &self,
        actor: &str,
        booking_id: &str,
        patch: &BookingPatch,
    ) -> Result<Booking, BookingError> {
        let started = Instant::now();
        let result = self.update_inner(actor, booking_id, patch).await;
        record("update", started, &result);
        result
    }

    async fn update_inner(
        &self,
        actor: &str,
        booking_id: &str,
        patch: &BookingPatch,
    ) -> Result<Booking, BookingError> {
        let actor = parse_identity(actor, "acting identity")?;
        let id = parse_booking_id(booking_id)?;
        let current = self.store.find_by_id(id)?;
        access::authorize(actor, &current, Operation::Update)?;

        let change = patch.validate()?;
        if let Some(provider_id) = change.provider_id
            && provider_id != current.provider_id
        {
            self.require_role(provider_id, Role::Provider, "provider").await?;
        }
        if change.touches_slot() {
            let provider_id = change.provider_id.unwrap_or(current.provider_id);
            let instant = change.instant.unwrap_or(current.instant);
            self.arbiter
                .check_availability(provider_id, instant, Some(id))
                .await?;
        }

        // Authorization is re-checked under the commit locks: a concurrent
        // re-assignment may have removed the actor from the booking.
        let updated = self
            .store
            .update_with(id, &change, |b| access::authorize(actor, b, Operation::Update))
            .await?;
        info!("booking {id} updated by {actor}");
        Ok(updated)
    }

    // ── Delete ───────────────────────────────────────────────

    pub async fn delete_booking(&self, actor: &str, booking_id: &str) -> Result<(), BookingError> {
        let started = Instant::now();
        let result = self.delete_inner(actor, booking_id).await;
        record("delete", started, &result);
        result
    }

    async fn delete_inner(&self, actor: &str, booking_id: &str) -> Result<(), BookingError> {
        let actor = parse_identity(actor, "acting identity")?;
        let id = parse_booking_id(booking_id)?;
        let current = self.store.find_by_id(id)?;
        access::authorize(actor, &current, Operation::Delete)?;

        self.store
            .remove_with(id, |b| access::authorize(actor, b, Operation::Delete))
            .await?;
        info!("booking {id} deleted by {actor}");
        Ok(())
    }
}
