use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_no_conflict, derive_window, ensure_room, parse_date_input, parse_time_input,
    validate_guest_count, validate_len, validate_required,
};
use super::{Engine, EngineError, WalCommand};

fn validate_new(new: &NewReservation) -> Result<(), EngineError> {
    validate_required("customer name", &new.customer_name, MAX_NAME_LEN)?;
    validate_required("customer phone", &new.customer_phone, MAX_PHONE_LEN)?;
    if let Some(email) = &new.customer_email {
        validate_len("customer email", email, MAX_EMAIL_LEN)?;
    }
    if let Some(notes) = &new.notes {
        validate_len("notes", notes, MAX_NOTES_LEN)?;
    }
    if let Some(session) = &new.chat_session_id {
        validate_len("chat session id", session, MAX_CHAT_SESSION_LEN)?;
    }
    validate_guest_count(new.guest_count)
}

/// Some(trimmed) for a non-blank value, None otherwise.
fn provided(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Engine {
    /// Book a table. The returned reservation is `confirmed`.
    ///
    /// This is where double booking is actually prevented: the table/date
    /// bucket stays write-locked from the conflict check until the WAL
    /// append has completed. Without a `table_id` the smallest table that
    /// seats the party and is free for the window is chosen.
    pub async fn create_reservation(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        validate_new(&new)?;
        let date = parse_date_input(&new.date)?;
        let start = parse_time_input(&new.start_time)?;
        let restaurant = self
            .catalog
            .restaurant(new.restaurant_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("restaurant {}", new.restaurant_id)))?;
        let window = derive_window(start, restaurant.duration())?;

        let auto_assign = new.table_id.is_none();
        let candidates = match new.table_id {
            Some(table_id) => {
                let table = self
                    .catalog
                    .table(table_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("table {table_id}")))?;
                if table.restaurant_id != restaurant.id {
                    return Err(EngineError::InvalidInput(format!(
                        "table {table_id} does not belong to restaurant {}",
                        restaurant.id
                    )));
                }
                if table.capacity < new.guest_count {
                    return Err(EngineError::InvalidInput(format!(
                        "table {} seats {}, party is {}",
                        table.name, table.capacity, new.guest_count
                    )));
                }
                vec![table]
            }
            None => {
                let mut tables: Vec<Table> = self
                    .catalog
                    .tables(restaurant.id)
                    .await?
                    .into_iter()
                    .filter(|t| t.capacity >= new.guest_count)
                    .collect();
                if tables.is_empty() {
                    return Err(EngineError::InvalidInput(format!(
                        "no table seats a party of {}",
                        new.guest_count
                    )));
                }
                tables.sort_by_key(|t| t.capacity);
                tables
            }
        };

        for table in candidates {
            let key = (table.id, date);
            let mut locked = self.lock_buckets(vec![key]).await;
            {
                let day = locked.bucket(&key)?;
                match check_no_conflict(day, window, None) {
                    Ok(()) => {}
                    Err(EngineError::Conflict(_)) if auto_assign => continue,
                    Err(e) => return Err(e),
                }
                ensure_room(day)?;
            }

            let now = self.clock.now();
            let reservation = Reservation {
                id: Ulid::new(),
                restaurant_id: restaurant.id,
                table_id: table.id,
                customer_name: new.customer_name.trim().to_string(),
                customer_phone: new.customer_phone.trim().to_string(),
                customer_email: non_blank(new.customer_email),
                guest_count: new.guest_count,
                date,
                start_time: window.start,
                end_time: window.end,
                status: ReservationStatus::Confirmed,
                notes: non_blank(new.notes),
                chat_session_id: non_blank(new.chat_session_id),
                created_at: now,
                updated_at: now,
            };
            let event = Event::ReservationCreated {
                reservation: reservation.clone(),
            };
            self.persist_and_apply(locked, event).await?;
            info!(
                "reservation {} created: table {} {} {}-{} for {}",
                reservation.id,
                table.name,
                reservation.date,
                format_time(reservation.start_time),
                format_time(reservation.end_time),
                reservation.guest_count
            );
            metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
            return Ok(reservation);
        }

        Err(EngineError::slot_taken())
    }

    /// Apply the provided fields of `patch`. A new date or start time
    /// re-derives the end time and is re-checked against the table's other
    /// reservations on the target date.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let new_date = provided(&patch.date).map(parse_date_input).transpose()?;
        let new_start = provided(&patch.start_time).map(parse_time_input).transpose()?;
        if let Some(name) = provided(&patch.customer_name) {
            validate_len("customer name", name, MAX_NAME_LEN)?;
        }
        if let Some(phone) = provided(&patch.customer_phone) {
            validate_len("customer phone", phone, MAX_PHONE_LEN)?;
        }
        if let Some(email) = provided(&patch.customer_email) {
            validate_len("customer email", email, MAX_EMAIL_LEN)?;
        }
        if let Some(notes) = provided(&patch.notes) {
            validate_len("notes", notes, MAX_NOTES_LEN)?;
        }
        let new_guests = patch.guest_count.filter(|n| *n > 0);
        if let Some(n) = new_guests {
            validate_guest_count(n)?;
        }

        let (old_key, mut locked) = self
            .lock_reservation(id, |(table_id, _)| new_date.map(|d| (table_id, d)))
            .await?;
        let current = locked
            .bucket(&old_key)?
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::reservation_not_found(id))?;
        if patch.is_empty() {
            return Ok(current);
        }

        let mut next = current.clone();
        if let Some(name) = provided(&patch.customer_name) {
            next.customer_name = name.to_string();
        }
        if let Some(phone) = provided(&patch.customer_phone) {
            next.customer_phone = phone.to_string();
        }
        if let Some(email) = provided(&patch.customer_email) {
            next.customer_email = Some(email.to_string());
        }
        if let Some(notes) = provided(&patch.notes) {
            next.notes = Some(notes.to_string());
        }
        if let Some(status) = patch.status {
            next.status = status;
        }
        if let Some(d) = new_date {
            next.date = d;
        }
        if let Some(s) = new_start {
            next.start_time = s;
        }
        if let Some(n) = new_guests
            && n != current.guest_count
        {
            let table = self
                .catalog
                .table(current.table_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("table {}", current.table_id)))?;
            if table.capacity < n {
                return Err(EngineError::InvalidInput(format!(
                    "table {} seats {}, party is {n}",
                    table.name, table.capacity
                )));
            }
            next.guest_count = n;
        }

        let rescheduled = next.date != current.date || next.start_time != current.start_time;
        if rescheduled {
            let restaurant = self
                .catalog
                .restaurant(current.restaurant_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("restaurant {}", current.restaurant_id)))?;
            next.end_time = derive_window(next.start_time, restaurant.duration())?.end;
        }

        let reinstated = !current.status.blocks_table() && next.status.blocks_table();
        if (rescheduled || reinstated) && next.status.blocks_table() {
            let new_key = next.bucket_key();
            let target = locked.bucket(&new_key)?;
            check_no_conflict(target, next.window(), Some(id))?;
            if new_key != old_key {
                ensure_room(target)?;
            }
        }

        next.updated_at = self.clock.now();
        let event = Event::ReservationUpdated {
            reservation: next.clone(),
        };
        self.persist_and_apply(locked, event).await?;
        info!("reservation {id} updated");
        Ok(next)
    }

    /// Staff cancellation. No ownership check; cancelling twice is a no-op
    /// that still succeeds.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let (key, mut locked) = self.lock_reservation(id, |_| None).await?;
        let current = locked
            .bucket(&key)?
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::reservation_not_found(id))?;
        self.set_status(locked, current, ReservationStatus::Cancelled)
            .await
    }

    /// Self-service cancellation for a customer identified only by phone.
    /// A wrong phone is indistinguishable from a missing reservation.
    pub async fn cancel_by_phone(&self, id: Ulid, phone: &str) -> Result<Reservation, EngineError> {
        let (key, mut locked) = self.lock_reservation(id, |_| None).await?;
        let current = locked
            .bucket(&key)?
            .get(id)
            .filter(|r| r.customer_phone == phone.trim())
            .cloned()
            .ok_or_else(|| EngineError::reservation_not_found(id))?;
        if current.status == ReservationStatus::Cancelled {
            return Err(EngineError::AlreadyCancelled(id));
        }
        self.set_status(locked, current, ReservationStatus::Cancelled)
            .await
    }

    async fn set_status(
        &self,
        locked: super::LockedBuckets,
        mut reservation: Reservation,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let at = self.clock.now();
        let event = Event::StatusChanged {
            id: reservation.id,
            restaurant_id: reservation.restaurant_id,
            status,
            at,
        };
        self.persist_and_apply(locked, event).await?;
        reservation.status = status;
        reservation.updated_at = at;
        info!("reservation {} is now {status}", reservation.id);
        if status == ReservationStatus::Cancelled {
            metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        }
        Ok(reservation)
    }

    /// Remove a reservation for good.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let (key, mut locked) = self.lock_reservation(id, |_| None).await?;
        let restaurant_id = locked
            .bucket(&key)?
            .get(id)
            .map(|r| r.restaurant_id)
            .ok_or_else(|| EngineError::reservation_not_found(id))?;
        let event = Event::ReservationDeleted { id, restaurant_id };
        self.persist_and_apply(locked, event).await?;
        info!("reservation {id} deleted");
        Ok(())
    }

    /// Compact the WAL by rewriting it with one creation event per live
    /// reservation. Mutations wait on the commit gate while this runs.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let days: Vec<_> = self.buckets.iter().map(|e| e.value().clone()).collect();
        let mut reservations = Vec::with_capacity(self.indexes.entity_to_bucket.len());
        for day in days {
            reservations.extend(day.read().await.reservations.iter().cloned());
        }
        reservations.sort_by_key(|r| (r.created_at, r.id));
        let events: Vec<Event> = reservations
            .into_iter()
            .map(|reservation| Event::ReservationCreated { reservation })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
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
