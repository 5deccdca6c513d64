use std::cmp::Reverse;

use ulid::Ulid;

use crate::model::*;

use super::availability::{order_slots, table_slots};
use super::conflict::{parse_date_input, validate_party_size};
use super::{Engine, EngineError};

impl Engine {
    /// Bookable slots for a party at a restaurant on `date` (`YYYY-MM-DD`).
    ///
    /// Closed days, parties no table can seat (however large) and fully
    /// booked days all give an empty list. Only read locks are taken; `create` re-validates.
    pub async fn get_available_slots(
        &self,
        restaurant_id: Ulid,
        date: &str,
        guest_count: u32,
    ) -> Result<Vec<Slot>, EngineError> {
        let date = parse_date_input(date)?;
        validate_party_size(guest_count)?;
        let restaurant = self
            .catalog
            .restaurant(restaurant_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("restaurant {restaurant_id}")))?;

        let Some(hours) = restaurant.hours_on(date) else {
            return Ok(Vec::new());
        };
        let tables: Vec<Table> = self
            .catalog
            .tables(restaurant_id)
            .await?
            .into_iter()
            .filter(|t| t.capacity >= guest_count)
            .collect();
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let duration = restaurant.duration();
        let now = self.clock.now();
        let after = (now.date() == date).then(|| now.time());

        let mut slots = Vec::new();
        for table in tables {
            let booked = match self.get_bucket(&(table.id, date)) {
                Some(day) => day.read().await.booked_ranges(None),
                None => Vec::new(),
            };
            slots.extend(
                table_slots(hours, &booked, duration, after)
                    .into_iter()
                    .map(|w| Slot {
                        start_time: w.start,
                        end_time: w.end,
                        table_id: table.id,
                        table_name: table.name.clone(),
                        capacity: table.capacity,
                    }),
            );
        }
        order_slots(&mut slots);
        Ok(slots)
    }

    pub async fn get_by_id(&self, id: Ulid) -> Result<Reservation, EngineError> {
        loop {
            let key = self
                .bucket_of(&id)
                .ok_or_else(|| EngineError::reservation_not_found(id))?;
            if let Some(day) = self.get_bucket(&key) {
                let guard = day.read().await;
                if let Some(r) = guard.get(id) {
                    return Ok(r.clone());
                }
            }
            // Moved between the index lookup and the read; try again.
            if self.bucket_of(&id) == Some(key) {
                return Err(EngineError::reservation_not_found(id));
            }
        }
    }

    /// Non-cancelled reservations for a phone number, newest first.
    pub async fn get_by_phone(&self, phone: &str) -> Result<Vec<Reservation>, EngineError> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(EngineError::InvalidInput("phone is required".into()));
        }
        let ids = self
            .indexes
            .by_phone
            .get(phone)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_by_id(id).await {
                Ok(r) if r.status.blocks_table() && r.customer_phone == phone => found.push(r),
                Ok(_) | Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        sort_newest_first(&mut found);
        Ok(found)
    }

    /// Every reservation in every status, newest first.
    pub async fn list_all(&self) -> Vec<Reservation> {
        let mut all = self.collect(|_| true).await;
        sort_newest_first(&mut all);
        all
    }

    /// A restaurant's reservations in schedule order, optionally for one date.
    pub async fn list_by_restaurant(
        &self,
        restaurant_id: Ulid,
        date: Option<&str>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let date = date.map(parse_date_input).transpose()?;
        let mut found = self
            .collect(|r| r.restaurant_id == restaurant_id && date.is_none_or(|d| r.date == d))
            .await;
        found.sort_by_key(|r| (r.date, r.start_time, r.table_id));
        Ok(found)
    }

    async fn collect(&self, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let days: Vec<_> = self.buckets.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for day in days {
            let guard = day.read().await;
            out.extend(guard.reservations.iter().filter(|r| keep(r)).cloned());
        }
        out
    }
}

pub(super) fn sort_newest_first(list: &mut [Reservation]) {
    list.sort_by_key(|r| Reverse((r.created_at, r.id)));
}
