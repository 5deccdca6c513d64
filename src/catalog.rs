use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use ulid::Ulid;

use crate::limits::MAX_GUEST_COUNT;
use crate::model::*;

/// Read-only view of restaurant configuration and table inventory.
///
/// The platform owns these records; the engine only looks them up. Working
/// hours and the reservation duration travel inside [`Restaurant`].
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn restaurant(&self, id: Ulid) -> Result<Option<Restaurant>, CatalogError>;

    async fn table(&self, id: Ulid) -> Result<Option<Table>, CatalogError>;

    /// All tables of a restaurant, in a stable order.
    async fn tables(&self, restaurant_id: Ulid) -> Result<Vec<Table>, CatalogError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogError(pub String);

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "catalog error: {}", self.0)
    }
}

impl std::error::Error for CatalogError {}

// ── JSON catalog file ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CatalogFile {
    restaurants: Vec<RestaurantEntry>,
}

#[derive(Debug, Deserialize)]
struct RestaurantEntry {
    id: Ulid,
    name: String,
    #[serde(default)]
    reservation_duration: u32,
    #[serde(default)]
    working_hours: Vec<WorkingHoursEntry>,
    #[serde(default)]
    tables: Vec<TableEntry>,
}

#[derive(Debug, Deserialize)]
struct WorkingHoursEntry {
    day_of_week: u8,
    open_time: String,
    close_time: String,
}

#[derive(Debug, Deserialize)]
struct TableEntry {
    id: Ulid,
    name: String,
    capacity: u32,
}

// ── In-memory implementation ─────────────────────────────────────

pub struct InMemoryCatalog {
    restaurants: DashMap<Ulid, Restaurant>,
    tables: DashMap<Ulid, Table>,
    /// restaurant id → table ids in insertion order.
    by_restaurant: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            restaurants: DashMap::new(),
            tables: DashMap::new(),
            by_restaurant: DashMap::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile =
            serde_json::from_str(json).map_err(|e| CatalogError(format!("bad catalog JSON: {e}")))?;
        let catalog = Self::new();
        for entry in file.restaurants {
            let mut working_hours = Vec::with_capacity(entry.working_hours.len());
            for wh in &entry.working_hours {
                let open = parse_time(&wh.open_time).ok_or_else(|| {
                    CatalogError(format!("{}: bad open_time {:?}", entry.name, wh.open_time))
                })?;
                let close = parse_time(&wh.close_time).ok_or_else(|| {
                    CatalogError(format!("{}: bad close_time {:?}", entry.name, wh.close_time))
                })?;
                working_hours.push(WorkingHours {
                    day_of_week: wh.day_of_week,
                    open,
                    close,
                });
            }
            catalog.insert_restaurant(Restaurant {
                id: entry.id,
                name: entry.name,
                reservation_duration: entry.reservation_duration,
                working_hours,
            })?;
            for t in entry.tables {
                catalog.insert_table(Table {
                    id: t.id,
                    restaurant_id: entry.id,
                    name: t.name,
                    capacity: t.capacity,
                })?;
            }
        }
        Ok(catalog)
    }

    pub fn load_file(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CatalogError(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Add a restaurant. Rejects a duplicate id, invalid or duplicate
    /// weekdays, and windows that do not close after they open (no
    /// overnight hours).
    pub fn insert_restaurant(&self, restaurant: Restaurant) -> Result<(), CatalogError> {
        let mut seen = [false; 7];
        for wh in &restaurant.working_hours {
            let day = usize::from(wh.day_of_week);
            if day > 6 {
                return Err(CatalogError(format!(
                    "{}: day_of_week {} out of range",
                    restaurant.name, wh.day_of_week
                )));
            }
            if seen[day] {
                return Err(CatalogError(format!(
                    "{}: duplicate working hours for day {day}",
                    restaurant.name
                )));
            }
            seen[day] = true;
            if wh.open >= wh.close {
                return Err(CatalogError(format!(
                    "{}: day {day} must open before it closes",
                    restaurant.name
                )));
            }
        }
        match self.restaurants.entry(restaurant.id) {
            Entry::Occupied(_) => Err(CatalogError(format!(
                "{}: duplicate restaurant id {}",
                restaurant.name, restaurant.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(restaurant);
                Ok(())
            }
        }
    }

    /// Add a table. Capacity runs from 1 to the largest party a booking
    /// accepts, so every seat count the catalog holds can be booked.
    pub fn insert_table(&self, table: Table) -> Result<(), CatalogError> {
        if table.capacity == 0 || table.capacity > MAX_GUEST_COUNT {
            return Err(CatalogError(format!(
                "table {}: capacity must be between 1 and {MAX_GUEST_COUNT}",
                table.name
            )));
        }
        if !self.restaurants.contains_key(&table.restaurant_id) {
            return Err(CatalogError(format!(
                "table {}: unknown restaurant {}",
                table.name, table.restaurant_id
            )));
        }
        let (id, restaurant_id) = (table.id, table.restaurant_id);
        match self.tables.entry(id) {
            Entry::Occupied(_) => {
                return Err(CatalogError(format!("table {}: duplicate id {id}", table.name)));
            }
            Entry::Vacant(slot) => {
                slot.insert(table);
            }
        }
        self.by_restaurant.entry(restaurant_id).or_default().push(id);
        Ok(())
    }

    pub fn restaurant_count(&self) -> usize {
        self.restaurants.len()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn restaurant(&self, id: Ulid) -> Result<Option<Restaurant>, CatalogError> {
        Ok(self.restaurants.get(&id).map(|e| e.value().clone()))
    }

    async fn table(&self, id: Ulid) -> Result<Option<Table>, CatalogError> {
        Ok(self.tables.get(&id).map(|e| e.value().clone()))
    }

    async fn tables(&self, restaurant_id: Ulid) -> Result<Vec<Table>, CatalogError> {
        let ids = self
            .by_restaurant
            .get(&restaurant_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.tables.get(id).map(|e| e.value().clone()))
            .collect())
    }
}
