use chrono::{DateTime, Utc};
use marquee_core::{ReservationError, ReservationResult, ReservationStore, SeatMapRemoval};
use marquee_shared::{Seat, SeatLayout};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Creates, lists and removes the seat map of a showtime
pub struct SeatInventory {
    store: Arc<dyn ReservationStore>,
}

impl SeatInventory {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    /// Seats ordered by row, then seat number
    pub async fn get_seats(&self, showtime_id: Uuid) -> ReservationResult<Vec<Seat>> {
        Ok(self.store.list_seats(showtime_id).await?)
    }

    /// Creates every seat of `layout` as Free.
    /// Returns `false` without touching anything if the showtime already has seats.
    pub async fn initialize_seats(&self, showtime_id: Uuid, layout: &SeatLayout) -> ReservationResult<bool> {
        validate_layout(layout)?;

        let seats = layout.seats(showtime_id);
        let created = self.store.insert_seats(showtime_id, &seats).await?;
        if created {
            info!("Initialized {} seats for showtime {}", seats.len(), showtime_id);
        }
        Ok(created)
    }

    /// Removes the seat map and cancels the showtime's pending bookings with it.
    /// Refused with `InvalidRequest` while any booking of the showtime is paid.
    pub async fn delete_seats(&self, showtime_id: Uuid, now: DateTime<Utc>) -> ReservationResult<SeatMapRemoval> {
        let removal = self.store.delete_seats(showtime_id, now).await?;
        info!(
            "Deleted {} seats of showtime {}, cancelled {} pending bookings",
            removal.seats_removed,
            showtime_id,
            removal.cancelled.len()
        );
        Ok(removal)
    }
}

fn validate_layout(layout: &SeatLayout) -> ReservationResult<()> {
    if layout.rows.is_empty() {
        return Err(ReservationError::InvalidRequest("seat layout has no rows".to_string()));
    }
    if layout.seats_per_row <= 0 {
        return Err(ReservationError::InvalidRequest(format!(
            "seats per row must be positive, got {}",
            layout.seats_per_row
        )));
    }
    if layout.price < Decimal::ZERO {
        return Err(ReservationError::InvalidRequest(format!(
            "seat price must not be negative, got {}",
            layout.price
        )));
    }

    let mut seen = HashSet::new();
    for row in &layout.rows {
        // Digits in a row name would make labels ambiguous (A1 + 1 vs A + 11)
        if row.is_empty() || !row.chars().all(char::is_alphabetic) {
            return Err(ReservationError::InvalidRequest(format!("invalid row name {:?}", row)));
        }
        if !seen.insert(row.as_str()) {
            return Err(ReservationError::InvalidRequest(format!("duplicate row {:?}", row)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_shared::SeatStatus;
    use marquee_store::MemoryStore;

    fn layout(rows: &[&str], seats_per_row: i32) -> SeatLayout {
        SeatLayout::new(
            rows.iter().map(|r| r.to_string()).collect(),
            seats_per_row,
            Decimal::from(250),
        )
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let inventory = SeatInventory::new(Arc::new(MemoryStore::new()));
        let showtime_id = Uuid::new_v4();

        assert!(inventory.initialize_seats(showtime_id, &layout(&["A", "B"], 12)).await.unwrap());
        assert!(!inventory.initialize_seats(showtime_id, &layout(&["A", "B", "C"], 4)).await.unwrap());

        let seats = inventory.get_seats(showtime_id).await.unwrap();
        assert_eq!(seats.len(), 24);
        assert!(seats.iter().all(|s| s.status == SeatStatus::Free));
        // Numeric ordering inside a row
        assert_eq!(seats[1].label, "A2");
        assert_eq!(seats[9].label, "A10");
        assert_eq!(seats[12].label, "B1");
    }

    #[tokio::test]
    async fn test_delete_seats() {
        let inventory = SeatInventory::new(Arc::new(MemoryStore::new()));
        let showtime_id = Uuid::new_v4();
        inventory.initialize_seats(showtime_id, &layout(&["A"], 5)).await.unwrap();

        let now = Utc::now();
        assert_eq!(inventory.delete_seats(showtime_id, now).await.unwrap().seats_removed, 5);
        assert!(inventory.get_seats(showtime_id).await.unwrap().is_empty());
        assert_eq!(inventory.delete_seats(showtime_id, now).await.unwrap().seats_removed, 0);
    }

    #[tokio::test]
    async fn test_rejects_bad_layouts() {
        let inventory = SeatInventory::new(Arc::new(MemoryStore::new()));
        let showtime_id = Uuid::new_v4();

        for bad in [layout(&[], 10), layout(&["A"], 0), layout(&["A", "A"], 3), layout(&["A1"], 3)] {
            let err = inventory.initialize_seats(showtime_id, &bad).await.unwrap_err();
            assert!(matches!(err, ReservationError::InvalidRequest(_)));
        }

        let mut negative = layout(&["A"], 3);
        negative.price = Decimal::from(-1);
        assert!(inventory.initialize_seats(showtime_id, &negative).await.is_err());
        assert!(inventory.get_seats(showtime_id).await.unwrap().is_empty());
    }
}
