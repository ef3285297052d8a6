use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::ShowtimeInfo;

/// Seat status in the reservation lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Free,
    Held,
    Booked,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Free => "FREE",
            SeatStatus::Held => "HELD",
            SeatStatus::Booked => "BOOKED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FREE" => Some(SeatStatus::Free),
            "HELD" => Some(SeatStatus::Held),
            "BOOKED" => Some(SeatStatus::Booked),
            _ => None,
        }
    }
}

/// One seat of one showtime.
///
/// `version` is the optimistic concurrency token: every transition bumps it,
/// and the store only accepts a write whose expected version matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Seat {
    pub showtime_id: Uuid,
    pub label: String,
    pub row: String,
    pub number: i32,
    pub status: SeatStatus,
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub active_booking: Option<Uuid>,
    pub price: Decimal,
    pub version: i64,
}

impl Seat {
    pub fn new(showtime_id: Uuid, row: impl Into<String>, number: i32, price: Decimal) -> Self {
        let row = row.into();
        Self {
            showtime_id,
            label: format!("{}{}", row, number),
            row,
            number,
            status: SeatStatus::Free,
            hold_expires_at: None,
            active_booking: None,
            price,
            version: 1,
        }
    }

    /// Ordering key for seat maps: row first, then numeric seat number (A2 before A10)
    pub fn sort_key(&self) -> (&str, i32) {
        (self.row.as_str(), self.number)
    }

    /// Held, but the hold ran out and nobody has reaped it yet
    pub fn is_hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Held
            && self.hold_expires_at.map_or(false, |expires_at| expires_at <= now)
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Free || self.is_hold_lapsed(now)
    }

    /// Transition: Free (or lapsed Held) → Held
    pub fn hold(&mut self, booking_id: Uuid, expires_at: DateTime<Utc>) {
        self.status = SeatStatus::Held;
        self.hold_expires_at = Some(expires_at);
        self.active_booking = Some(booking_id);
        self.version += 1;
    }

    /// Transition: Held → Booked
    pub fn book(&mut self) {
        self.status = SeatStatus::Booked;
        self.hold_expires_at = None;
        self.version += 1;
    }

    /// Transition: Held or Booked → Free
    pub fn release(&mut self) {
        self.status = SeatStatus::Free;
        self.hold_expires_at = None;
        self.active_booking = None;
        self.version += 1;
    }
}

/// Fixed rectangular layout used to create the seats of a showtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatLayout {
    pub rows: Vec<String>,
    pub seats_per_row: i32,
    pub price: Decimal,
}

impl SeatLayout {
    pub fn new(rows: Vec<String>, seats_per_row: i32, price: Decimal) -> Self {
        Self {
            rows,
            seats_per_row,
            price,
        }
    }

    pub fn capacity(&self) -> usize {
        self.rows.len() * self.seats_per_row.max(0) as usize
    }

    /// All seats of the layout for a showtime, Free, in seat-map order
    pub fn seats(&self, showtime_id: Uuid) -> Vec<Seat> {
        self.rows
            .iter()
            .flat_map(|row| {
                (1..=self.seats_per_row).map(move |number| Seat::new(showtime_id, row.clone(), number, self.price))
            })
            .collect()
    }
}

/// Seat map of a showtime as shown to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatMap {
    pub showtime: ShowtimeInfo,
    pub seats: Vec<Seat>,
    pub generated_at: DateTime<Utc>,
}

impl SeatMap {
    pub fn available_count(&self) -> usize {
        self.seats
            .iter()
            .filter(|seat| seat.is_available(self.generated_at))
            .count()
    }

    pub fn seat(&self, label: &str) -> Option<&Seat> {
        self.seats.iter().find(|seat| seat.label == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_layout_generates_ordered_seats() {
        let showtime_id = Uuid::new_v4();
        let layout = SeatLayout::new(vec!["A".to_string(), "B".to_string()], 12, Decimal::from(250));

        let seats = layout.seats(showtime_id);
        assert_eq!(seats.len(), layout.capacity());
        assert_eq!(seats[0].label, "A1");
        assert_eq!(seats[1].label, "A2");
        assert_eq!(seats[11].label, "A12");
        assert_eq!(seats[12].label, "B1");
        assert!(seats.iter().all(|s| s.status == SeatStatus::Free && s.version == 1));

        let mut sorted = seats.clone();
        sorted.reverse();
        sorted.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        assert_eq!(sorted, seats);
    }

    #[test]
    fn test_hold_lapses_at_expiry() {
        let now = Utc::now();
        let mut seat = Seat::new(Uuid::new_v4(), "C", 4, Decimal::from(100));
        seat.hold(Uuid::new_v4(), now + Duration::seconds(600));

        assert!(!seat.is_available(now));
        assert!(!seat.is_hold_lapsed(now + Duration::seconds(599)));
        assert!(seat.is_hold_lapsed(now + Duration::seconds(600)));
        assert!(seat.is_available(now + Duration::seconds(601)));
    }

    #[test]
    fn test_transitions_bump_version() {
        let mut seat = Seat::new(Uuid::new_v4(), "A", 1, Decimal::from(100));
        let booking_id = Uuid::new_v4();

        seat.hold(booking_id, Utc::now());
        assert_eq!(seat.version, 2);
        assert_eq!(seat.active_booking, Some(booking_id));

        seat.book();
        assert_eq!(seat.status, SeatStatus::Booked);
        assert!(seat.hold_expires_at.is_none());
        assert_eq!(seat.active_booking, Some(booking_id));

        seat.release();
        assert_eq!(seat.status, SeatStatus::Free);
        assert!(seat.active_booking.is_none());
        assert_eq!(seat.version, 4);
    }

    #[test]
    fn test_status_round_trips_through_column_value() {
        for status in [SeatStatus::Free, SeatStatus::Held, SeatStatus::Booked] {
            assert_eq!(SeatStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SeatStatus::parse("pending"), None);
    }
}
