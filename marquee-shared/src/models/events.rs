use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseReason {
    Cancelled,
    Expired,
    Refunded,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct SeatHeldEvent {
    pub showtime_id: Uuid,
    pub seat_label: String,
    pub booking_id: Uuid,
    pub user_id: String,
    pub held_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct SeatBookedEvent {
    pub showtime_id: Uuid,
    pub seat_label: String,
    pub booking_id: Uuid,
    pub user_id: String,
    pub amount: Decimal,
    pub booked_at: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct SeatReleasedEvent {
    pub showtime_id: Uuid,
    pub seat_label: String,
    pub booking_id: Option<Uuid>,
    pub reason: ReleaseReason,
    pub released_at: i64,
}

/// Seat state change, broadcast to live seat-map consumers
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatEvent {
    Held(SeatHeldEvent),
    Booked(SeatBookedEvent),
    Released(SeatReleasedEvent),
}

impl SeatEvent {
    pub fn showtime_id(&self) -> Uuid {
        match self {
            SeatEvent::Held(e) => e.showtime_id,
            SeatEvent::Booked(e) => e.showtime_id,
            SeatEvent::Released(e) => e.showtime_id,
        }
    }

    pub fn seat_label(&self) -> &str {
        match self {
            SeatEvent::Held(e) => &e.seat_label,
            SeatEvent::Booked(e) => &e.seat_label,
            SeatEvent::Released(e) => &e.seat_label,
        }
    }
}
