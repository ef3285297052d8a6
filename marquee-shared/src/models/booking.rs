use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::ShowtimeInfo;
use super::seat::Seat;

/// Booking status in the ledger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Paid,
    Cancelled,
    Expired,
    Refunded,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Paid => "PAID",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(BookingStatus::Pending),
            "PAID" => Some(BookingStatus::Paid),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "EXPIRED" => Some(BookingStatus::Expired),
            "REFUNDED" => Some(BookingStatus::Refunded),
            _ => None,
        }
    }

    /// Pending or Paid: the booking still owns its seat
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Paid)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// Ledger entry tying a user, a seat and a payment status together
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: String,
    pub showtime_id: Uuid,
    pub seat_label: String,
    pub amount: Decimal,
    pub status: BookingStatus,
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Booking {
    /// New Pending booking for a hold on `seat`, charged at the seat's price
    pub fn pending(user_id: impl Into<String>, seat: &Seat, hold_expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            showtime_id: seat.showtime_id,
            seat_label: seat.label.clone(),
            amount: seat.price,
            status: BookingStatus::Pending,
            hold_expires_at: Some(hold_expires_at),
            created_at: now,
            paid_at: None,
            resolved_at: None,
            version: 1,
        }
    }

    pub fn is_hold_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Pending
            && self.hold_expires_at.map_or(false, |expires_at| expires_at <= now)
    }

    /// Transition: Pending → Paid
    pub fn mark_paid(&mut self, now: DateTime<Utc>) {
        self.status = BookingStatus::Paid;
        self.hold_expires_at = None;
        self.paid_at = Some(now);
        self.version += 1;
    }

    /// Transition: Pending → Cancelled | Expired, Paid → Refunded
    pub fn resolve(&mut self, status: BookingStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.hold_expires_at = None;
        self.resolved_at = Some(now);
        self.version += 1;
    }
}

/// A booking joined with the catalog fields a transaction history displays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub booking_id: Uuid,
    pub user_id: String,
    pub showtime_id: Uuid,
    pub seat_label: String,
    pub amount: Decimal,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub movie_title: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub theater_id: Option<i32>,
}

impl TransactionRecord {
    pub fn new(booking: Booking, showtime: Option<&ShowtimeInfo>) -> Self {
        Self {
            booking_id: booking.id,
            user_id: booking.user_id,
            showtime_id: booking.showtime_id,
            seat_label: booking.seat_label,
            amount: booking.amount,
            status: booking.status,
            created_at: booking.created_at,
            paid_at: booking.paid_at,
            resolved_at: booking.resolved_at,
            movie_title: showtime.map(|s| s.movie_title.clone()),
            starts_at: showtime.map(|s| s.starts_at),
            theater_id: showtime.map(|s| s.theater_id),
        }
    }
}
