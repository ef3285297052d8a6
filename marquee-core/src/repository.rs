use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_shared::{Booking, Seat, ShowtimeInfo};
use rust_decimal::Decimal;
use std::fmt;
use uuid::Uuid;

/// Identifies the record a store write was aimed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    Seat { showtime_id: Uuid, label: String },
    Booking(Uuid),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Seat { showtime_id, label } => write!(f, "seat {}/{}", showtime_id, label),
            RecordKey::Booking(id) => write!(f, "booking {}", id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the record moved since it was read.
    #[error("Version conflict on {record}: expected version {expected_version}")]
    VersionConflict { record: RecordKey, expected_version: i64 },
    /// Insert collided with an existing record or with another active booking on the same seat.
    #[error("Duplicate record: {0}")]
    Duplicate(RecordKey),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Insufficient balance for {user_id}: required {required}, available {available}")]
    InsufficientBalance {
        user_id: String,
        required: Decimal,
        available: Decimal,
    },
    /// The showtime still has paid bookings, so its seat map cannot be removed.
    #[error("Showtime {showtime_id} has {paid} paid bookings")]
    PaidBookings { showtime_id: Uuid, paid: usize },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct SeatWrite {
    pub seat: Seat,
    pub expected_version: i64,
}

#[derive(Debug, Clone)]
pub struct BookingWrite {
    pub booking: Booking,
    /// `None` inserts a new booking
    pub expected_version: Option<i64>,
}

/// Signed change to a user's balance; negative deltas are debits
#[derive(Debug, Clone)]
pub struct BalanceAdjustment {
    pub user_id: String,
    pub delta: Decimal,
}

/// A set of writes the store applies all together or not at all
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub seats: Vec<SeatWrite>,
    pub bookings: Vec<BookingWrite>,
    pub balances: Vec<BalanceAdjustment>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_seat(mut self, seat: Seat, expected_version: i64) -> Self {
        self.seats.push(SeatWrite { seat, expected_version });
        self
    }

    pub fn insert_booking(mut self, booking: Booking) -> Self {
        self.bookings.push(BookingWrite {
            booking,
            expected_version: None,
        });
        self
    }

    pub fn update_booking(mut self, booking: Booking, expected_version: i64) -> Self {
        self.bookings.push(BookingWrite {
            booking,
            expected_version: Some(expected_version),
        });
        self
    }

    pub fn adjust_balance(mut self, user_id: impl Into<String>, delta: Decimal) -> Self {
        self.balances.push(BalanceAdjustment {
            user_id: user_id.into(),
            delta,
        });
        self
    }

}

/// What removing a showtime's seat map took with it
#[derive(Debug, Clone, Default)]
pub struct SeatMapRemoval {
    pub seats_removed: u64,
    /// Pending bookings cancelled along with their held seats
    pub cancelled: Vec<Booking>,
}

/// Durable record store behind the reservation core.
///
/// Reads are plain snapshots. Every mutation of an existing seat or booking
/// goes through [`ReservationStore::commit`], which checks the expected
/// version of each written record and applies the whole [`ChangeSet`]
/// atomically.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Seats of a showtime, ordered by row then seat number
    async fn list_seats(&self, showtime_id: Uuid) -> StoreResult<Vec<Seat>>;

    async fn get_seat(&self, showtime_id: Uuid, label: &str) -> StoreResult<Option<Seat>>;

    /// Inserts the seat map only if the showtime has no seats yet.
    /// Returns `false` when seats already existed.
    async fn insert_seats(&self, showtime_id: Uuid, seats: &[Seat]) -> StoreResult<bool>;

    /// Removes the showtime's seats and cancels its pending bookings in one
    /// atomic step. Fails with [`StoreError::PaidBookings`] and changes
    /// nothing while any booking of the showtime is paid.
    async fn delete_seats(&self, showtime_id: Uuid, now: DateTime<Utc>) -> StoreResult<SeatMapRemoval>;

    /// Held seats whose hold expired at or before `now`, across all showtimes
    async fn list_lapsed_holds(&self, now: DateTime<Utc>) -> StoreResult<Vec<Seat>>;

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    /// All bookings, or one user's, newest first
    async fn list_bookings(&self, user_id: Option<&str>) -> StoreResult<Vec<Booking>>;

    async fn list_pending_bookings(&self, user_id: &str) -> StoreResult<Vec<Booking>>;

    async fn get_balance(&self, user_id: &str) -> StoreResult<Option<Decimal>>;

    async fn commit(&self, changes: ChangeSet) -> StoreResult<()>;
}

/// Read-only view of the movie/showtime catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn showtime(&self, showtime_id: Uuid) -> StoreResult<Option<ShowtimeInfo>>;

    async fn list_showtimes(&self) -> StoreResult<Vec<ShowtimeInfo>>;
}
