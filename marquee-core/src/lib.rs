pub mod clock;
pub mod events;
pub mod repository;

use rust_decimal::Decimal;
use uuid::Uuid;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::SeatEventBus;
pub use repository::{Catalog, ChangeSet, RecordKey, ReservationStore, SeatMapRemoval, StoreError, StoreResult};

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("Seat {seat_label} of showtime {showtime_id} is not available")]
    Conflict {
        showtime_id: Uuid,
        seat_label: String,
    },
    #[error("Booking {0} is not pending")]
    NotPending(Uuid),
    #[error("Booking {0} is not paid")]
    NotPaid(Uuid),
    #[error("Hold for booking {0} has expired")]
    Expired(Uuid),
    #[error("No pending bookings for user {0}")]
    NothingPending(String),
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientBalance { required, available, .. } => {
                ReservationError::InsufficientBalance { required, available }
            }
            StoreError::AccountNotFound(user_id) => ReservationError::NotFound(format!("account {}", user_id)),
            StoreError::PaidBookings { showtime_id, paid } => ReservationError::InvalidRequest(format!(
                "showtime {} has {} paid bookings; refund them before deleting its seat map",
                showtime_id, paid
            )),
            other => ReservationError::Store(other),
        }
    }
}

pub type ReservationResult<T> = Result<T, ReservationError>;
