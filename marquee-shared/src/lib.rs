pub mod models;

pub use models::booking::{Booking, BookingStatus, TransactionRecord};
pub use models::catalog::ShowtimeInfo;
pub use models::events::{ReleaseReason, SeatBookedEvent, SeatEvent, SeatHeldEvent, SeatReleasedEvent};
pub use models::seat::{Seat, SeatLayout, SeatMap, SeatStatus};
