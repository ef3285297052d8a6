pub mod hold;
pub mod ledger;
pub mod reaper;
pub mod seats;
pub mod service;

pub use hold::{HoldManager, ReapReport};
pub use ledger::{BookingLedger, PaymentSummary};
pub use reaper::{run_reaper, spawn_reaper};
pub use seats::SeatInventory;
pub use service::ReservationService;
