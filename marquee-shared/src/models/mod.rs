pub mod booking;
pub mod catalog;
pub mod events;
pub mod seat;
