use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::repository::{
    Catalog, ChangeSet, RecordKey, ReservationStore, SeatMapRemoval, StoreError, StoreResult,
};
use marquee_shared::{Booking, BookingStatus, Seat, ShowtimeInfo};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    seats: HashMap<(Uuid, String), Seat>,
    bookings: HashMap<Uuid, Booking>,
    accounts: HashMap<String, Decimal>,
}

/// In-process store. A single lock serializes commits, which makes every
/// change set linearizable.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or overwrites a user's account balance
    pub async fn set_balance(&self, user_id: &str, balance: Decimal) {
        let mut state = self.state.write().await;
        state.accounts.insert(user_id.to_string(), balance);
    }
}

fn seat_key(seat: &Seat) -> RecordKey {
    RecordKey::Seat {
        showtime_id: seat.showtime_id,
        label: seat.label.clone(),
    }
}

fn sorted_seats<'a>(seats: impl Iterator<Item = &'a Seat>) -> Vec<Seat> {
    let mut seats: Vec<Seat> = seats.cloned().collect();
    seats.sort_by(|a, b| (a.showtime_id, a.sort_key()).cmp(&(b.showtime_id, b.sort_key())));
    seats
}

fn newest_first(mut bookings: Vec<Booking>) -> Vec<Booking> {
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    bookings
}

impl MemoryState {
    /// Checks every guard of a change set without touching state
    fn validate(&self, changes: &ChangeSet) -> StoreResult<()> {
        for write in &changes.seats {
            let key = (write.seat.showtime_id, write.seat.label.clone());
            match self.seats.get(&key) {
                Some(current) if current.version == write.expected_version => {}
                _ => {
                    return Err(StoreError::VersionConflict {
                        record: seat_key(&write.seat),
                        expected_version: write.expected_version,
                    })
                }
            }
        }

        for write in &changes.bookings {
            let id = write.booking.id;
            match write.expected_version {
                Some(expected) => match self.bookings.get(&id) {
                    Some(current) if current.version == expected => {}
                    _ => {
                        return Err(StoreError::VersionConflict {
                            record: RecordKey::Booking(id),
                            expected_version: expected,
                        })
                    }
                },
                None if self.bookings.contains_key(&id) => {
                    return Err(StoreError::Duplicate(RecordKey::Booking(id)));
                }
                None => {}
            }
        }

        // One active booking per seat, judged on the state after this change set
        let written: HashMap<Uuid, &Booking> = changes
            .bookings
            .iter()
            .map(|write| (write.booking.id, &write.booking))
            .collect();
        let after: Vec<&Booking> = self
            .bookings
            .values()
            .map(|existing| written.get(&existing.id).copied().unwrap_or(existing))
            .chain(
                changes
                    .bookings
                    .iter()
                    .filter(|write| write.expected_version.is_none())
                    .map(|write| &write.booking),
            )
            .collect();

        for inserted in changes.bookings.iter().filter(|w| w.expected_version.is_none()) {
            let booking = &inserted.booking;
            if !booking.status.is_active() {
                continue;
            }
            let clash = after.iter().any(|other| {
                other.id != booking.id
                    && other.status.is_active()
                    && other.showtime_id == booking.showtime_id
                    && other.seat_label == booking.seat_label
            });
            if clash {
                return Err(StoreError::Duplicate(RecordKey::Seat {
                    showtime_id: booking.showtime_id,
                    label: booking.seat_label.clone(),
                }));
            }
        }

        for (user_id, delta) in aggregate_balances(changes) {
            let available = *self
                .accounts
                .get(&user_id)
                .ok_or_else(|| StoreError::AccountNotFound(user_id.clone()))?;
            if delta < Decimal::ZERO && available + delta < Decimal::ZERO {
                return Err(StoreError::InsufficientBalance {
                    user_id,
                    required: -delta,
                    available,
                });
            }
        }

        Ok(())
    }

    fn apply(&mut self, changes: ChangeSet) {
        for (user_id, delta) in aggregate_balances(&changes) {
            if let Some(balance) = self.accounts.get_mut(&user_id) {
                *balance += delta;
            }
        }
        for write in changes.seats {
            self.seats.insert((write.seat.showtime_id, write.seat.label.clone()), write.seat);
        }
        for write in changes.bookings {
            self.bookings.insert(write.booking.id, write.booking);
        }
    }
}

fn aggregate_balances(changes: &ChangeSet) -> HashMap<String, Decimal> {
    let mut totals: HashMap<String, Decimal> = HashMap::new();
    for adjustment in &changes.balances {
        *totals.entry(adjustment.user_id.clone()).or_insert(Decimal::ZERO) += adjustment.delta;
    }
    totals
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn list_seats(&self, showtime_id: Uuid) -> StoreResult<Vec<Seat>> {
        let state = self.state.read().await;
        Ok(sorted_seats(state.seats.values().filter(|s| s.showtime_id == showtime_id)))
    }

    async fn get_seat(&self, showtime_id: Uuid, label: &str) -> StoreResult<Option<Seat>> {
        let state = self.state.read().await;
        Ok(state.seats.get(&(showtime_id, label.to_string())).cloned())
    }

    async fn insert_seats(&self, showtime_id: Uuid, seats: &[Seat]) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.seats.values().any(|s| s.showtime_id == showtime_id) {
            return Ok(false);
        }
        for seat in seats {
            state.seats.insert((showtime_id, seat.label.clone()), seat.clone());
        }
        Ok(true)
    }

    async fn delete_seats(&self, showtime_id: Uuid, now: DateTime<Utc>) -> StoreResult<SeatMapRemoval> {
        let mut state = self.state.write().await;
        let paid = state
            .bookings
            .values()
            .filter(|b| b.showtime_id == showtime_id && b.status == BookingStatus::Paid)
            .count();
        if paid > 0 {
            return Err(StoreError::PaidBookings { showtime_id, paid });
        }

        let mut cancelled = Vec::new();
        for booking in state.bookings.values_mut() {
            if booking.showtime_id == showtime_id && booking.status == BookingStatus::Pending {
                booking.resolve(BookingStatus::Cancelled, now);
                cancelled.push(booking.clone());
            }
        }

        let before = state.seats.len();
        state.seats.retain(|(id, _), _| *id != showtime_id);
        Ok(SeatMapRemoval {
            seats_removed: (before - state.seats.len()) as u64,
            cancelled,
        })
    }

    async fn list_lapsed_holds(&self, now: DateTime<Utc>) -> StoreResult<Vec<Seat>> {
        let state = self.state.read().await;
        Ok(sorted_seats(state.seats.values().filter(|s| s.is_hold_lapsed(now))))
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let state = self.state.read().await;
        Ok(state.bookings.get(&id).cloned())
    }

    async fn list_bookings(&self, user_id: Option<&str>) -> StoreResult<Vec<Booking>> {
        let state = self.state.read().await;
        let bookings = state
            .bookings
            .values()
            .filter(|b| user_id.map_or(true, |user_id| b.user_id == user_id))
            .cloned()
            .collect();
        Ok(newest_first(bookings))
    }

    async fn list_pending_bookings(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let state = self.state.read().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.user_id == user_id && b.status == BookingStatus::Pending)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(bookings)
    }

    async fn get_balance(&self, user_id: &str) -> StoreResult<Option<Decimal>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(user_id).copied())
    }

    async fn commit(&self, changes: ChangeSet) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.validate(&changes)?;
        state.apply(changes);
        Ok(())
    }
}

/// In-process showtime catalog
#[derive(Default)]
pub struct MemoryCatalog {
    showtimes: RwLock<HashMap<Uuid, ShowtimeInfo>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, showtime: ShowtimeInfo) {
        self.showtimes.write().await.insert(showtime.showtime_id, showtime);
    }

    pub async fn remove(&self, showtime_id: Uuid) -> Option<ShowtimeInfo> {
        self.showtimes.write().await.remove(&showtime_id)
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn showtime(&self, showtime_id: Uuid) -> StoreResult<Option<ShowtimeInfo>> {
        Ok(self.showtimes.read().await.get(&showtime_id).cloned())
    }

    async fn list_showtimes(&self) -> StoreResult<Vec<ShowtimeInfo>> {
        let mut showtimes: Vec<ShowtimeInfo> = self.showtimes.read().await.values().cloned().collect();
        showtimes.sort_by(|a, b| a.starts_at.cmp(&b.starts_at));
        Ok(showtimes)
    }
}
