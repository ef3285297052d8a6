use marquee_core::repository::{ChangeSet, RecordKey, StoreError};
use marquee_core::{Catalog, Clock, ReservationError, ReservationResult, ReservationStore, SeatEventBus};
use marquee_shared::{
    Booking, BookingStatus, ReleaseReason, SeatBookedEvent, SeatEvent, SeatStatus, ShowtimeInfo,
    TransactionRecord,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::hold::{released_event, HoldManager};

/// Result of paying every pending booking of a user at once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentSummary {
    pub paid_count: usize,
    pub total_amount: Decimal,
    pub booking_ids: Vec<Uuid>,
}

/// Payment, cancellation and refund of bookings, plus transaction history
pub struct BookingLedger {
    store: Arc<dyn ReservationStore>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    events: SeatEventBus,
    holds: Arc<HoldManager>,
}

impl BookingLedger {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        events: SeatEventBus,
        holds: Arc<HoldManager>,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            events,
            holds,
        }
    }

    async fn load(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("booking {}", booking_id)))
    }

    /// Transition: Pending → Paid, seat Held → Booked, balance debited
    pub async fn confirm(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        let now = self.clock.now();
        let mut booking = self.load(booking_id).await?;

        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Expired => return Err(ReservationError::Expired(booking_id)),
            _ => return Err(ReservationError::NotPending(booking_id)),
        }
        if booking.is_hold_lapsed(now) {
            self.holds.expire(booking_id).await?;
            return Err(ReservationError::Expired(booking_id));
        }

        let mut seat = self
            .store
            .get_seat(booking.showtime_id, &booking.seat_label)
            .await?
            .filter(|seat| seat.status == SeatStatus::Held && seat.active_booking == Some(booking_id))
            .ok_or(ReservationError::NotPending(booking_id))?;

        let seat_version = seat.version;
        let booking_version = booking.version;
        seat.book();
        booking.mark_paid(now);

        let changes = ChangeSet::new()
            .update_seat(seat, seat_version)
            .update_booking(booking.clone(), booking_version)
            .adjust_balance(booking.user_id.clone(), -booking.amount);

        match self.store.commit(changes).await {
            Ok(()) => {}
            Err(StoreError::VersionConflict { record, .. }) => {
                debug!("Payment of booking {} lost a race on {}", booking_id, record);
                return Err(ReservationError::NotPending(booking_id));
            }
            Err(err) => return Err(err.into()),
        }

        info!("Booking {} paid by {}: {}", booking.id, booking.user_id, booking.amount);
        self.publish_booked(&booking);
        Ok(booking)
    }

    /// Pays every still-valid pending booking of `user_id` in one commit.
    /// Lapsed holds are expired first and are not charged.
    pub async fn confirm_all(&self, user_id: &str) -> ReservationResult<PaymentSummary> {
        let now = self.clock.now();
        let pending = self.store.list_pending_bookings(user_id).await?;

        let mut changes = ChangeSet::new();
        let mut paid = Vec::new();
        let mut total_amount = Decimal::ZERO;

        for mut booking in pending {
            if booking.is_hold_lapsed(now) {
                self.holds.expire(booking.id).await?;
                continue;
            }
            let Some(mut seat) = self.store.get_seat(booking.showtime_id, &booking.seat_label).await? else {
                continue;
            };
            if seat.status != SeatStatus::Held || seat.active_booking != Some(booking.id) {
                continue;
            }

            let seat_version = seat.version;
            let booking_version = booking.version;
            seat.book();
            booking.mark_paid(now);
            total_amount += booking.amount;
            changes = changes
                .update_seat(seat, seat_version)
                .update_booking(booking.clone(), booking_version);
            paid.push(booking);
        }

        if paid.is_empty() {
            return Err(ReservationError::NothingPending(user_id.to_string()));
        }
        changes = changes.adjust_balance(user_id, -total_amount);

        match self.store.commit(changes).await {
            Ok(()) => {}
            Err(StoreError::VersionConflict { record, .. }) => {
                debug!("Bulk payment for {} lost a race on {}", user_id, record);
                let contested = contested_booking(&record, &paid);
                return Err(ReservationError::NotPending(contested));
            }
            Err(err) => return Err(err.into()),
        }

        info!("Paid {} bookings for {}: {}", paid.len(), user_id, total_amount);
        for booking in &paid {
            self.publish_booked(booking);
        }
        Ok(PaymentSummary {
            paid_count: paid.len(),
            total_amount,
            booking_ids: paid.iter().map(|b| b.id).collect(),
        })
    }

    /// Cancels a Pending booking and frees its seat
    pub async fn cancel(&self, booking_id: Uuid) -> ReservationResult<()> {
        let booking = self.load(booking_id).await?;
        if booking.status != BookingStatus::Pending {
            return Err(ReservationError::NotPending(booking_id));
        }
        if booking.is_hold_lapsed(self.clock.now()) {
            self.holds.expire(booking_id).await?;
            return Err(ReservationError::NotPending(booking_id));
        }

        if self.holds.release(booking_id).await? {
            info!("Booking {} cancelled by {}", booking_id, booking.user_id);
            Ok(())
        } else {
            Err(ReservationError::NotPending(booking_id))
        }
    }

    /// Transition: Paid → Refunded. Credits the amount back and frees the seat.
    pub async fn refund(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        let now = self.clock.now();
        let mut booking = self.load(booking_id).await?;
        if booking.status != BookingStatus::Paid {
            return Err(ReservationError::NotPaid(booking_id));
        }

        let mut changes = ChangeSet::new();
        let mut released = None;
        if let Some(mut seat) = self.store.get_seat(booking.showtime_id, &booking.seat_label).await? {
            if seat.status == SeatStatus::Booked && seat.active_booking == Some(booking_id) {
                let seat_version = seat.version;
                seat.release();
                changes = changes.update_seat(seat.clone(), seat_version);
                released = Some(seat);
            }
        }

        let booking_version = booking.version;
        booking.resolve(BookingStatus::Refunded, now);
        changes = changes
            .update_booking(booking.clone(), booking_version)
            .adjust_balance(booking.user_id.clone(), booking.amount);

        match self.store.commit(changes).await {
            Ok(()) => {}
            Err(StoreError::VersionConflict { record, .. }) => {
                debug!("Refund of booking {} lost a race on {}", booking_id, record);
                return Err(ReservationError::NotPaid(booking_id));
            }
            Err(err) => return Err(err.into()),
        }

        info!("Booking {} refunded to {}: {}", booking.id, booking.user_id, booking.amount);
        if let Some(seat) = released {
            self.events
                .publish(released_event(&seat, Some(booking_id), ReleaseReason::Refunded, now));
        }
        Ok(booking)
    }

    /// One user's bookings, newest first
    pub async fn list_for_user(&self, user_id: &str) -> ReservationResult<Vec<TransactionRecord>> {
        let bookings = self.store.list_bookings(Some(user_id)).await?;
        self.with_showtimes(bookings).await
    }

    /// Every booking, newest first
    pub async fn list_all(&self) -> ReservationResult<Vec<TransactionRecord>> {
        let bookings = self.store.list_bookings(None).await?;
        self.with_showtimes(bookings).await
    }

    async fn with_showtimes(&self, bookings: Vec<Booking>) -> ReservationResult<Vec<TransactionRecord>> {
        let mut showtimes: HashMap<Uuid, Option<ShowtimeInfo>> = HashMap::new();
        let mut records = Vec::with_capacity(bookings.len());

        for booking in bookings {
            if !showtimes.contains_key(&booking.showtime_id) {
                let info = self.catalog.showtime(booking.showtime_id).await?;
                showtimes.insert(booking.showtime_id, info);
            }
            let showtime = showtimes.get(&booking.showtime_id).and_then(Option::as_ref);
            records.push(TransactionRecord::new(booking, showtime));
        }
        Ok(records)
    }

    fn publish_booked(&self, booking: &Booking) {
        self.events.publish(SeatEvent::Booked(SeatBookedEvent {
            showtime_id: booking.showtime_id,
            seat_label: booking.seat_label.clone(),
            booking_id: booking.id,
            user_id: booking.user_id.clone(),
            amount: booking.amount,
            booked_at: booking.paid_at.unwrap_or(booking.created_at).timestamp(),
        }));
    }
}

fn contested_booking(record: &RecordKey, paid: &[Booking]) -> Uuid {
    let found = match record {
        RecordKey::Booking(id) => Some(*id),
        RecordKey::Seat { showtime_id, label } => paid
            .iter()
            .find(|b| b.showtime_id == *showtime_id && &b.seat_label == label)
            .map(|b| b.id),
    };
    // Non-empty: only called after at least one booking was staged
    found.unwrap_or_else(|| paid[0].id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use marquee_core::ManualClock;
    use marquee_shared::SeatLayout;
    use marquee_store::{MemoryCatalog, MemoryStore};

    struct Fixture {
        store: Arc<MemoryStore>,
        catalog: Arc<MemoryCatalog>,
        clock: Arc<ManualClock>,
        holds: Arc<HoldManager>,
        ledger: BookingLedger,
        showtime_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let events = SeatEventBus::default();
        let showtime_id = Uuid::new_v4();

        let layout = SeatLayout::new(vec!["A".to_string()], 4, Decimal::from(250));
        store.insert_seats(showtime_id, &layout.seats(showtime_id)).await.unwrap();
        store.set_balance("user-1", Decimal::from(1000)).await;
        catalog
            .insert(ShowtimeInfo {
                showtime_id,
                movie_title: "Nosferatu".to_string(),
                starts_at: clock.now() + Duration::days(1),
                theater_id: 2,
            })
            .await;

        let holds = Arc::new(HoldManager::new(
            store.clone(),
            clock.clone(),
            events.clone(),
            Duration::seconds(600),
            3,
        ));
        let ledger = BookingLedger::new(store.clone(), catalog.clone(), clock.clone(), events, holds.clone());
        Fixture {
            store,
            catalog,
            clock,
            holds,
            ledger,
            showtime_id,
        }
    }

    async fn balance(f: &Fixture) -> Decimal {
        f.store.get_balance("user-1").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_confirm_debits_and_books() {
        let f = fixture().await;
        let booking = f.holds.try_hold(f.showtime_id, "A1", "user-1").await.unwrap();

        let paid = f.ledger.confirm(booking.id).await.unwrap();
        assert_eq!(paid.status, BookingStatus::Paid);
        assert_eq!(paid.paid_at, Some(f.clock.now()));
        assert_eq!(balance(&f).await, Decimal::from(750));

        let seat = f.store.get_seat(f.showtime_id, "A1").await.unwrap().unwrap();
        assert_eq!(seat.status, SeatStatus::Booked);
        assert_eq!(seat.hold_expires_at, None);

        let err = f.ledger.confirm(booking.id).await.unwrap_err();
        assert!(matches!(err, ReservationError::NotPending(_)));
        assert_eq!(balance(&f).await, Decimal::from(750));
    }

    #[tokio::test]
    async fn test_confirm_after_deadline_expires_the_hold() {
        let f = fixture().await;
        let booking = f.holds.try_hold(f.showtime_id, "A1", "user-1").await.unwrap();
        f.clock.advance(Duration::seconds(600));

        let err = f.ledger.confirm(booking.id).await.unwrap_err();
        assert!(matches!(err, ReservationError::Expired(id) if id == booking.id));
        assert_eq!(balance(&f).await, Decimal::from(1000));

        let seat = f.store.get_seat(f.showtime_id, "A1").await.unwrap().unwrap();
        assert_eq!(seat.status, SeatStatus::Free);

        // Already Expired in the store now
        let err = f.ledger.confirm(booking.id).await.unwrap_err();
        assert!(matches!(err, ReservationError::Expired(_)));
    }

    #[tokio::test]
    async fn test_confirm_with_short_balance_changes_nothing() {
        let f = fixture().await;
        f.store.set_balance("user-1", Decimal::from(100)).await;
        let booking = f.holds.try_hold(f.showtime_id, "A1", "user-1").await.unwrap();

        let err = f.ledger.confirm(booking.id).await.unwrap_err();
        assert!(matches!(err, ReservationError::InsufficientBalance { .. }));
        let stored = f.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        assert_eq!(balance(&f).await, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_confirm_unknown_booking() {
        let f = fixture().await;
        let err = f.ledger.confirm(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ReservationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_confirm_all_skips_lapsed_holds() {
        let f = fixture().await;
        let stale = f.holds.try_hold(f.showtime_id, "A1", "user-1").await.unwrap();
        f.clock.advance(Duration::seconds(400));
        let fresh_a = f.holds.try_hold(f.showtime_id, "A2", "user-1").await.unwrap();
        f.clock.advance(Duration::seconds(1));
        let fresh_b = f.holds.try_hold(f.showtime_id, "A3", "user-1").await.unwrap();
        f.clock.advance(Duration::seconds(200));

        let summary = f.ledger.confirm_all("user-1").await.unwrap();
        assert_eq!(summary.paid_count, 2);
        assert_eq!(summary.total_amount, Decimal::from(500));
        assert_eq!(summary.booking_ids, vec![fresh_a.id, fresh_b.id]);
        assert_eq!(balance(&f).await, Decimal::from(500));

        let stale = f.store.get_booking(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status, BookingStatus::Expired);

        let err = f.ledger.confirm_all("user-1").await.unwrap_err();
        assert!(matches!(err, ReservationError::NothingPending(ref user) if user == "user-1"));
    }

    #[tokio::test]
    async fn test_cancel_is_not_repeatable() {
        let f = fixture().await;
        let booking = f.holds.try_hold(f.showtime_id, "A1", "user-1").await.unwrap();

        f.ledger.cancel(booking.id).await.unwrap();
        let err = f.ledger.cancel(booking.id).await.unwrap_err();
        assert!(matches!(err, ReservationError::NotPending(_)));

        let stored = f.store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_refund_restores_balance_and_frees_seat() {
        let f = fixture().await;
        let booking = f.holds.try_hold(f.showtime_id, "A4", "user-1").await.unwrap();
        f.ledger.confirm(booking.id).await.unwrap();

        let refunded = f.ledger.refund(booking.id).await.unwrap();
        assert_eq!(refunded.status, BookingStatus::Refunded);
        assert!(refunded.resolved_at.is_some());
        assert_eq!(balance(&f).await, Decimal::from(1000));

        let seat = f.store.get_seat(f.showtime_id, "A4").await.unwrap().unwrap();
        assert_eq!(seat.status, SeatStatus::Free);
        assert_eq!(seat.active_booking, None);

        let err = f.ledger.refund(booking.id).await.unwrap_err();
        assert!(matches!(err, ReservationError::NotPaid(_)));
    }

    #[tokio::test]
    async fn test_history_joins_catalog() {
        let f = fixture().await;
        let first = f.holds.try_hold(f.showtime_id, "A1", "user-1").await.unwrap();
        f.clock.advance(Duration::seconds(5));
        let second = f.holds.try_hold(f.showtime_id, "A2", "user-1").await.unwrap();
        f.holds.try_hold(f.showtime_id, "A3", "user-2").await.unwrap();

        let mine = f.ledger.list_for_user("user-1").await.unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].booking_id, second.id);
        assert_eq!(mine[1].booking_id, first.id);
        assert_eq!(mine[0].movie_title.as_deref(), Some("Nosferatu"));
        assert_eq!(mine[0].theater_id, Some(2));

        f.catalog.remove(f.showtime_id).await;
        let all = f.ledger.list_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|record| record.movie_title.is_none()));
    }

    #[test]
    fn test_contested_booking_lookup() {
        let seat_owner = Booking {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            showtime_id: Uuid::new_v4(),
            seat_label: "B2".to_string(),
            amount: Decimal::from(250),
            status: BookingStatus::Paid,
            hold_expires_at: None,
            created_at: Utc::now(),
            paid_at: None,
            resolved_at: None,
            version: 2,
        };
        let record = RecordKey::Seat {
            showtime_id: seat_owner.showtime_id,
            label: "B2".to_string(),
        };
        assert_eq!(contested_booking(&record, std::slice::from_ref(&seat_owner)), seat_owner.id);

        let other = Uuid::new_v4();
        assert_eq!(contested_booking(&RecordKey::Booking(other), &[seat_owner]), other);
    }
}
