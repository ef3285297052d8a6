use marquee_core::{Catalog, Clock, ReservationError, ReservationResult, ReservationStore, SeatEventBus};
use marquee_shared::{
    Booking, ReleaseReason, SeatEvent, SeatLayout, SeatMap, SeatReleasedEvent, ShowtimeInfo, TransactionRecord,
};
use marquee_store::BusinessRules;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::hold::{HoldManager, ReapReport};
use crate::ledger::{BookingLedger, PaymentSummary};
use crate::seats::SeatInventory;

/// Entry point for callers: seat maps, holds, payment and history.
///
/// Holds no per-user state; every operation names the user or booking it acts on.
pub struct ReservationService {
    store: Arc<dyn ReservationStore>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    events: SeatEventBus,
    seats: SeatInventory,
    holds: Arc<HoldManager>,
    ledger: BookingLedger,
}

impl ReservationService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        rules: &BusinessRules,
    ) -> Self {
        let events = SeatEventBus::default();
        let holds = Arc::new(HoldManager::new(
            store.clone(),
            clock.clone(),
            events.clone(),
            rules.hold_ttl(),
            rules.hold_retry_limit,
        ));
        let ledger = BookingLedger::new(
            store.clone(),
            catalog.clone(),
            clock.clone(),
            events.clone(),
            holds.clone(),
        );

        Self {
            seats: SeatInventory::new(store.clone()),
            store,
            catalog,
            clock,
            events,
            holds,
            ledger,
        }
    }

    async fn require_showtime(&self, showtime_id: Uuid) -> ReservationResult<ShowtimeInfo> {
        self.catalog
            .showtime(showtime_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("showtime {}", showtime_id)))
    }

    pub async fn select_seat(&self, user_id: &str, showtime_id: Uuid, label: &str) -> ReservationResult<Booking> {
        self.require_showtime(showtime_id).await?;
        self.holds.try_hold(showtime_id, label, user_id).await
    }

    /// Holds several seats of one showtime, all or none
    pub async fn select_seats(
        &self,
        user_id: &str,
        showtime_id: Uuid,
        labels: &[String],
    ) -> ReservationResult<Vec<Booking>> {
        self.require_showtime(showtime_id).await?;
        self.holds.try_hold_many(showtime_id, labels, user_id).await
    }

    pub async fn pay_pending(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        self.ledger.confirm(booking_id).await
    }

    pub async fn pay_all_pending(&self, user_id: &str) -> ReservationResult<PaymentSummary> {
        self.ledger.confirm_all(user_id).await
    }

    pub async fn cancel_pending(&self, booking_id: Uuid) -> ReservationResult<()> {
        self.ledger.cancel(booking_id).await
    }

    pub async fn admin_refund(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        self.ledger.refund(booking_id).await
    }

    /// Reaps lapsed holds ahead of a read. A failed pass is left to the
    /// reaper; lapsed holds still read as available through the lazy check.
    async fn reap_before_read(&self) {
        if let Err(e) = self.reap_expired().await {
            warn!("Reap before read failed: {}", e);
        }
    }

    /// Current seat map. Lapsed holds are reaped first so they read as Free.
    pub async fn get_seat_map(&self, showtime_id: Uuid) -> ReservationResult<SeatMap> {
        let showtime = self.require_showtime(showtime_id).await?;
        self.reap_before_read().await;
        let seats = self.seats.get_seats(showtime_id).await?;

        Ok(SeatMap {
            showtime,
            seats,
            generated_at: self.clock.now(),
        })
    }

    pub async fn list_user_transactions(&self, user_id: &str) -> ReservationResult<Vec<TransactionRecord>> {
        self.reap_before_read().await;
        self.ledger.list_for_user(user_id).await
    }

    pub async fn list_all_transactions(&self) -> ReservationResult<Vec<TransactionRecord>> {
        self.reap_before_read().await;
        self.ledger.list_all().await
    }

    pub async fn initialize_seat_map(&self, showtime_id: Uuid, layout: &SeatLayout) -> ReservationResult<bool> {
        self.require_showtime(showtime_id).await?;
        self.seats.initialize_seats(showtime_id, layout).await
    }

    /// Removes the showtime's seats and cancels its pending bookings.
    /// Returns how many seats were removed.
    pub async fn delete_seat_map(&self, showtime_id: Uuid) -> ReservationResult<u64> {
        let now = self.clock.now();
        let removal = self.seats.delete_seats(showtime_id, now).await?;
        for booking in &removal.cancelled {
            self.events.publish(SeatEvent::Released(SeatReleasedEvent {
                showtime_id: booking.showtime_id,
                seat_label: booking.seat_label.clone(),
                booking_id: Some(booking.id),
                reason: ReleaseReason::Cancelled,
                released_at: now.timestamp(),
            }));
        }
        Ok(removal.seats_removed)
    }

    /// Creates seat maps for catalog showtimes that have none yet.
    /// Returns how many showtimes were initialized.
    pub async fn seed_seat_maps(&self, layout: &SeatLayout) -> ReservationResult<usize> {
        let mut seeded = 0;
        for showtime in self.catalog.list_showtimes().await? {
            if self.seats.initialize_seats(showtime.showtime_id, layout).await? {
                seeded += 1;
            }
        }
        Ok(seeded)
    }

    pub async fn reap_expired(&self) -> ReservationResult<ReapReport> {
        self.holds.reap(self.clock.now()).await
    }

    pub async fn account_balance(&self, user_id: &str) -> ReservationResult<Decimal> {
        self.store
            .get_balance(user_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("account {}", user_id)))
    }

    /// Live seat transitions of every showtime
    pub fn subscribe(&self) -> broadcast::Receiver<SeatEvent> {
        self.events.subscribe()
    }
}
