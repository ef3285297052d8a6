use chrono::{DateTime, Duration, Utc};
use marquee_core::repository::{ChangeSet, RecordKey, StoreError};
use marquee_core::{Clock, ReservationError, ReservationResult, ReservationStore, SeatEventBus};
use marquee_shared::{
    Booking, BookingStatus, ReleaseReason, Seat, SeatEvent, SeatHeldEvent, SeatReleasedEvent,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one reap pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Lapsed holds returned to Free
    pub released: usize,
    /// Seats that moved on before the reaper got to them
    pub skipped: usize,
    /// Seats whose commit failed; retried on the next pass
    pub failed: usize,
}

/// A hold granted within one commit
struct GrantedHold {
    seat: Seat,
    booking: Booking,
    /// Lapsed booking that previously held the seat, now Expired
    replaced: Option<Booking>,
}

/// Why a hold attempt did not commit
enum HoldFailure {
    /// Lost a version race; worth another attempt
    Raced(StoreError),
    Rejected(ReservationError),
}

impl From<StoreError> for HoldFailure {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } | StoreError::Duplicate(_) => HoldFailure::Raced(err),
            other => HoldFailure::Rejected(other.into()),
        }
    }
}

impl From<ReservationError> for HoldFailure {
    fn from(err: ReservationError) -> Self {
        HoldFailure::Rejected(err)
    }
}

/// Grants, releases and expires time-limited seat holds.
///
/// Every transition is a read, a check against the read state and a
/// versioned commit; a commit that lost a race changes nothing.
pub struct HoldManager {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    events: SeatEventBus,
    ttl: Duration,
    retry_limit: u32,
}

impl HoldManager {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        events: SeatEventBus,
        ttl: Duration,
        retry_limit: u32,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            ttl,
            retry_limit,
        }
    }

    /// Holds one seat for `user_id` and creates its Pending booking
    pub async fn try_hold(&self, showtime_id: Uuid, label: &str, user_id: &str) -> ReservationResult<Booking> {
        let mut bookings = self.try_hold_many(showtime_id, &[label.to_string()], user_id).await?;
        bookings
            .pop()
            .ok_or_else(|| ReservationError::InvalidRequest(format!("no hold granted on seat {}", label)))
    }

    /// Holds all of `labels` in one commit, or none of them
    pub async fn try_hold_many(
        &self,
        showtime_id: Uuid,
        labels: &[String],
        user_id: &str,
    ) -> ReservationResult<Vec<Booking>> {
        if labels.is_empty() {
            return Err(ReservationError::InvalidRequest("no seats requested".to_string()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = labels.iter().find(|label| !seen.insert(label.as_str())) {
            return Err(ReservationError::InvalidRequest(format!("seat {} requested twice", dup)));
        }

        let mut retries = 0;
        loop {
            match self.attempt_hold(showtime_id, labels, user_id).await {
                Ok(granted) => return Ok(self.announce_holds(user_id, granted)),
                Err(HoldFailure::Rejected(err)) => return Err(err),
                Err(HoldFailure::Raced(err)) if retries < self.retry_limit => {
                    retries += 1;
                    debug!("Hold attempt {} on showtime {} lost a race: {}", retries, showtime_id, err);
                }
                Err(HoldFailure::Raced(err)) => {
                    let seat_label = contested_label(&err).unwrap_or_else(|| labels[0].clone());
                    debug!("Giving up hold on {}/{} after {} retries", showtime_id, seat_label, retries);
                    return Err(ReservationError::Conflict {
                        showtime_id,
                        seat_label,
                    });
                }
            }
        }
    }

    async fn attempt_hold(
        &self,
        showtime_id: Uuid,
        labels: &[String],
        user_id: &str,
    ) -> Result<Vec<GrantedHold>, HoldFailure> {
        let now = self.clock.now();
        let expires_at = now + self.ttl;
        let mut changes = ChangeSet::new();
        let mut granted = Vec::with_capacity(labels.len());

        for label in labels {
            let mut seat = self.store.get_seat(showtime_id, label).await?.ok_or_else(|| {
                ReservationError::NotFound(format!("seat {} of showtime {}", label, showtime_id))
            })?;

            if !seat.is_available(now) {
                return Err(ReservationError::Conflict {
                    showtime_id,
                    seat_label: label.clone(),
                }
                .into());
            }

            let mut replaced = None;
            if seat.is_hold_lapsed(now) {
                if let Some(previous_id) = seat.active_booking {
                    if let Some(mut previous) = self.store.get_booking(previous_id).await? {
                        if previous.status == BookingStatus::Pending {
                            let expected = previous.version;
                            previous.resolve(BookingStatus::Expired, now);
                            changes = changes.update_booking(previous.clone(), expected);
                            replaced = Some(previous);
                        }
                    }
                }
            }

            let booking = Booking::pending(user_id, &seat, expires_at, now);
            let expected = seat.version;
            seat.hold(booking.id, expires_at);
            changes = changes
                .update_seat(seat.clone(), expected)
                .insert_booking(booking.clone());

            granted.push(GrantedHold {
                seat,
                booking,
                replaced,
            });
        }

        self.store.commit(changes).await?;
        Ok(granted)
    }

    fn announce_holds(&self, user_id: &str, granted: Vec<GrantedHold>) -> Vec<Booking> {
        granted
            .into_iter()
            .map(|hold| {
                let held_at = hold.booking.created_at;
                if let Some(previous) = &hold.replaced {
                    info!("Expired lapsed booking {} while re-holding seat {}", previous.id, hold.seat.label);
                    self.events.publish(released_event(&hold.seat, Some(previous.id), ReleaseReason::Expired, held_at));
                }
                info!(
                    "Seat {}/{} held for {} (booking {})",
                    hold.seat.showtime_id, hold.seat.label, user_id, hold.booking.id
                );
                self.events.publish(SeatEvent::Held(SeatHeldEvent {
                    showtime_id: hold.seat.showtime_id,
                    seat_label: hold.seat.label.clone(),
                    booking_id: hold.booking.id,
                    user_id: user_id.to_string(),
                    held_at: held_at.timestamp(),
                    expires_at: hold.seat.hold_expires_at.unwrap_or(held_at).timestamp(),
                }));
                hold.booking
            })
            .collect()
    }

    /// Cancels a Pending hold. `false` when there was nothing to release
    /// or another transition got to the seat first.
    pub async fn release(&self, booking_id: Uuid) -> ReservationResult<bool> {
        self.free_hold(booking_id, BookingStatus::Cancelled, false).await
    }

    /// Like [`HoldManager::release`], but only for a hold that has run out
    pub async fn expire(&self, booking_id: Uuid) -> ReservationResult<bool> {
        self.free_hold(booking_id, BookingStatus::Expired, true).await
    }

    async fn free_hold(&self, booking_id: Uuid, outcome: BookingStatus, only_lapsed: bool) -> ReservationResult<bool> {
        let now = self.clock.now();

        let Some(mut booking) = self.store.get_booking(booking_id).await? else {
            return Ok(false);
        };
        if booking.status != BookingStatus::Pending || (only_lapsed && !booking.is_hold_lapsed(now)) {
            return Ok(false);
        }
        let Some(mut seat) = self.store.get_seat(booking.showtime_id, &booking.seat_label).await? else {
            return Ok(false);
        };
        if seat.active_booking != Some(booking_id) {
            return Ok(false);
        }

        let seat_version = seat.version;
        let booking_version = booking.version;
        seat.release();
        booking.resolve(outcome, now);

        let changes = ChangeSet::new()
            .update_seat(seat.clone(), seat_version)
            .update_booking(booking, booking_version);

        match self.store.commit(changes).await {
            Ok(()) => {
                let reason = match outcome {
                    BookingStatus::Expired => ReleaseReason::Expired,
                    _ => ReleaseReason::Cancelled,
                };
                info!("Released seat {}/{} ({:?})", seat.showtime_id, seat.label, reason);
                self.events.publish(released_event(&seat, Some(booking_id), reason, now));
                Ok(true)
            }
            Err(StoreError::VersionConflict { record, .. }) => {
                debug!("Release of booking {} lost a race on {}", booking_id, record);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Frees every hold that lapsed at or before `now`, one commit per seat
    pub async fn reap(&self, now: DateTime<Utc>) -> ReservationResult<ReapReport> {
        let lapsed = self.store.list_lapsed_holds(now).await?;
        let mut report = ReapReport::default();

        for seat in lapsed {
            let showtime_id = seat.showtime_id;
            let label = seat.label.clone();
            match self.reap_seat(seat, now).await {
                Ok(true) => report.released += 1,
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    warn!("Failed to reap seat {}/{}: {}", showtime_id, label, err);
                    report.failed += 1;
                }
            }
        }

        if report.released > 0 || report.failed > 0 {
            info!(
                "Reaped {} lapsed holds ({} skipped, {} failed)",
                report.released, report.skipped, report.failed
            );
        }
        Ok(report)
    }

    async fn reap_seat(&self, mut seat: Seat, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let booking_id = seat.active_booking;
        let seat_version = seat.version;
        seat.release();
        let mut changes = ChangeSet::new().update_seat(seat.clone(), seat_version);

        if let Some(id) = booking_id {
            if let Some(mut booking) = self.store.get_booking(id).await? {
                if booking.status == BookingStatus::Pending {
                    let expected = booking.version;
                    booking.resolve(BookingStatus::Expired, now);
                    changes = changes.update_booking(booking, expected);
                }
            }
        }

        match self.store.commit(changes).await {
            Ok(()) => {
                self.events.publish(released_event(&seat, booking_id, ReleaseReason::Expired, now));
                Ok(true)
            }
            Err(StoreError::VersionConflict { record, .. }) => {
                debug!("Reaper skipped {}: it moved since the scan", record);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

pub(crate) fn released_event(
    seat: &Seat,
    booking_id: Option<Uuid>,
    reason: ReleaseReason,
    at: DateTime<Utc>,
) -> SeatEvent {
    SeatEvent::Released(SeatReleasedEvent {
        showtime_id: seat.showtime_id,
        seat_label: seat.label.clone(),
        booking_id,
        reason,
        released_at: at.timestamp(),
    })
}

fn contested_label(err: &StoreError) -> Option<String> {
    match err {
        StoreError::VersionConflict {
            record: RecordKey::Seat { label, .. },
            ..
        }
        | StoreError::Duplicate(RecordKey::Seat { label, .. }) => Some(label.clone()),
        _ => None,
    }
}
