use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::repository::{
    ChangeSet, RecordKey, ReservationStore, SeatMapRemoval, SeatWrite, StoreError, StoreResult,
};
use marquee_shared::{Booking, BookingStatus, Seat, SeatStatus};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

const SEAT_COLUMNS: &str =
    "showtime_id, label, seat_row, seat_number, status, hold_expires_at, active_booking, price, version";

const BOOKING_COLUMNS: &str =
    "id, user_id, showtime_id, seat_label, amount, status, hold_expires_at, created_at, paid_at, resolved_at, version";

/// Postgres-backed reservation store.
///
/// Each `commit` runs in one transaction; seat and booking updates are
/// guarded with `WHERE version = $expected`, and the partial unique index
/// `bookings_one_active_per_seat` rejects a second active booking on a seat.
pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct SeatRow {
    showtime_id: Uuid,
    label: String,
    seat_row: String,
    seat_number: i32,
    status: String,
    hold_expires_at: Option<DateTime<Utc>>,
    active_booking: Option<Uuid>,
    price: Decimal,
    version: i64,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        let status = SeatStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Backend(format!("unknown seat status {:?}", row.status)))?;
        Ok(Seat {
            showtime_id: row.showtime_id,
            label: row.label,
            row: row.seat_row,
            number: row.seat_number,
            status,
            hold_expires_at: row.hold_expires_at,
            active_booking: row.active_booking,
            price: row.price,
            version: row.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: String,
    showtime_id: Uuid,
    seat_label: String,
    amount: Decimal,
    status: String,
    hold_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    version: i64,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = BookingStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Backend(format!("unknown booking status {:?}", row.status)))?;
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            showtime_id: row.showtime_id,
            seat_label: row.seat_label,
            amount: row.amount,
            status,
            hold_expires_at: row.hold_expires_at,
            created_at: row.created_at,
            paid_at: row.paid_at,
            resolved_at: row.resolved_at,
            version: row.version,
        })
    }
}

pub(crate) fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn seats_from_rows(rows: Vec<SeatRow>) -> StoreResult<Vec<Seat>> {
    rows.into_iter().map(Seat::try_from).collect()
}

fn bookings_from_rows(rows: Vec<BookingRow>) -> StoreResult<Vec<Booking>> {
    rows.into_iter().map(Booking::try_from).collect()
}

/// Seat writes ordered by `(showtime_id, label)`, the order every
/// transaction locks seat rows in. Labels compare bytewise, matching
/// `COLLATE "C"` on the SQL side.
fn seat_lock_order(seats: &[SeatWrite]) -> Vec<&SeatWrite> {
    let mut ordered: Vec<&SeatWrite> = seats.iter().collect();
    ordered.sort_by(|a, b| {
        a.seat
            .showtime_id
            .cmp(&b.seat.showtime_id)
            .then_with(|| a.seat.label.cmp(&b.seat.label))
    });
    ordered
}

impl PgReservationStore {
    async fn apply_balance(
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        delta: Decimal,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET balance = balance + $1 WHERE user_id = $2 AND balance + $1 >= 0",
        )
        .bind(delta)
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let available: Option<Decimal> = sqlx::query_scalar("SELECT balance FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;

        Err(match available {
            None => StoreError::AccountNotFound(user_id.to_string()),
            Some(available) => StoreError::InsufficientBalance {
                user_id: user_id.to_string(),
                required: -delta,
                available,
            },
        })
    }

    async fn update_seat(tx: &mut Transaction<'_, Postgres>, seat: &Seat, expected_version: i64) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE seats
            SET status = $1, hold_expires_at = $2, active_booking = $3, version = $4
            WHERE showtime_id = $5 AND label = $6 AND version = $7
            "#,
        )
        .bind(seat.status.as_str())
        .bind(seat.hold_expires_at)
        .bind(seat.active_booking)
        .bind(seat.version)
        .bind(seat.showtime_id)
        .bind(&seat.label)
        .bind(expected_version)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::VersionConflict {
                record: RecordKey::Seat {
                    showtime_id: seat.showtime_id,
                    label: seat.label.clone(),
                },
                expected_version,
            });
        }
        Ok(())
    }

    async fn update_booking(
        tx: &mut Transaction<'_, Postgres>,
        booking: &Booking,
        expected_version: i64,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $1, hold_expires_at = $2, paid_at = $3, resolved_at = $4, version = $5
            WHERE id = $6 AND version = $7
            "#,
        )
        .bind(booking.status.as_str())
        .bind(booking.hold_expires_at)
        .bind(booking.paid_at)
        .bind(booking.resolved_at)
        .bind(booking.version)
        .bind(booking.id)
        .bind(expected_version)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::VersionConflict {
                record: RecordKey::Booking(booking.id),
                expected_version,
            });
        }
        Ok(())
    }

    async fn insert_booking(tx: &mut Transaction<'_, Postgres>, booking: &Booking) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, user_id, showtime_id, seat_label, amount, status, hold_expires_at, created_at, paid_at, resolved_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(booking.id)
        .bind(&booking.user_id)
        .bind(booking.showtime_id)
        .bind(&booking.seat_label)
        .bind(booking.amount)
        .bind(booking.status.as_str())
        .bind(booking.hold_expires_at)
        .bind(booking.created_at)
        .bind(booking.paid_at)
        .bind(booking.resolved_at)
        .bind(booking.version)
        .execute(&mut **tx)
        .await
        .map_err(|err| {
            let duplicate_key = err.as_database_error().and_then(|db| {
                if !db.is_unique_violation() {
                    return None;
                }
                Some(match db.constraint() {
                    Some("bookings_pkey") => RecordKey::Booking(booking.id),
                    _ => RecordKey::Seat {
                        showtime_id: booking.showtime_id,
                        label: booking.seat_label.clone(),
                    },
                })
            });
            match duplicate_key {
                Some(record) => StoreError::Duplicate(record),
                None => db_err(err),
            }
        })?;
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn list_seats(&self, showtime_id: Uuid) -> StoreResult<Vec<Seat>> {
        let rows: Vec<SeatRow> = sqlx::query_as(&format!(
            "SELECT {} FROM seats WHERE showtime_id = $1 ORDER BY seat_row, seat_number",
            SEAT_COLUMNS
        ))
        .bind(showtime_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        seats_from_rows(rows)
    }

    async fn get_seat(&self, showtime_id: Uuid, label: &str) -> StoreResult<Option<Seat>> {
        let row: Option<SeatRow> = sqlx::query_as(&format!(
            "SELECT {} FROM seats WHERE showtime_id = $1 AND label = $2",
            SEAT_COLUMNS
        ))
        .bind(showtime_id)
        .bind(label)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(Seat::try_from).transpose()
    }

    async fn insert_seats(&self, showtime_id: Uuid, seats: &[Seat]) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Serializes concurrent initializers of the same showtime
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(showtime_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM seats WHERE showtime_id = $1)")
            .bind(showtime_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        if exists {
            return Ok(false);
        }

        for seat in seats {
            sqlx::query(
                r#"
                INSERT INTO seats (showtime_id, label, seat_row, seat_number, status, hold_expires_at, active_booking, price, version)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(showtime_id)
            .bind(&seat.label)
            .bind(&seat.row)
            .bind(seat.number)
            .bind(seat.status.as_str())
            .bind(seat.hold_expires_at)
            .bind(seat.active_booking)
            .bind(seat.price)
            .bind(seat.version)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn delete_seats(&self, showtime_id: Uuid, now: DateTime<Utc>) -> StoreResult<SeatMapRemoval> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(showtime_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        // Holds and payments on this showtime wait behind these row locks until commit
        sqlx::query(r#"SELECT label FROM seats WHERE showtime_id = $1 ORDER BY label COLLATE "C" FOR UPDATE"#)
            .bind(showtime_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let paid: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE showtime_id = $1 AND status = 'PAID'")
                .bind(showtime_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
        if paid > 0 {
            return Err(StoreError::PaidBookings {
                showtime_id,
                paid: paid as usize,
            });
        }

        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            r#"
            UPDATE bookings
            SET status = 'CANCELLED', hold_expires_at = NULL, resolved_at = $2, version = version + 1
            WHERE showtime_id = $1 AND status = 'PENDING'
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(showtime_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;
        let cancelled = bookings_from_rows(rows)?;

        let result = sqlx::query("DELETE FROM seats WHERE showtime_id = $1")
            .bind(showtime_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(SeatMapRemoval {
            seats_removed: result.rows_affected(),
            cancelled,
        })
    }

    async fn list_lapsed_holds(&self, now: DateTime<Utc>) -> StoreResult<Vec<Seat>> {
        let rows: Vec<SeatRow> = sqlx::query_as(&format!(
            "SELECT {} FROM seats WHERE status = 'HELD' AND hold_expires_at <= $1 ORDER BY hold_expires_at",
            SEAT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        seats_from_rows(rows)
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row: Option<BookingRow> =
            sqlx::query_as(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.map(Booking::try_from).transpose()
    }

    async fn list_bookings(&self, user_id: Option<&str>) -> StoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE ($1::text IS NULL OR user_id = $1) ORDER BY created_at DESC, id",
            BOOKING_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        bookings_from_rows(rows)
    }

    async fn list_pending_bookings(&self, user_id: &str) -> StoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE user_id = $1 AND status = 'PENDING' ORDER BY created_at, id",
            BOOKING_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        bookings_from_rows(rows)
    }

    async fn get_balance(&self, user_id: &str) -> StoreResult<Option<Decimal>> {
        sqlx::query_scalar("SELECT balance FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn commit(&self, changes: ChangeSet) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Deterministic order keeps concurrent commits from deadlocking on accounts
        let mut balances: BTreeMap<&str, Decimal> = BTreeMap::new();
        for adjustment in &changes.balances {
            *balances.entry(adjustment.user_id.as_str()).or_insert(Decimal::ZERO) += adjustment.delta;
        }
        for (user_id, delta) in balances {
            Self::apply_balance(&mut tx, user_id, delta).await?;
        }

        for write in seat_lock_order(&changes.seats) {
            Self::update_seat(&mut tx, &write.seat, write.expected_version).await?;
        }

        // Updates before inserts: retiring a lapsed booking frees the seat for the new one
        for write in &changes.bookings {
            if let Some(expected_version) = write.expected_version {
                Self::update_booking(&mut tx, &write.booking, expected_version).await?;
            }
        }
        for write in changes.bookings.iter().filter(|w| w.expected_version.is_none()) {
            Self::insert_booking(&mut tx, &write.booking).await?;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(
            "Committed change set: {} seats, {} bookings",
            changes.seats.len(),
            changes.bookings.len()
        );
        Ok(())
    }
}
