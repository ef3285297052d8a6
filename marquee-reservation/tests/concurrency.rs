mod common;

use common::TestCinema;
use marquee_core::ReservationError;
use marquee_shared::{BookingStatus, SeatStatus};
use rust_decimal::Decimal;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_selects_hold_seat_once() {
    let cinema = TestCinema::new().await;
    let showtime_id = cinema.showtime_id;

    let mut handles = Vec::new();
    for n in 0..16 {
        let service = cinema.service.clone();
        handles.push(tokio::spawn(async move {
            service
                .select_seat(&format!("user-{}", n), showtime_id, "B3")
                .await
        }));
    }

    let mut held = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => held += 1,
            Err(ReservationError::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(held, 1);
    assert_eq!(conflicts, 15);

    let active: Vec<_> = cinema
        .service
        .list_all_transactions()
        .await
        .unwrap()
        .into_iter()
        .filter(|record| record.status == BookingStatus::Pending)
        .collect();
    assert_eq!(active.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pay_races_reaper_at_deadline() {
    let cinema = TestCinema::new().await;
    cinema.fund("user-1", 1000).await;
    let booking = cinema
        .service
        .select_seat("user-1", cinema.showtime_id, "A1")
        .await
        .unwrap();
    cinema.advance(600);

    let service = cinema.service.clone();
    let reaper = tokio::spawn(async move { service.reap_expired().await });
    let paid = cinema.service.pay_pending(booking.id).await;
    reaper.await.unwrap().unwrap();

    // The hold ran out: whoever wins, nothing gets charged
    assert!(paid.is_err());
    assert_eq!(cinema.balance("user-1").await, Decimal::from(1000));
    let map = cinema.service.get_seat_map(cinema.showtime_id).await.unwrap();
    assert_eq!(map.seat("A1").unwrap().status, SeatStatus::Free);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pay_and_cancel_resolve_once() {
    let cinema = Arc::new(TestCinema::new().await);
    cinema.fund("user-1", 1000).await;
    let booking = cinema
        .service
        .select_seat("user-1", cinema.showtime_id, "C2")
        .await
        .unwrap();

    let payer = {
        let service = cinema.service.clone();
        tokio::spawn(async move { service.pay_pending(booking.id).await })
    };
    let canceller = {
        let service = cinema.service.clone();
        tokio::spawn(async move { service.cancel_pending(booking.id).await })
    };
    let paid = payer.await.unwrap();
    let cancelled = canceller.await.unwrap();

    assert!(paid.is_ok() != cancelled.is_ok());
    let balance = cinema.balance("user-1").await;
    let map = cinema.service.get_seat_map(cinema.showtime_id).await.unwrap();
    if paid.is_ok() {
        assert_eq!(balance, Decimal::from(750));
        assert_eq!(map.seat("C2").unwrap().status, SeatStatus::Booked);
    } else {
        assert_eq!(balance, Decimal::from(1000));
        assert_eq!(map.seat("C2").unwrap().status, SeatStatus::Free);
    }
}
