#![allow(dead_code)]

use chrono::{Duration, Utc};
use marquee_core::{Clock, ManualClock};
use marquee_reservation::ReservationService;
use marquee_shared::{SeatLayout, ShowtimeInfo};
use marquee_store::{BusinessRules, MemoryCatalog, MemoryStore};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

pub const SEAT_PRICE: i64 = 250;

pub struct TestCinema {
    pub service: Arc<ReservationService>,
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub clock: Arc<ManualClock>,
    pub showtime_id: Uuid,
}

impl TestCinema {
    /// One showtime with rows A-C of four seats each, 600 s holds
    pub async fn new() -> Self {
        Self::with_rules(BusinessRules::default()).await
    }

    pub async fn with_rules(rules: BusinessRules) -> Self {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let showtime_id = Uuid::new_v4();

        catalog
            .insert(ShowtimeInfo {
                showtime_id,
                movie_title: "The General".to_string(),
                starts_at: clock.now() + Duration::days(2),
                theater_id: 3,
            })
            .await;

        let service = Arc::new(ReservationService::new(
            store.clone(),
            catalog.clone(),
            clock.clone(),
            &rules,
        ));
        service
            .initialize_seat_map(showtime_id, &layout())
            .await
            .expect("seat map");

        Self {
            service,
            store,
            catalog,
            clock,
            showtime_id,
        }
    }

    pub async fn fund(&self, user_id: &str, amount: i64) {
        self.store.set_balance(user_id, Decimal::from(amount)).await;
    }

    pub async fn balance(&self, user_id: &str) -> Decimal {
        self.service.account_balance(user_id).await.expect("balance")
    }

    pub fn advance(&self, seconds: i64) {
        self.clock.advance(Duration::seconds(seconds));
    }
}

pub fn layout() -> SeatLayout {
    SeatLayout::new(
        vec!["A".to_string(), "B".to_string(), "C".to_string()],
        4,
        Decimal::from(SEAT_PRICE),
    )
}
