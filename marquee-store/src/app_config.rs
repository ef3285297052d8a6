use marquee_shared::SeatLayout;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub business_rules: BusinessRules,
    pub seat_map: SeatMapConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BusinessRules {
    #[serde(default = "default_hold_seconds")]
    pub seat_hold_seconds: u64,
    #[serde(default = "default_reap_interval")]
    pub reap_interval_seconds: u64,
    #[serde(default = "default_retry_limit")]
    pub hold_retry_limit: u32,
}

fn default_hold_seconds() -> u64 { 600 }
fn default_reap_interval() -> u64 { 300 }
fn default_retry_limit() -> u32 { 5 }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            seat_hold_seconds: default_hold_seconds(),
            reap_interval_seconds: default_reap_interval(),
            hold_retry_limit: default_retry_limit(),
        }
    }
}

impl BusinessRules {
    pub fn hold_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seat_hold_seconds as i64)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds.max(1))
    }

    /// Logs rule combinations that work but release expired seats late
    pub fn check(&self) {
        if self.reap_interval_seconds * 2 > self.seat_hold_seconds {
            warn!(
                "Reap interval {}s exceeds half the hold TTL {}s; expired seats will be freed late",
                self.reap_interval_seconds, self.seat_hold_seconds
            );
        }
        if self.hold_retry_limit == 0 {
            warn!("hold_retry_limit is 0; every lost hold race surfaces as a conflict immediately");
        }
    }
}

/// Default layout used when seeding the seat map of a showtime
#[derive(Debug, Deserialize, Clone)]
pub struct SeatMapConfig {
    pub rows: Vec<String>,
    pub seats_per_row: i32,
    pub seat_price: Decimal,
}

impl SeatMapConfig {
    pub fn layout(&self) -> SeatLayout {
        SeatLayout::new(self.rows.clone(), self.seats_per_row, self.seat_price)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `MARQUEE__BUSINESS_RULES__SEAT_HOLD_SECONDS=300`
            .add_source(config::Environment::with_prefix("MARQUEE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
