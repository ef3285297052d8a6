use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};
use serde_json::Value;

use crate::app_config::BusinessRules;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlays rules stored in the `business_rules` table on top of `defaults`
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<(String, Value)> = sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        Ok(apply_rule_overrides(defaults, rows))
    }
}

/// Expected row format: `{"value": <number>}`
fn apply_rule_overrides(defaults: BusinessRules, rows: Vec<(String, Value)>) -> BusinessRules {
    let mut rules = defaults;

    for (rule_key, rule_value) in rows {
        let Some(v) = rule_value.get("value") else {
            warn!("Ignoring business rule {} without a value", rule_key);
            continue;
        };

        match rule_key.as_str() {
            "seat_hold_seconds" => {
                if let Some(u) = v.as_u64() {
                    rules.seat_hold_seconds = u;
                }
            }
            "reap_interval_seconds" => {
                if let Some(u) = v.as_u64() {
                    rules.reap_interval_seconds = u;
                }
            }
            "hold_retry_limit" => {
                if let Some(u) = v.as_u64() {
                    rules.hold_retry_limit = u32::try_from(u).unwrap_or(u32::MAX);
                }
            }
            _ => {}
        }
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_overrides() {
        let rows = vec![
            ("seat_hold_seconds".to_string(), json!({"value": 300})),
            ("reap_interval_seconds".to_string(), json!({"value": 60})),
            ("hold_retry_limit".to_string(), json!({"value": "lots"})),
            ("tax_rate".to_string(), json!({"value": 0.07})),
            ("broken".to_string(), json!(12)),
        ];

        let rules = apply_rule_overrides(BusinessRules::default(), rows);
        assert_eq!(rules.seat_hold_seconds, 300);
        assert_eq!(rules.reap_interval_seconds, 60);
        assert_eq!(rules.hold_retry_limit, 5);
    }
}
