use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marquee_core::repository::{Catalog, StoreResult};
use marquee_shared::ShowtimeInfo;
use sqlx::PgPool;
use uuid::Uuid;

use crate::reservation_repo::db_err;

/// Showtimes joined with their movie, read from the catalog tables
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ShowtimeRow {
    id: Uuid,
    title: String,
    starts_at: DateTime<Utc>,
    theater_id: i32,
}

impl From<ShowtimeRow> for ShowtimeInfo {
    fn from(row: ShowtimeRow) -> Self {
        ShowtimeInfo {
            showtime_id: row.id,
            movie_title: row.title,
            starts_at: row.starts_at,
            theater_id: row.theater_id,
        }
    }
}

const SHOWTIME_SELECT: &str = r#"
    SELECT s.id, m.title, s.starts_at, s.theater_id
    FROM showtimes s
    JOIN movies m ON m.id = s.movie_id
"#;

#[async_trait]
impl Catalog for PgCatalog {
    async fn showtime(&self, showtime_id: Uuid) -> StoreResult<Option<ShowtimeInfo>> {
        let row: Option<ShowtimeRow> = sqlx::query_as(&format!("{} WHERE s.id = $1", SHOWTIME_SELECT))
            .bind(showtime_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(ShowtimeInfo::from))
    }

    async fn list_showtimes(&self) -> StoreResult<Vec<ShowtimeInfo>> {
        let rows: Vec<ShowtimeRow> = sqlx::query_as(&format!("{} ORDER BY s.starts_at, s.id", SHOWTIME_SELECT))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows.into_iter().map(ShowtimeInfo::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_showtime_row_conversion() {
        let id = Uuid::new_v4();
        let starts_at = Utc::now();
        let info = ShowtimeInfo::from(ShowtimeRow {
            id,
            title: "Metropolis".to_string(),
            starts_at,
            theater_id: 4,
        });

        assert_eq!(info.showtime_id, id);
        assert_eq!(info.movie_title, "Metropolis");
        assert_eq!(info.theater_id, 4);
    }
}
