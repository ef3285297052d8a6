use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Read-only view of a showtime owned by the movie catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowtimeInfo {
    pub showtime_id: Uuid,
    pub movie_title: String,
    pub starts_at: DateTime<Utc>,
    pub theater_id: i32,
}
