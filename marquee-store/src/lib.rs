pub mod app_config;
pub mod catalog_repo;
pub mod database;
pub mod memory_repo;
pub mod reservation_repo;

pub use app_config::{BusinessRules, Config};
pub use catalog_repo::PgCatalog;
pub use database::DbClient;
pub use memory_repo::{MemoryCatalog, MemoryStore};
pub use reservation_repo::PgReservationStore;
