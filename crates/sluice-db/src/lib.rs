pub mod archive;
pub mod config;
pub mod database;

pub use archive::{SqliteArchive, SqliteArchives};
pub use config::DatabaseConfig;
pub use database::Database;
