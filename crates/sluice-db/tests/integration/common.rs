use sluice_db::{Database, DatabaseConfig};
use tempfile::TempDir;

/// Creates a migrated archive database in a fresh temporary directory.
///
/// The `TempDir` must be kept in scope for the test duration; dropping it
/// removes the database file.
pub async fn setup_test_db() -> (Database, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = Database::connect(&dir.path().join("archive.sqlite3"), &DatabaseConfig::default())
        .await
        .expect("Failed to open database");
    db.migrate().await.expect("Failed to run migration");
    (db, dir)
}
