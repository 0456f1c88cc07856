use sluice_core::traits::{Archive, ArchiveOpener};
use sluice_db::{Database, DatabaseConfig, SqliteArchives};

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn add_then_contains() {
    let (db, _dir) = setup_test_db().await;
    let archive = db.archive();

    assert!(!archive.contains("site123").await.unwrap());
    archive.add("site123").await.unwrap();
    assert!(archive.contains("site123").await.unwrap());
    assert!(!archive.contains("site1234").await.unwrap());
}

#[tokio::test]
async fn duplicate_add_is_ignored() {
    let (db, _dir) = setup_test_db().await;
    let archive = db.archive();

    archive.add("a").await.unwrap();
    archive.add("a").await.unwrap();
    archive.add("b").await.unwrap();
    assert_eq!(archive.len().await.unwrap(), 2);
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let (db, _dir) = setup_test_db().await;
    db.archive().add("kept").await.unwrap();
    db.migrate().await.unwrap();
    assert!(db.archive().contains("kept").await.unwrap());
}

#[tokio::test]
async fn entries_survive_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("archive.sqlite3");

    let first = SqliteArchives::new(DatabaseConfig::default());
    first.open(&path).await.unwrap().add("site1").await.unwrap();
    drop(first);

    let db = Database::connect(&path, &DatabaseConfig::default()).await.unwrap();
    assert!(db.archive().contains("site1").await.unwrap());
}

#[tokio::test]
async fn opener_shares_one_database_per_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.sqlite3");
    let opener = SqliteArchives::new(DatabaseConfig::default());

    let parent = opener.open(&path).await.unwrap();
    let child = opener.open(&path).await.unwrap();
    parent.add("x").await.unwrap();
    assert!(child.contains("x").await.unwrap());
}
