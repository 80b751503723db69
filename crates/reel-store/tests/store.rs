use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use reel_events::SessionState;
use reel_store::{SessionStore, SqliteSessionStore, StoredSession};
use reel_torrent_core::{ContentDescriptor, InfoHash, SelectedFile};
use tempfile::TempDir;

const HASH: &str = "c9e15763f722f23e98a29decdfae341b98d53056";

fn sample(hash: &str, state: SessionState) -> StoredSession {
    StoredSession {
        hash: InfoHash::parse(hash).expect("hash"),
        descriptor: ContentDescriptor::new(format!("magnet:?xt=urn:btih:{hash}"), "Sample"),
        selected_file: Some(SelectedFile {
            index: 1,
            path: "movie/movie.mkv".into(),
            size_bytes: 1_000_000,
        }),
        storage_path: PathBuf::from(format!("/data/{hash}")),
        state,
        created_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).single().expect("date"),
    }
}

#[tokio::test]
async fn rows_survive_reopen() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("reel.sqlite");

    {
        let store = SqliteSessionStore::open(&path).await.expect("open");
        store
            .upsert(&sample(HASH, SessionState::Downloading))
            .await
            .expect("upsert");
        store.pool().close().await;
    }

    let store = SqliteSessionStore::open(&path).await.expect("reopen");
    let rows = store.load_all().await.expect("load");
    assert_eq!(rows, vec![sample(HASH, SessionState::Downloading)]);
}

#[tokio::test]
async fn upsert_replaces_state_and_keeps_created_at() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteSessionStore::open(&dir.path().join("reel.sqlite"))
        .await
        .expect("open");

    store
        .upsert(&sample(HASH, SessionState::Pending))
        .await
        .expect("insert");
    let failed = SessionState::Failed {
        message: "no peers".into(),
    };
    store
        .upsert(&sample(HASH, failed.clone()))
        .await
        .expect("update");

    let rows = store.load_all().await.expect("load");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].state, failed);
}

#[tokio::test]
async fn remove_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteSessionStore::open(&dir.path().join("reel.sqlite"))
        .await
        .expect("open");
    let hash = InfoHash::parse(HASH).expect("hash");

    store
        .upsert(&sample(HASH, SessionState::Paused))
        .await
        .expect("insert");
    store.remove(&hash).await.expect("remove");
    store.remove(&hash).await.expect("second remove");
    assert!(store.load_all().await.expect("load").is_empty());
}

#[tokio::test]
async fn malformed_rows_are_skipped() {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteSessionStore::open(&dir.path().join("reel.sqlite"))
        .await
        .expect("open");
    store
        .upsert(&sample(HASH, SessionState::Paused))
        .await
        .expect("insert");

    let corrupt = [
        ("not-a-hash", "magnet:?xt=urn:btih:x", "paused", "2025-01-01T00:00:00Z", None),
        (
            "0000000000000000000000000000000000000001",
            "magnet:?xt=urn:btih:0000000000000000000000000000000000000001",
            "exploded",
            "2025-01-01T00:00:00Z",
            None,
        ),
        (
            "0000000000000000000000000000000000000002",
            "magnet:?xt=urn:btih:0000000000000000000000000000000000000002",
            "paused",
            "yesterday",
            None,
        ),
        (
            "0000000000000000000000000000000000000003",
            "magnet:?xt=urn:btih:0000000000000000000000000000000000000003",
            "paused",
            "2025-01-01T00:00:00Z",
            Some("{\"index\":"),
        ),
        (
            "0000000000000000000000000000000000000004",
            "magnet:?xt=urn:btih:0000000000000000000000000000000000000004",
            "deleted",
            "2025-01-01T00:00:00Z",
            None,
        ),
    ];
    for (hash, descriptor, state, created_at, selected) in corrupt {
        sqlx::query(
            "INSERT INTO sessions (hash, descriptor, title, selected_file, storage_path, state, created_at, updated_at) \
             VALUES (?1, ?2, 't', ?3, '/tmp/x', ?4, ?5, ?5)",
        )
        .bind(hash)
        .bind(descriptor)
        .bind(selected)
        .bind(state)
        .bind(created_at)
        .execute(store.pool())
        .await
        .expect("raw insert");
    }

    let rows = store.load_all().await.expect("load tolerates corruption");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].hash.as_str(), HASH);
}
