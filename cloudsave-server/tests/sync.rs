//! Two clients reconciling through a live server on an ephemeral port.

use chrono::{Duration, Utc};
use cloudsave::config::RemoteConfig;
use cloudsave::remote::{Connector, HttpConnector};
use cloudsave::repository::{open, RepositoryMode};
use cloudsave::scanner::ScanOutcome;
use cloudsave::service::Service;
use cloudsave::sync::{PolicyResolver, Reconciler, Resolution, SyncOutcome, SyncReport, SyncStatus};
use cloudsave::{Repository, SaveError};
use cloudsave_server::auth::Credentials;
use cloudsave_server::create_router;
use cloudsave_server::state::AppState;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

async fn spawn_server(root: &Path) -> String {
    let repository = open(root, RepositoryMode::Eager).unwrap();
    let mut credentials = Credentials::default();
    credentials.insert("alice", "secret", 4).unwrap();
    let app = create_router(Arc::new(AppState::new(repository, credentials)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn connector(url: &str, password: &str) -> HttpConnector {
    HttpConnector::new(
        vec![RemoteConfig {
            url: url.to_string(),
            username: "alice".to_string(),
            password: password.to_string(),
        }],
        Some(std::time::Duration::from_secs(10)),
    )
}

fn client(root: &Path) -> (Arc<dyn Repository>, Service) {
    let repository = open(&root.join("datastore"), RepositoryMode::Lazy).unwrap();
    (repository.clone(), Service::new(repository))
}

fn save_dir(root: &Path, content: &[u8]) -> PathBuf {
    let dir = root.join("games").join("Celeste");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("profile.sav"), content).unwrap();
    dir
}

async fn sync(repository: &Arc<dyn Repository>, url: &str) -> SyncReport {
    Reconciler::new(repository.clone())
        .sync_all(&connector(url, "secret"), &PolicyResolver(Resolution::Abort))
        .await
        .unwrap()
}

fn synced_outcome(report: &SyncReport) -> &SyncOutcome {
    match &report.entries[0].status {
        SyncStatus::Synced(synced) => &synced.outcome,
        other => panic!("unexpected status {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_save_travels_between_clients() {
    let temp_dir = TempDir::new().unwrap();
    let url = spawn_server(&temp_dir.path().join("server")).await;

    // First client registers, archives and pushes
    let alice_root = temp_dir.path().join("alice");
    let (alice_repo, alice) = client(&alice_root);
    let alice_dir = save_dir(&alice_root, b"chapter 1");
    let game_id = alice.add("Celeste", &alice_dir).unwrap();
    assert_eq!(alice.scan(&game_id).unwrap(), ScanOutcome::Archived { version: 2 });
    alice.set_remote(&game_id, &url).unwrap();

    let report = sync(&alice_repo, &url).await;
    assert_eq!(synced_outcome(&report), &SyncOutcome::Pushed);

    let remote = connector(&url, "secret").connect(&url).unwrap();
    let stored = remote.metadata(&game_id).await.unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.hash, alice.one(&game_id).unwrap().hash);
    assert_eq!(remote.list_games().await.unwrap().len(), 1);

    // Second client clones it
    let bob_root = temp_dir.path().join("bob");
    let (bob_repo, bob) = client(&bob_root);
    let bob_games = bob_root.join("games");
    fs::create_dir_all(&bob_games).unwrap();
    let cloned = bob
        .pull_new(remote.as_ref(), &url, &game_id, &bob_games)
        .await
        .unwrap();
    assert_eq!(cloned.version, 2);
    assert_eq!(cloned.path, bob_games.join("Celeste"));
    assert_eq!(fs::read(bob_games.join("Celeste").join("profile.sav")).unwrap(), b"chapter 1");

    // A new version on the first client reaches the second, backup included
    fs::write(alice_dir.join("profile.sav"), b"chapter 2").unwrap();
    let future = FileTime::from_unix_time((Utc::now() + Duration::seconds(5)).timestamp(), 0);
    filetime::set_file_mtime(alice_dir.join("profile.sav"), future).unwrap();
    assert_eq!(alice.scan(&game_id).unwrap(), ScanOutcome::Archived { version: 3 });

    let report = sync(&alice_repo, &url).await;
    assert_eq!(synced_outcome(&report), &SyncOutcome::Pushed);
    assert_eq!(remote.list_backups(&game_id).await.unwrap().len(), 1);

    let report = sync(&bob_repo, &url).await;
    assert_eq!(synced_outcome(&report), &SyncOutcome::Pulled { version: 3 });
    let SyncStatus::Synced(synced) = &report.entries[0].status else {
        unreachable!()
    };
    assert_eq!(synced.backups.pulled.len(), 1);

    bob.apply_current(&game_id).unwrap();
    assert_eq!(fs::read(bob_games.join("Celeste").join("profile.sav")).unwrap(), b"chapter 2");
    assert_eq!(bob.one(&game_id).unwrap().hash, alice.one(&game_id).unwrap().hash);

    let alice_backup = &alice.all_backups(&game_id).unwrap()[0];
    let bob_backup = &bob.all_backups(&game_id).unwrap()[0];
    assert_eq!(alice_backup.uuid, bob_backup.uuid);
    assert_eq!(alice_backup.hash, bob_backup.hash);
    assert_eq!(alice_backup.created_at, bob_backup.created_at);

    // Nothing left to do
    let report = sync(&alice_repo, &url).await;
    assert!(matches!(synced_outcome(&report), SyncOutcome::UpToDate { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_credentials_mark_remote_unreachable() {
    let temp_dir = TempDir::new().unwrap();
    let url = spawn_server(&temp_dir.path().join("server")).await;

    let root = temp_dir.path().join("alice");
    let (repository, service) = client(&root);
    let game_id = service.add("Celeste", &save_dir(&root, b"chapter 1")).unwrap();
    service.scan(&game_id).unwrap();
    service.set_remote(&game_id, &url).unwrap();

    let unauthorized = connector(&url, "wrong").connect(&url).unwrap();
    assert!(matches!(unauthorized.ping().await, Err(SaveError::Unauthorized(_))));

    let report = Reconciler::new(repository)
        .sync_all(&connector(&url, "wrong"), &PolicyResolver(Resolution::Abort))
        .await
        .unwrap();

    assert!(matches!(report.entries[0].status, SyncStatus::Unreachable(_)));
    assert!(matches!(
        report.into_result(),
        Err(SaveError::PartialFailure { failed: 1, total: 1 })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_version_and_missing_save() {
    let temp_dir = TempDir::new().unwrap();
    let url = spawn_server(&temp_dir.path().join("server")).await;
    let remote = connector(&url, "secret").connect(&url).unwrap();

    let info = remote.version().await.unwrap();
    assert_eq!(info.api_version, cloudsave::remote::API_VERSION);
    assert_eq!(info.os_name, std::env::consts::OS);

    assert!(!remote.exists("unknown").await.unwrap());
    assert!(matches!(
        remote.metadata("unknown").await,
        Err(SaveError::NotFound(_))
    ));
}
