#![allow(clippy::unwrap_used)]
// Test-mode contract: with the test-mode flag set, the store must
// switch to in-memory semantics even when a file path is configured.

use shellymgr_core::store::{self, StorageConfig};

#[tokio::test]
async fn test_mode_ignores_the_configured_file_path() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("should-not-exist.db");
    let config = StorageConfig {
        dsn: format!("sqlite://{}?mode=rwc", db_path.display()),
        test_mode: true,
        ..Default::default()
    };

    let store = store::connect(&config).await.unwrap();
    store.ping().await.unwrap();

    // The configured file was never touched.
    assert!(!db_path.exists());
    // In-memory stores expose no backup capability.
    assert!(store.backup().is_none());
}
