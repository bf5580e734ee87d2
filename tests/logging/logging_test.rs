//! Tests for `src/logging.rs`.

use cpthook::logging::{init_service, LoggingGuard};

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

// Installs the global subscriber, so it is the only test in this binary
// that initialises logging.
#[test]
fn init_service_creates_logs_dir() {
    let tmp = match tempfile::tempdir() {
        Ok(tmp) => tmp,
        Err(e) => panic!("should create temp dir: {e}"),
    };
    let logs_dir = tmp.path().join("logs");
    assert!(!logs_dir.exists());

    let guard = init_service("debug", Some(&logs_dir));
    assert!(guard.is_ok());
    assert!(logs_dir.exists(), "logs directory should be created");

    tracing::info!("written to the rolling file");
    drop(guard);
}
