/// Unique temporary directories for tests running in parallel
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

static TEMP_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Create a uniquely named temporary directory.
///
/// The counter keeps names distinct even when two tests share a name prefix.
pub fn unique_temp_dir(test_name: &str) -> TempDir {
    let counter = TEMP_DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
    let unique_name = format!("wscout_test_{}_{}", test_name, counter);

    tempfile::Builder::new()
        .prefix(&unique_name)
        .tempdir()
        .expect("Failed to create unique temp directory")
}
