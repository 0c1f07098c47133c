// Workspace Scout utilities
//
// Small helpers shared across modules.

use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Lock a std mutex, recovering the guard if a previous holder panicked.
pub fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{} mutex poisoned, recovering: {}", name, poisoned);
            poisoned.into_inner()
        }
    }
}
