// Workspace Scout test infrastructure
//
// Unit tests live next to their modules; these cover behavior that spans
// modules: fake storage roots, full refresh passes, timing-sensitive
// scheduler and prefetch runs on a paused clock.

pub mod helpers;

// ============================================================================
// CATALOG & CACHE
// ============================================================================
pub mod catalog_tests; // Dedup across discovery orders, recency ordering

pub mod scheduler_tests; // Adaptive batches, cancellation, error list
