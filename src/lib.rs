// Workspace Scout - recent-workspace discovery library
//!
//! Scans a code editor's workspace storage roots, keeps a deduplicated catalog
//! of recently used workspaces, and keeps derived metadata (display names,
//! git provenance, usage statistics) fresh through adaptive batched async
//! processing with idle-time prefetch and per-workspace recovery.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod git;
pub mod naming;
pub mod prefetch;
pub mod recovery;
pub mod scheduler;
pub mod state;
pub mod utils;
pub mod watcher;
pub mod workspace;

#[cfg(test)]
pub mod tests;

// Re-export common types
pub use catalog::{WorkspaceCatalog, WorkspaceView};
pub use config::{Config, PerformanceMode};
pub use engine::{OpenIntent, RemovalMode, WorkspaceEngine};
pub use error::{ErrorKind, ScoutError};
