// src/recovery.rs
//! Per-workspace health tracking and repair
//!
//! Two tiers: try to repair a broken workspace (regenerate its descriptor),
//! and once repair is exhausted, quarantine it by moving its store directory
//! into a timestamped backup. Nothing here deletes anything irreversibly.
//!
//! The manager only decides. [`RecoveryManager::sweep_stale`] returns
//! [`SweepAction`]s that the engine executes, because executing them needs
//! the catalog and the store-directory handles.

use crate::catalog::{Validation, WorkspaceCatalog};
use crate::utils::lock;
use crate::workspace::{Descriptor, RecordProbe};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Recovery attempts allowed per workspace before it is quarantined
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;

/// Minimum time between two recovery attempts for one workspace
pub fn recovery_cooldown() -> Duration {
    Duration::hours(1)
}

/// Workspaces not accessed for this long are swept when broken
pub fn stale_after() -> Duration {
    Duration::days(7)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    pub last_accessed: Option<DateTime<Utc>>,
    pub last_validated: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub recovery_attempts: u32,
    pub last_recovery_attempt: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    RecoveryAttempted,
    Quarantined,
}

impl WorkspaceState {
    pub fn health(&self) -> HealthState {
        if self.error_count == 0 {
            HealthState::Healthy
        } else if self.recovery_attempts >= MAX_RECOVERY_ATTEMPTS {
            HealthState::Quarantined
        } else if self.recovery_attempts > 0 {
            HealthState::RecoveryAttempted
        } else {
            HealthState::Degraded
        }
    }

    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.last_accessed {
            Some(accessed) => now - accessed > stale_after(),
            None => true,
        }
    }
}

/// Decision produced by a stale sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
    AttemptRecovery(String),
    /// Back up the store directory and drop the record and its state
    Orphan(String),
}

#[derive(Debug, Default)]
pub struct RecoveryManager {
    states: Mutex<HashMap<String, WorkspaceState>>,
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, uri: &str) -> Option<WorkspaceState> {
        lock(&self.states, "recovery").get(uri).cloned()
    }

    pub fn health(&self, uri: &str) -> HealthState {
        self.state(uri)
            .map(|s| s.health())
            .unwrap_or(HealthState::Healthy)
    }

    pub fn record_access(&self, uri: &str) {
        self.record_access_at(uri, Utc::now());
    }

    pub fn record_access_at(&self, uri: &str, now: DateTime<Utc>) {
        lock(&self.states, "recovery")
            .entry(uri.to_string())
            .or_default()
            .last_accessed = Some(now);
    }

    pub fn record_validation(&self, uri: &str, ok: bool) {
        self.record_validation_at(uri, ok, Utc::now());
    }

    pub fn record_validation_at(&self, uri: &str, ok: bool, now: DateTime<Utc>) {
        let mut states = lock(&self.states, "recovery");
        let state = states.entry(uri.to_string()).or_default();
        state.last_validated = Some(now);
        if ok {
            state.error_count = 0;
        } else {
            state.error_count += 1;
        }
    }

    pub fn should_attempt_recovery(&self, uri: &str) -> bool {
        self.should_attempt_recovery_at(uri, Utc::now())
    }

    /// Attempts remain and the previous attempt is older than the cooldown.
    ///
    /// Failed validations do not restart the cooldown, so a workspace that
    /// just broke gets its first repair on the next pass.
    pub fn should_attempt_recovery_at(&self, uri: &str, now: DateTime<Utc>) -> bool {
        let states = lock(&self.states, "recovery");
        let Some(state) = states.get(uri) else {
            return true;
        };
        if state.recovery_attempts >= MAX_RECOVERY_ATTEMPTS {
            return false;
        }
        match state.last_recovery_attempt {
            Some(attempted) => now - attempted > recovery_cooldown(),
            None => true,
        }
    }

    fn attempts_exhausted(&self, uri: &str) -> bool {
        lock(&self.states, "recovery")
            .get(uri)
            .is_some_and(|s| s.recovery_attempts >= MAX_RECOVERY_ATTEMPTS)
    }

    pub async fn attempt_recovery(&self, probe: &RecordProbe, descriptor: &Descriptor) -> bool {
        self.attempt_recovery_at(probe, descriptor, Utc::now()).await
    }

    /// Regenerate the descriptor if it is missing, broken or stale, then re-validate.
    pub async fn attempt_recovery_at(
        &self,
        probe: &RecordProbe,
        descriptor: &Descriptor,
        now: DateTime<Utc>,
    ) -> bool {
        let before = WorkspaceCatalog::check(probe).await;
        if matches!(
            before,
            Validation::DescriptorBroken(_) | Validation::DescriptorMismatch(_)
        ) {
            if let Err(e) = rewrite_descriptor(&probe.descriptor_path, descriptor).await {
                warn!(
                    "Could not regenerate descriptor {}: {}",
                    probe.descriptor_path.display(),
                    e
                );
            }
        }

        let after = WorkspaceCatalog::check(probe).await;
        let ok = after.is_valid();

        let mut states = lock(&self.states, "recovery");
        let state = states.entry(probe.uri.clone()).or_default();
        state.recovery_attempts += 1;
        state.last_recovery_attempt = Some(now);
        state.last_validated = Some(now);
        if ok {
            state.error_count = 0;
            info!("Recovered workspace {}", probe.uri);
        } else {
            state.error_count += 1;
            debug!(
                "Recovery attempt {} for {} failed: {:?}",
                state.recovery_attempts, probe.uri, after
            );
        }
        ok
    }

    pub fn sweep_stale(&self, uris: &[String]) -> Vec<SweepAction> {
        self.sweep_stale_at(uris, Utc::now())
    }

    /// Decide what to do with each broken workspace not accessed for a week.
    ///
    /// Only workspaces whose attempts are used up are orphaned; one still in
    /// its cooldown is left for a later sweep.
    pub fn sweep_stale_at(&self, uris: &[String], now: DateTime<Utc>) -> Vec<SweepAction> {
        let candidates: Vec<String> = {
            let states = lock(&self.states, "recovery");
            uris.iter()
                .filter(|uri| {
                    states
                        .get(uri.as_str())
                        .is_some_and(|s| s.error_count > 0 && s.is_stale(now))
                })
                .cloned()
                .collect()
        };

        candidates
            .into_iter()
            .filter_map(|uri| {
                if self.attempts_exhausted(&uri) {
                    Some(SweepAction::Orphan(uri))
                } else if self.should_attempt_recovery_at(&uri, now) {
                    Some(SweepAction::AttemptRecovery(uri))
                } else {
                    debug!("Recovery of {} deferred by cooldown", uri);
                    None
                }
            })
            .collect()
    }

    /// Drop all state for `uri`, e.g. after it was orphaned or removed.
    pub fn forget(&self, uri: &str) {
        lock(&self.states, "recovery").remove(uri);
    }

    pub fn reset(&self) {
        lock(&self.states, "recovery").clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.states, "recovery").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Atomic write: temp file then rename.
async fn rewrite_descriptor(path: &Path, descriptor: &Descriptor) -> std::io::Result<()> {
    let temp = path.with_extension("json.tmp");
    tokio::fs::write(&temp, descriptor.to_json()).await?;
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    debug!("Regenerated descriptor {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_health_transitions() {
        let manager = RecoveryManager::new();
        manager.record_validation_at("file:///a", true, t0());
        assert_eq!(manager.health("file:///a"), HealthState::Healthy);
        manager.record_validation_at("file:///a", false, t0());
        assert_eq!(manager.health("file:///a"), HealthState::Degraded);
    }

    #[test]
    fn test_cooldown_blocks_recovery_storms() {
        let manager = RecoveryManager::new();
        assert!(manager.should_attempt_recovery_at("file:///a", t0()));

        // A failed validation alone never delays the first repair
        manager.record_validation_at("file:///a", false, t0());
        assert!(manager.should_attempt_recovery_at("file:///a", t0() + Duration::minutes(1)));

        mark_attempted(&manager, "file:///a", t0());
        assert!(!manager.should_attempt_recovery_at("file:///a", t0() + Duration::minutes(30)));
        assert!(manager.should_attempt_recovery_at("file:///a", t0() + Duration::minutes(61)));
    }

    fn mark_attempted(manager: &RecoveryManager, uri: &str, at: DateTime<Utc>) {
        let mut states = lock(&manager.states, "recovery");
        let state = states.entry(uri.to_string()).or_default();
        state.recovery_attempts += 1;
        state.last_recovery_attempt = Some(at);
    }

    #[test]
    fn test_sweep_defers_cooling_down_and_orphans_only_exhausted() {
        let manager = RecoveryManager::new();
        let now = t0() + Duration::days(10);
        let uris: Vec<String> = ["file:///fresh", "file:///cooling", "file:///spent"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for uri in &uris {
            manager.record_access_at(uri, t0());
            manager.record_validation_at(uri, false, t0());
        }
        mark_attempted(&manager, "file:///cooling", now - Duration::minutes(10));
        for _ in 0..MAX_RECOVERY_ATTEMPTS {
            mark_attempted(&manager, "file:///spent", t0());
        }

        let actions = manager.sweep_stale_at(&uris, now);
        assert_eq!(
            actions,
            vec![
                SweepAction::AttemptRecovery("file:///fresh".to_string()),
                SweepAction::Orphan("file:///spent".to_string()),
            ]
        );
    }

    #[test]
    fn test_sweep_skips_healthy_and_recent() {
        let manager = RecoveryManager::new();
        let uris = vec!["file:///ok".to_string(), "file:///recent".to_string()];
        manager.record_access_at("file:///ok", t0());
        manager.record_validation_at("file:///ok", true, t0());
        manager.record_access_at("file:///recent", t0() + Duration::days(6));
        manager.record_validation_at("file:///recent", false, t0());

        assert!(manager.sweep_stale_at(&uris, t0() + Duration::days(8)).is_empty());
    }

    #[test]
    fn test_forget_removes_state() {
        let manager = RecoveryManager::new();
        manager.record_access("file:///a");
        manager.forget("file:///a");
        assert!(manager.is_empty());
    }
}
