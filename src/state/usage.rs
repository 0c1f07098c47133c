use super::{StateDocument, default_version};
use chrono::{DateTime, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceUsage {
    pub open_count: u64,
    /// Seconds
    pub total_time_open: u64,
    pub last_open_time: Option<DateTime<Utc>>,
    /// Opens per local hour of day
    pub hourly_stats: [u32; 24],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub workspaces: HashMap<String, WorkspaceUsage>,
}

impl Default for UsageStats {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspaces: HashMap::new(),
        }
    }
}

impl StateDocument for UsageStats {
    const FILE_NAME: &'static str = "usage-stats.json";

    fn forget(&mut self, uri: &str) -> bool {
        self.workspaces.remove(uri).is_some()
    }
}

impl UsageStats {
    pub fn record_open(&mut self, uri: &str) {
        self.record_open_at(uri, Utc::now());
    }

    pub fn record_open_at(&mut self, uri: &str, now: DateTime<Utc>) {
        let usage = self.workspaces.entry(uri.to_string()).or_default();
        usage.open_count += 1;
        usage.last_open_time = Some(now);
        let hour = now.with_timezone(&Local).hour() as usize;
        usage.hourly_stats[hour] += 1;
    }

    pub fn record_close(&mut self, uri: &str, open_for: Duration) {
        self.workspaces
            .entry(uri.to_string())
            .or_default()
            .total_time_open += open_for.as_secs();
    }

    pub fn get(&self, uri: &str) -> Option<&WorkspaceUsage> {
        self.workspaces.get(uri)
    }

    /// URIs by descending open count; ties by most recent open.
    pub fn most_used(&self, limit: usize) -> Vec<(&str, &WorkspaceUsage)> {
        let mut entries: Vec<(&str, &WorkspaceUsage)> = self
            .workspaces
            .iter()
            .map(|(uri, usage)| (uri.as_str(), usage))
            .collect();
        entries.sort_by(|a, b| {
            b.1.open_count
                .cmp(&a.1.open_count)
                .then_with(|| b.1.last_open_time.cmp(&a.1.last_open_time))
        });
        entries.truncate(limit);
        entries
    }
}
