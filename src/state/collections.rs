use super::{StateDocument, default_version};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// `uri -> set of lowercase tags`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagStore {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub tags: BTreeMap<String, BTreeSet<String>>,
}

impl Default for TagStore {
    fn default() -> Self {
        Self {
            version: default_version(),
            tags: BTreeMap::new(),
        }
    }
}

impl StateDocument for TagStore {
    const FILE_NAME: &'static str = "tags.json";

    fn forget(&mut self, uri: &str) -> bool {
        self.tags.remove(uri).is_some()
    }
}

fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim().to_lowercase();
    (!tag.is_empty()).then_some(tag)
}

impl TagStore {
    /// Returns whether the tag was new for this workspace.
    pub fn add(&mut self, uri: &str, tag: &str) -> bool {
        let Some(tag) = normalize_tag(tag) else {
            return false;
        };
        self.tags.entry(uri.to_string()).or_default().insert(tag)
    }

    pub fn remove(&mut self, uri: &str, tag: &str) -> bool {
        let Some(tag) = normalize_tag(tag) else {
            return false;
        };
        let Some(set) = self.tags.get_mut(uri) else {
            return false;
        };
        let removed = set.remove(&tag);
        if set.is_empty() {
            self.tags.remove(uri);
        }
        removed
    }

    pub fn tags_for(&self, uri: &str) -> Vec<&str> {
        self.tags
            .get(uri)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn uris_with(&self, tag: &str) -> Vec<&str> {
        let Some(tag) = normalize_tag(tag) else {
            return Vec::new();
        };
        self.tags
            .iter()
            .filter(|(_, set)| set.contains(&tag))
            .map(|(uri, _)| uri.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorites {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub uris: BTreeSet<String>,
}

impl Default for Favorites {
    fn default() -> Self {
        Self {
            version: default_version(),
            uris: BTreeSet::new(),
        }
    }
}

impl StateDocument for Favorites {
    const FILE_NAME: &'static str = "favorites.json";

    fn forget(&mut self, uri: &str) -> bool {
        self.uris.remove(uri)
    }
}

impl Favorites {
    /// Flip favorite status; returns the new status.
    pub fn toggle(&mut self, uri: &str) -> bool {
        if self.uris.remove(uri) {
            false
        } else {
            self.uris.insert(uri.to_string());
            true
        }
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.uris.contains(uri)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub workspace_uris: Vec<String>,
    #[serde(default)]
    pub expanded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Named groups keyed by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Groups {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub groups: BTreeMap<String, Group>,
}

impl Default for Groups {
    fn default() -> Self {
        Self {
            version: default_version(),
            groups: BTreeMap::new(),
        }
    }
}

impl StateDocument for Groups {
    const FILE_NAME: &'static str = "groups.json";

    fn forget(&mut self, uri: &str) -> bool {
        let mut changed = false;
        for group in self.groups.values_mut() {
            let before = group.workspace_uris.len();
            group.workspace_uris.retain(|u| u != uri);
            changed |= group.workspace_uris.len() != before;
        }
        changed
    }
}

impl Groups {
    /// Create a group; returns `false` if the id is taken.
    pub fn create(&mut self, id: &str, name: &str) -> bool {
        if self.groups.contains_key(id) {
            return false;
        }
        self.groups.insert(
            id.to_string(),
            Group {
                name: name.to_string(),
                expanded: true,
                ..Group::default()
            },
        );
        true
    }

    pub fn delete(&mut self, id: &str) -> Option<Group> {
        self.groups.remove(id)
    }

    /// Add `uri` to group `id`; no-op if absent or already a member.
    pub fn add_member(&mut self, id: &str, uri: &str) -> bool {
        match self.groups.get_mut(id) {
            Some(group) if !group.workspace_uris.iter().any(|u| u == uri) => {
                group.workspace_uris.push(uri.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn remove_member(&mut self, id: &str, uri: &str) -> bool {
        let Some(group) = self.groups.get_mut(id) else {
            return false;
        };
        let before = group.workspace_uris.len();
        group.workspace_uris.retain(|u| u != uri);
        group.workspace_uris.len() != before
    }

    pub fn groups_of(&self, uri: &str) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|(_, g)| g.workspace_uris.iter().any(|u| u == uri))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
