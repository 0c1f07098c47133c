//! Remote URL and `.git/config` parsing
//!
//! Pure functions over file contents. Handles `https://`, `ssh://`, `git://`
//! and scp-style `user@host:owner/repo` remotes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

/// `{owner, repo}` pair, always lowercase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub owner: String,
    pub repo: String,
}

impl RepoInfo {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

fn scp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:[^@/\s]+@)?[^:/\s]+:(?P<path>[^\s]+)$").expect("valid scp regex")
    })
}

/// Derive `{owner, repo}` from a remote URL.
pub fn parse_remote_url(remote: &str) -> Option<RepoInfo> {
    let remote = remote.trim();
    if remote.is_empty() {
        return None;
    }

    let path = if remote.contains("://") {
        let url = Url::parse(remote).ok()?;
        match url.scheme() {
            "https" | "http" | "ssh" | "git" | "git+ssh" => url.path().to_string(),
            _ => return None,
        }
    } else {
        scp_pattern().captures(remote)?.name("path")?.as_str().to_string()
    };

    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < 2 {
        return None;
    }

    let repo = segments[segments.len() - 1];
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    let owner = segments[segments.len() - 2];
    if repo.is_empty() || owner.is_empty() {
        return None;
    }

    Some(RepoInfo {
        owner: owner.to_lowercase(),
        repo: repo.to_lowercase(),
    })
}

/// The parts of a git config file the resolver cares about
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GitConfig {
    /// `(remote name, url)` in file order
    pub remotes: Vec<(String, String)>,
    pub user_name: Option<String>,
}

impl GitConfig {
    pub fn remote(&self, name: &str) -> Option<&str> {
        self.remotes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, url)| url.as_str())
    }

    /// `upstream` beats `origin`; otherwise the first remote declared.
    pub fn preferred_remote(&self) -> Option<(&str, &str)> {
        ["upstream", "origin"]
            .iter()
            .find_map(|name| self.remote(name).map(|url| (*name, url)))
            .or_else(|| {
                self.remotes
                    .first()
                    .map(|(n, u)| (n.as_str(), u.as_str()))
            })
    }
}

fn section_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^\[\s*(?P<section>[A-Za-z0-9.-]+)(?:\s+"(?P<sub>[^"]*)")?\s*\]"#)
            .expect("valid section regex")
    })
}

/// Parse the INI-like git config format.
pub fn parse_git_config(contents: &str) -> GitConfig {
    let mut config = GitConfig::default();
    let mut section = String::new();
    let mut subsection: Option<String> = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(caps) = section_pattern().captures(line) {
            section = caps["section"].to_lowercase();
            subsection = caps.name("sub").map(|m| m.as_str().to_string());
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim().trim_matches('"').to_string();

        match (section.as_str(), subsection.as_deref(), key.as_str()) {
            ("remote", Some(name), "url") => config.remotes.push((name.to_string(), value)),
            ("user", None, "name") => config.user_name = Some(value),
            _ => {}
        }
    }

    config
}
