//! Git repository identity
//!
//! [`GitMetadataCache`] is a TTL cache keyed by normalized path;
//! [`GitResolver`] is its read-through consumer that parses `.git/config`.

pub mod cache;
pub mod remote;
pub mod resolver;

pub use cache::{GitInfo, GitInfoUpdate, GitMetadataCache};
pub use remote::{GitConfig, RepoInfo, parse_git_config, parse_remote_url};
pub use resolver::{GIT_READ_TIMEOUT, GitResolver, Resolution};
