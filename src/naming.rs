//! Display names for catalog entries

use crate::git::GitInfo;
use crate::workspace::CODE_WORKSPACE_EXT;
use url::Url;

/// Last path segment of `uri`, percent-decoded, `.code-workspace` stripped.
pub fn base_name(uri: &str) -> String {
    let local = Url::parse(uri)
        .ok()
        .and_then(|url| url.to_file_path().ok())
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()));

    // Remote schemes keep the raw segment
    let name = local.unwrap_or_else(|| {
        uri.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(uri)
            .to_string()
    });

    let suffix = format!(".{}", CODE_WORKSPACE_EXT);
    match name.strip_suffix(&suffix) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

/// Label shown for a workspace.
///
/// `owner/repo` is used whenever an `upstream` remote exists. Otherwise it is
/// used only when the local `user.name` differs from the remote owner, i.e.
/// the checkout looks like somebody else's repository.
pub fn display_name(uri: &str, git: Option<&GitInfo>) -> String {
    let name = base_name(uri);
    let Some(info) = git.filter(|info| info.is_repo) else {
        return name;
    };
    let Some(repo) = info.repo_info.as_ref() else {
        return name;
    };

    if info.has_upstream {
        return repo.slug();
    }

    match info.user_name.as_deref() {
        Some(user) if !user.eq_ignore_ascii_case(&repo.owner) => repo.slug(),
        _ => name,
    }
}
