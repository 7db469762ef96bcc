#![forbid(unsafe_code)]

use regex::Regex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    /// "owner/repo" form used by hosting APIs.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[must_use]
pub fn parse_origin_url(url: &str) -> Option<RepoId> {
    // Accept:
    // - https://host/owner/repo(.git)
    // - ssh://git@host/owner/repo(.git)
    // - git@host:owner/repo(.git)
    let url = url.trim();

    if let Some(rest) = url.strip_prefix("git@") {
        // git@github.com:owner/repo.git
        let (host, path) = rest.split_once(':')?;
        return parse_host_path(host, path);
    }

    let re = Regex::new(r"^(?:(?:https?)|ssh)://(?:git@)?([^/]+)/(.+)$").ok()?;
    let caps = re.captures(url)?;
    let host = caps.get(1)?.as_str();
    let path = caps.get(2)?.as_str();
    parse_host_path(host, path)
}

fn parse_host_path(host: &str, path: &str) -> Option<RepoId> {
    let mut parts = path.trim_matches('/').split('/');
    let owner = parts.next()?.to_owned();
    let repo_raw = parts.next()?.to_owned();
    let repo = repo_raw
        .strip_suffix(".git")
        .unwrap_or(&repo_raw)
        .to_owned();
    Some(RepoId {
        host: host.to_owned(),
        owner,
        repo,
    })
}

/// Generic verbs and filler words dropped when deriving a feature name.
const STOPLIST: &[&str] = &[
    "add", "create", "implement", "build", "write", "a", "an", "the", "to", "for", "of", "with",
    "that", "and", "in", "on",
];

const MAX_FEATURE_WORDS: usize = 4;
const MAX_FEATURE_LEN: usize = 40;

/// Derives a branch-name component from requirement text.
///
/// Significant words survive in order, lowercased and hyphen-joined;
/// deterministic for identical input.
#[must_use]
pub fn extract_feature_name(requirements: &str) -> String {
    let mut words = Vec::new();
    for raw in requirements.split_whitespace() {
        let word: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        if word.is_empty() || STOPLIST.contains(&word.as_str()) {
            continue;
        }
        words.push(word);
        if words.len() == MAX_FEATURE_WORDS {
            break;
        }
    }

    if words.is_empty() {
        return "feature".to_owned();
    }

    let mut name = words.join("-");
    if name.len() > MAX_FEATURE_LEN {
        name.truncate(MAX_FEATURE_LEN);
        name = name.trim_end_matches('-').to_owned();
    }
    name
}

/// Feature name plus a short random suffix, e.g. `status-endpoint-a1b2c3d4`.
#[must_use]
pub fn unique_branch_name(feature_name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    let suffix: String = id.chars().take(8).collect();
    format!("{feature_name}-{suffix}")
}

/// Replaces path separators, control and reserved characters so a name
/// is safe as a workspace directory component.
#[must_use]
pub fn sanitize_for_filesystem(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c == '/' || c == '\\' || c == '\0' || c.is_control() {
            out.push('-');
            continue;
        }
        if matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            out.push('-');
            continue;
        }
        out.push(c);
    }
    while out.contains("--") {
        out = out.replace("--", "-");
    }
    out.trim_matches('-').to_owned()
}
