//! Version resolution
//!
//! Floating specs become strict versions before anything is loaded or
//! cached: semver constraints against chart index entries or registry tags,
//! and branch/tag names against a Git remote's refs.

use semver::{Version, VersionReq};
use std::collections::HashMap;

/// Parse a version, accepting a leading `v`
pub fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.trim().trim_start_matches('v')).ok()
}

/// A parsed semver spec
#[derive(Debug, Clone, PartialEq)]
pub enum SemverSpec {
    Exact(Version),
    Range(VersionReq),
}

impl SemverSpec {
    /// Strict versions are exact, everything else must be a requirement.
    /// An empty spec means any version.
    pub fn parse(spec: &str) -> Result<Self, semver::Error> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(SemverSpec::Range(VersionReq::STAR));
        }
        if let Some(v) = parse_version(spec) {
            return Ok(SemverSpec::Exact(v));
        }
        VersionReq::parse(spec).map(SemverSpec::Range)
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            SemverSpec::Exact(v) => v == version,
            SemverSpec::Range(req) => req.matches(version),
        }
    }
}

/// Pick the highest candidate satisfying `spec`
///
/// Candidates that don't parse as semver are ignored. The returned string is
/// the candidate as given, so a registry tag `v1.2.0` stays `v1.2.0`.
pub fn resolve_semver<S: AsRef<str>>(spec: &str, candidates: &[S]) -> Option<String> {
    let parsed = match SemverSpec::parse(spec) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(%spec, error = %e, "version spec is not semver");
            return None;
        }
    };

    candidates
        .iter()
        .filter_map(|c| parse_version(c.as_ref()).map(|v| (v, c.as_ref())))
        .filter(|(v, _)| parsed.matches(v))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, c)| c.to_string())
}

/// Candidates sorted highest first, for error messages
pub fn describe_candidates<S: AsRef<str>>(candidates: &[S]) -> String {
    let mut versions: Vec<Version> = candidates
        .iter()
        .filter_map(|c| parse_version(c.as_ref()))
        .collect();
    versions.sort_by(|a, b| b.cmp(a));

    if versions.is_empty() {
        "none".to_string()
    } else {
        versions
            .iter()
            .map(Version::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Refs advertised by a Git remote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRefs {
    /// Target of the symbolic `HEAD`, e.g. `refs/heads/main`
    pub head_target: Option<String>,

    /// Ref name to commit hash
    pub refs: HashMap<String, String>,
}

impl RemoteRefs {
    /// Parse `git ls-remote --symref` output
    pub fn parse(output: &str) -> Self {
        let mut parsed = RemoteRefs::default();

        for line in output.lines() {
            let Some((left, name)) = line.split_once('\t') else {
                continue;
            };
            let name = name.trim();

            if let Some(target) = left.strip_prefix("ref: ") {
                if name == "HEAD" {
                    parsed.head_target = Some(target.trim().to_string());
                }
                continue;
            }

            parsed.refs.insert(name.to_string(), left.trim().to_string());
        }

        parsed
    }

    /// Resolve a branch, tag or commit spec to a commit hash
    ///
    /// An empty spec follows `HEAD`. Annotated tags resolve to the commit
    /// they point at. A spec matching no ref is taken to be a commit hash,
    /// and must look like one.
    pub fn resolve(&self, spec: &str) -> Option<String> {
        let spec = spec.trim();

        if spec.is_empty() {
            return self
                .head_target
                .as_ref()
                .and_then(|target| self.refs.get(target))
                .or_else(|| self.refs.get("HEAD"))
                .cloned();
        }

        let candidates = [
            format!("refs/heads/{}", spec),
            format!("refs/tags/{}^{{}}", spec),
            format!("refs/tags/{}", spec),
            spec.to_string(),
        ];

        candidates
            .iter()
            .find_map(|name| self.refs.get(name))
            .cloned()
            .or_else(|| is_object_id(spec).then(|| spec.to_ascii_lowercase()))
    }
}

/// Abbreviated or full SHA-1/SHA-256 object id
pub fn is_object_id(spec: &str) -> bool {
    (7..=64).contains(&spec.len()) && spec.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caret_picks_highest_compatible() {
        let candidates = ["1.0.0", "1.2.0", "0.9.0"];
        assert_eq!(resolve_semver("^1.0.0", &candidates), Some("1.2.0".into()));
    }

    #[test]
    fn test_no_match() {
        let candidates = ["1.0.0", "1.2.0"];
        assert_eq!(resolve_semver("2.x", &candidates), None);
    }

    #[test]
    fn test_exact_and_empty_spec() {
        let candidates = ["v1.0.0", "v1.2.0", "latest"];
        assert_eq!(resolve_semver("1.0.0", &candidates), Some("v1.0.0".into()));
        assert_eq!(resolve_semver("v1.0.0", &candidates), Some("v1.0.0".into()));
        assert_eq!(resolve_semver("", &candidates), Some("v1.2.0".into()));
        assert_eq!(resolve_semver("1.1.0", &candidates), None);
    }

    #[test]
    fn test_invalid_spec() {
        assert_eq!(resolve_semver("not a version", &["1.0.0"]), None);
    }

    #[test]
    fn test_describe_candidates() {
        assert_eq!(describe_candidates(&["1.0.0", "x", "1.2.0"]), "1.2.0, 1.0.0");
        assert_eq!(describe_candidates::<&str>(&[]), "none");
    }

    const LS_REMOTE: &str = "ref: refs/heads/main\tHEAD\n\
        1111111111111111111111111111111111111111\tHEAD\n\
        1111111111111111111111111111111111111111\trefs/heads/main\n\
        2222222222222222222222222222222222222222\trefs/heads/release\n\
        3333333333333333333333333333333333333333\trefs/tags/v1.0.0\n\
        4444444444444444444444444444444444444444\trefs/tags/v1.0.0^{}\n\
        5555555555555555555555555555555555555555\trefs/tags/light\n";

    #[test]
    fn test_remote_refs_parse() {
        let refs = RemoteRefs::parse(LS_REMOTE);
        assert_eq!(refs.head_target.as_deref(), Some("refs/heads/main"));
        assert_eq!(refs.refs.len(), 6);
    }

    #[test]
    fn test_remote_refs_resolve() {
        let refs = RemoteRefs::parse(LS_REMOTE);

        assert_eq!(refs.resolve("").unwrap(), "1".repeat(40));
        assert_eq!(refs.resolve("release").unwrap(), "2".repeat(40));
        assert_eq!(refs.resolve("v1.0.0").unwrap(), "4".repeat(40));
        assert_eq!(refs.resolve("light").unwrap(), "5".repeat(40));
        assert_eq!(refs.resolve("abc1234").unwrap(), "abc1234");
        assert_eq!(refs.resolve(&"f".repeat(64)).unwrap(), "f".repeat(64));
    }

    #[test]
    fn test_unknown_spec_must_be_object_id() {
        let refs = RemoteRefs::parse(LS_REMOTE);

        assert_eq!(refs.resolve("--upload-pack=touch /tmp/x;git-upload-pack"), None);
        assert_eq!(refs.resolve("feature/missing"), None);
        assert_eq!(refs.resolve("abc12"), None);
        assert_eq!(refs.resolve(&"a".repeat(65)), None);
        assert_eq!(refs.resolve("ABCDEF0").unwrap(), "abcdef0");
    }

    #[test]
    fn test_empty_remote_has_no_head() {
        assert_eq!(RemoteRefs::default().resolve(""), None);
    }
}
