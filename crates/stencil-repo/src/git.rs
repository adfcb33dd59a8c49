//! Git sources
//!
//! Remote refs come from `git ls-remote --symref`. Content is fetched as a
//! single shallow commit into a temporary directory, read into memory and the
//! directory discarded.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use stencil_core::FileMap;
use stencil_core::config::GitConfig;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::error::{RepoError, Result};
use crate::version::{RemoteRefs, is_object_id};

/// Builder for a single git invocation
#[derive(Debug, Clone)]
pub struct GitCommand {
    binary: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    context: Option<String>,
}

impl GitCommand {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
            args: Vec::new(),
            current_dir: None,
            context: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run inside `dir` (passed as `git -C <dir>`)
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Label used in logs
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Run and return stdout
    pub async fn execute(self) -> Result<String> {
        let mut full_args = Vec::new();
        if let Some(dir) = &self.current_dir {
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.iter().cloned());

        tracing::debug!(
            target: "git",
            context = self.context.as_deref().unwrap_or("-"),
            "executing: {} {}",
            self.binary,
            full_args.join(" ")
        );

        let output = Command::new(&self.binary)
            .args(&full_args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RepoError::GitCommand {
                operation: self.operation(),
                stderr: format!("failed to run {}: {}", self.binary, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!(target: "git", code = ?output.status.code(), %stderr, "command failed");
            return Err(RepoError::GitCommand {
                operation: self.operation(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run, discarding stdout
    pub async fn execute_success(self) -> Result<()> {
        self.execute().await.map(|_| ())
    }

    fn operation(&self) -> String {
        self.args.first().cloned().unwrap_or_default()
    }
}

/// Git-backed template source
#[derive(Debug, Clone)]
pub struct GitSource {
    binary: String,
}

impl Default for GitSource {
    fn default() -> Self {
        Self::new(&GitConfig::default())
    }
}

impl GitSource {
    pub fn new(config: &GitConfig) -> Self {
        Self {
            binary: config.binary.clone(),
        }
    }

    fn command(&self) -> GitCommand {
        GitCommand::new(&self.binary)
    }

    /// List the remote's refs
    pub async fn ls_remote(&self, url: &str) -> Result<RemoteRefs> {
        check_url(url)?;
        let output = self
            .command()
            .args(["ls-remote", "--symref", "--", url])
            .with_context("list remote refs")
            .execute()
            .await
            .map_err(|e| RepoError::SourceUnreachable {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        Ok(RemoteRefs::parse(&output))
    }

    /// Resolve a branch, tag, commit or empty spec to a commit hash
    pub async fn resolve_version(&self, url: &str, spec: &str) -> Result<String> {
        let refs = self.ls_remote(url).await?;
        let commit = refs.resolve(spec).ok_or_else(|| RepoError::VersionNotFound {
            name: url.to_string(),
            spec: if spec.is_empty() { "HEAD" } else { spec }.to_string(),
            repo: url.to_string(),
            available: refs.refs.keys().cloned().collect::<Vec<_>>().join(", "),
        })?;

        tracing::debug!(%url, %spec, %commit, "resolved git version");
        Ok(commit)
    }

    /// Fetch one commit and read every file under `path`
    ///
    /// A missing `path` yields an empty map. `commit` must be an object id
    /// and `path` must stay inside the checkout.
    pub async fn fetch_files(&self, url: &str, commit: &str, path: &str) -> Result<FileMap> {
        check_url(url)?;
        if !is_object_id(commit) {
            return Err(RepoError::GitCommand {
                operation: "fetch".to_string(),
                stderr: format!("'{}' is not a commit id", commit),
            });
        }

        let workdir = tempfile::tempdir()?;
        let dir = workdir.path();

        self.command()
            .current_dir(dir)
            .args(["init", "--quiet"])
            .execute_success()
            .await?;
        self.command()
            .current_dir(dir)
            .args(["remote", "add", "--", "origin", url])
            .execute_success()
            .await?;
        self.command()
            .current_dir(dir)
            .args(["fetch", "--quiet", "--depth", "1", "--", "origin", commit])
            .with_context("shallow fetch")
            .execute_success()
            .await
            .map_err(|e| RepoError::SourceUnreachable {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        self.command()
            .current_dir(dir)
            .args(["-c", "advice.detachedHead=false", "checkout", "--quiet", "FETCH_HEAD"])
            .execute_success()
            .await?;

        let root = checkout_subdir(dir, url, path)?;
        let files = read_tree(&root)?;

        tracing::debug!(%url, %commit, %path, files = files.len(), "fetched git tree");
        Ok(files)
    }
}

fn check_url(url: &str) -> Result<()> {
    if url.trim_start().starts_with('-') {
        return Err(RepoError::SourceUnreachable {
            url: url.to_string(),
            message: "git URL must not start with '-'".to_string(),
        });
    }
    Ok(())
}

/// Join `path` onto the checkout at `dir`, refusing anything that leaves it
fn checkout_subdir(dir: &Path, url: &str, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path.trim_matches('/'));
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RepoError::MalformedArtifact {
                    location: url.to_string(),
                    message: format!("template path '{}' escapes the repository", path),
                    hint: Some("use a path relative to the repository root without '..'".to_string()),
                });
            }
        }
    }
    Ok(dir.join(relative))
}

/// Read every file below `root`, keyed by `/`-separated relative path
fn read_tree(root: &Path) -> Result<FileMap> {
    let mut files = FileMap::new();
    if !root.is_dir() {
        return Ok(files);
    }

    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| RepoError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.insert(key, std::fs::read(entry.path())?);
    }

    Ok(files)
}

/// Heuristic for URLs that can only be Git remotes
pub fn looks_like_git(url: &str) -> bool {
    let url = url.trim();
    url.ends_with(".git")
        || url.ends_with(".git/")
        || url.starts_with("ssh://")
        || url.starts_with("git@")
        || url.starts_with("git://")
}
