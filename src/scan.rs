//! Repository file discovery and path validation.
//!
//! Walks the configured root with `walkdir`, keeping files whose
//! root-relative path matches an include glob and no exclude glob. The
//! same [`PathFilter`] decides which watcher events are relevant and which
//! paths `save` may write to.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};
use walkdir::WalkDir;

use crate::config::RepoConfig;

/// Compiled include/exclude globs for one repository.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    pub fn new(repo: &RepoConfig) -> Result<Self> {
        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(repo.exclude_globs.clone());

        Ok(Self {
            include: build_globset(&repo.include_globs)?,
            exclude: build_globset(&default_excludes)?,
        })
    }

    /// True when a root-relative path is a document of this repository.
    pub fn matches(&self, relative: &str) -> bool {
        !self.exclude.is_match(relative) && self.include.is_match(relative)
    }

    /// True when a root-relative path falls under an exclude glob.
    pub fn excludes(&self, relative: &str) -> bool {
        self.exclude.is_match(relative)
    }
}

/// Result of walking a repository, or part of one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    /// Matching document paths, relative to the root and sorted.
    pub paths: Vec<String>,
    /// Entries the walk could not read (dangling symlinks, unreadable
    /// directories, symlink loops). Each is logged and skipped.
    pub skipped: usize,
}

/// Every document path under `repo.root`.
pub fn scan_repository(repo: &RepoConfig, filter: &PathFilter) -> Result<Scan> {
    let root = &repo.root;
    if !root.exists() {
        bail!("Repository root does not exist: {}", root.display());
    }
    Ok(walk(repo, filter, root))
}

/// Every document path under the root-relative directory `dir`.
pub fn scan_subtree(repo: &RepoConfig, filter: &PathFilter, dir: &str) -> Result<Scan> {
    let start = repo.root.join(dir);
    if !start.is_dir() {
        bail!("Not a directory: {}", start.display());
    }
    Ok(walk(repo, filter, &start))
}

fn walk(repo: &RepoConfig, filter: &PathFilter, start: &Path) -> Scan {
    let root = &repo.root;
    let mut scan = Scan::default();

    for entry in WalkDir::new(start).follow_links(repo.follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                scan.skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let Some(rel_str) = relative_str(relative) else {
            continue;
        };

        if filter.matches(&rel_str) {
            scan.paths.push(rel_str);
        }
    }

    scan.paths.sort();
    scan
}

/// Check that `path` is a relative, non-escaping document path.
pub fn validate_path(path: &str, filter: &PathFilter) -> Result<()> {
    if path.is_empty() {
        bail!("Document path must not be empty");
    }
    let p = Path::new(path);
    for component in p.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => bail!("Document path must not contain '..': {}", path),
            Component::RootDir | Component::Prefix(_) => {
                bail!("Document path must be relative: {}", path)
            }
        }
    }
    if !filter.matches(path) {
        bail!("Document path does not match the repository globs: {}", path);
    }
    Ok(())
}

/// Forward-slash form of a relative path; `None` for non-UTF-8 paths.
pub fn relative_str(relative: &Path) -> Option<String> {
    let parts: Option<Vec<&str>> = relative
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_str())
        .collect();
    parts.map(|p| p.join("/"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
