// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Change-set resolution.
//!
//! Decide which local files are candidates for a deployment run. The
//! __change selection__ picks the policy: working-tree changes or staged
//! changes reported by version control, or the full project tree filtered by
//! ignore rules.

use crate::{deploy::ignore::IgnoreRuleSet, path::to_slash};

use git2::{Repository, Status, StatusOptions};
use ignore::{Walk, WalkBuilder};
use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::canonicalize,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Which files to consider for deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeSelection {
    /// Uncommitted, unstaged changes, including untracked files.
    Working,

    /// Changes staged in the index.
    Staged,

    /// Every file in the project tree not excluded by ignore rules.
    Full,
}

impl Display for ChangeSelection {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Working => "working",
            Self::Staged => "staged",
            Self::Full => "full",
        })
    }
}

/// Kind of change list version control can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Working,
    Staged,
}

/// Local file that may be deployed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateFile {
    /// Absolute local path.
    pub local_path: PathBuf,

    /// Path relative to project root, always with forward slashes.
    pub relative_path: String,
}

impl CandidateFile {
    /// Construct candidate from absolute path under project root.
    ///
    /// Returns `None` if path does not live under project root.
    pub fn from_local(project_root: &Path, local_path: impl Into<PathBuf>) -> Option<Self> {
        let local_path = local_path.into();
        let relative_path = to_slash(local_path.strip_prefix(project_root).ok()?);
        if relative_path.is_empty() {
            return None;
        }

        Some(Self {
            local_path,
            relative_path,
        })
    }
}

/// Version control collaborator.
pub trait VersionControl: Send + Sync {
    /// List absolute paths of changed files in repository rooted at path.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::NoRepositoryForRoot`] if no repository is
    ///   rooted at `repo_root`.
    fn list_changes(&self, repo_root: &Path, kind: ChangeKind) -> Result<Vec<PathBuf>>;
}

/// Version control through libgit2.
#[derive(Debug, Default, Clone, Copy)]
pub struct Git2VersionControl;

impl Git2VersionControl {
    /// Construct new libgit2 version control collaborator.
    pub fn new() -> Self {
        Self
    }
}

impl VersionControl for Git2VersionControl {
    #[instrument(skip(self, repo_root), level = "debug")]
    fn list_changes(&self, repo_root: &Path, kind: ChangeKind) -> Result<Vec<PathBuf>> {
        let no_repository = || ResolveError::NoRepositoryForRoot {
            root: repo_root.to_path_buf(),
        };
        let repository = Repository::open(repo_root).map_err(|_| no_repository())?;
        let workdir = repository.workdir().ok_or_else(no_repository)?.to_path_buf();

        // INVARIANT: Repository must be rooted exactly at the project root.
        let same_root = match (canonicalize(&workdir), canonicalize(repo_root)) {
            (Ok(workdir), Ok(root)) => workdir == root,
            _ => false,
        };
        if !same_root {
            return Err(no_repository());
        }

        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false)
            .exclude_submodules(true);
        let statuses = repository.statuses(Some(&mut options))?;

        let wanted = match kind {
            ChangeKind::Staged => {
                Status::INDEX_NEW
                    | Status::INDEX_MODIFIED
                    | Status::INDEX_RENAMED
                    | Status::INDEX_TYPECHANGE
            }
            ChangeKind::Working => {
                Status::WT_NEW | Status::WT_MODIFIED | Status::WT_RENAMED | Status::WT_TYPECHANGE
            }
        };

        let changes = statuses
            .iter()
            .filter(|entry| entry.status().intersects(wanted))
            .filter_map(|entry| entry.path().map(|path| repo_root.join(path)))
            .collect::<Vec<_>>();
        debug!("{} {kind:?} changes in {:?}", changes.len(), repo_root.display());

        Ok(changes)
    }
}

/// Resolve candidate files of project root.
///
/// Working and staged selections ask version control for the change list.
/// The full selection walks the project tree, and drops anything matched by
/// the ignore rules. No file appears twice. An empty result means there is
/// nothing to deploy, which is not an error.
///
/// # Errors
///
/// - Return [`ResolveError::NoRepositoryForRoot`] if working or staged
///   changes are requested for a project root without a repository.
/// - Return [`ResolveError::Walk`] if project tree cannot be walked.
#[instrument(skip(vcs, project_root, rules), level = "debug")]
pub fn resolve<V>(
    vcs: &V,
    project_root: &Path,
    selection: ChangeSelection,
    rules: &IgnoreRuleSet,
) -> Result<Vec<CandidateFile>>
where
    V: VersionControl + ?Sized,
{
    let candidates = match selection {
        ChangeSelection::Working => changed_files(vcs, project_root, ChangeKind::Working)?,
        ChangeSelection::Staged => changed_files(vcs, project_root, ChangeKind::Staged)?,
        ChangeSelection::Full => walk_tree(project_root, rules).collect::<Result<Vec<_>>>()?,
    };

    if candidates.is_empty() {
        warn!("no {selection} changes in {:?}", project_root.display());
    } else {
        info!("resolved {} {selection} candidates", candidates.len());
    }

    Ok(candidates)
}

fn changed_files<V>(vcs: &V, project_root: &Path, kind: ChangeKind) -> Result<Vec<CandidateFile>>
where
    V: VersionControl + ?Sized,
{
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for path in vcs.list_changes(project_root, kind)? {
        match CandidateFile::from_local(project_root, &path) {
            Some(candidate) => {
                if seen.insert(candidate.relative_path.clone()) {
                    candidates.push(candidate);
                }
            }
            None => warn!("change {:?} lies outside of project root", path.display()),
        }
    }

    Ok(candidates)
}

/// Lazily walk every file of project tree not matched by ignore rules.
///
/// Ignored directories are pruned without being descended into. Files are
/// yielded as they are discovered, in no particular order.
pub fn walk_tree(project_root: &Path, rules: &IgnoreRuleSet) -> TreeWalk {
    let filter = rules.clone();
    let walk = WalkBuilder::new(project_root)
        .standard_filters(false)
        .hidden(false)
        .filter_entry(move |entry| {
            entry.depth() == 0
                || !filter.is_ignored(
                    entry.path(),
                    entry.file_type().is_some_and(|kind| kind.is_dir()),
                )
        })
        .build();

    TreeWalk {
        root: project_root.to_path_buf(),
        walk,
        seen: HashSet::new(),
    }
}

/// Iterator over candidate files of a project tree.
///
/// See [`walk_tree`].
pub struct TreeWalk {
    root: PathBuf,
    walk: Walk,
    seen: HashSet<PathBuf>,
}

impl Iterator for TreeWalk {
    type Item = Result<CandidateFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err.into())),
            };

            if !entry.file_type().is_some_and(|kind| kind.is_file()) {
                continue;
            }

            // INVARIANT: Never yield the same file twice.
            if !self.seen.insert(entry.path().to_path_buf()) {
                continue;
            }

            if let Some(candidate) = CandidateFile::from_local(&self.root, entry.into_path()) {
                return Some(Ok(candidate));
            }
        }
    }
}

/// Change-set resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No repository registered for project root.
    #[error("no repository found for {:?}", root.display())]
    NoRepositoryForRoot { root: PathBuf },

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Project tree cannot be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ResolveError> = std::result::Result<T, E>;
