// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ignore rule handling.
//!
//! Not every file of a project belongs on the remote host. Srcship decides
//! what to leave behind through an __ignore rule set__: an ordered list of
//! gitignore-style patterns evaluated against paths relative to the project
//! root.
//!
//! # Rule Sources
//!
//! Every rule set is seeded with one built-in rule that excludes the
//! version-control metadata directory (`.git`). The content of an optional
//! ignore file at the project root (`.gitignore` unless configured
//! otherwise) is appended after it. A project without such a file simply
//! gets the built-in rule.
//!
//! Matching is case-insensitive, because the structured namespace on the
//! remote end does not care about case either. The usual gitignore semantics
//! apply otherwise: `**` wildcards, `!` negation, and trailing-slash
//! directory patterns.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Rule that is always part of a rule set.
pub const BUILTIN_RULE: &str = ".git";

/// Immutable set of ignore rules rooted at a project.
#[derive(Clone, Debug)]
pub struct IgnoreRuleSet {
    root: PathBuf,
    matcher: Gitignore,
}

impl IgnoreRuleSet {
    /// Construct rule set holding only the built-in rule.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Build`] if rule matcher cannot be built.
    pub fn builtin(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_rules(root, std::iter::empty::<&str>())
    }

    /// Construct rule set from built-in rule followed by extra rules.
    ///
    /// Lines that are not valid patterns are skipped with a warning.
    ///
    /// # Errors
    ///
    /// - Return [`Error::Build`] if rule matcher cannot be built.
    pub fn with_rules(
        root: impl Into<PathBuf>,
        rules: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<Self> {
        let root = root.into();
        let mut builder = GitignoreBuilder::new(&root);
        builder.case_insensitive(true).map_err(Error::Build)?;
        builder.add_line(None, BUILTIN_RULE).map_err(Error::Build)?;

        for rule in rules {
            // INVARIANT: Tolerate CRLF ignore files.
            let rule = rule.as_ref().trim_end_matches('\r');
            if let Err(err) = builder.add_line(None, rule) {
                warn!("skip invalid ignore rule {rule:?}: {err}");
            }
        }

        let matcher = builder.build().map_err(Error::Build)?;
        debug!("{} ignore rules active", matcher.num_ignores());

        Ok(Self { root, matcher })
    }

    /// Load rule set for project root.
    ///
    /// Reads `ignore_file` at the project root if it exists.
    ///
    /// # Errors
    ///
    /// - Return [`Error::ReadIgnoreFile`] if ignore file exists, but cannot
    ///   be read.
    /// - Return [`Error::Build`] if rule matcher cannot be built.
    pub fn load(root: impl Into<PathBuf>, ignore_file: &str) -> Result<Self> {
        let root = root.into();
        let path = root.join(ignore_file);
        match read_to_string(&path) {
            Ok(content) => Self::with_rules(root, content.lines()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no ignore file at {:?}", path.display());
                Self::builtin(root)
            }
            Err(err) => Err(Error::ReadIgnoreFile { source: err, path }),
        }
    }

    /// Project root the rules are relative to.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Check if path is ignored.
    ///
    /// The path may be relative to the project root, or absolute under it. A
    /// path is ignored when it, or any of its parent directories, match.
    pub fn is_ignored(&self, path: impl AsRef<Path>, is_dir: bool) -> bool {
        let path = path.as_ref();
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if relative.as_os_str().is_empty() || relative.has_root() {
            return false;
        }

        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}

/// Ignore rule error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Ignore file exists but cannot be read.
    #[error("failed to read ignore file at {:?}", path.display())]
    ReadIgnoreFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Rule matcher cannot be built.
    #[error(transparent)]
    Build(ignore::Error),
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
