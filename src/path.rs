// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that srcship needs
//! to read or maintain, and for the remote locations it suggests to the user.

use std::path::{Path, PathBuf};

/// Determine default absolute path to the tool configuration file.
///
/// Uses `$XDG_CONFIG_HOME/srcship/config.toml`. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
pub fn default_config_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("srcship").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Determine default absolute path to the state file.
///
/// The state file backs the settings store, which in turn remembers the
/// deployment target of every project root. Uses
/// `$XDG_DATA_HOME/srcship/state.toml`. Does not check if the path returned
/// actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if data directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_state_file() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("srcship").join("state.toml"))
        .ok_or(NoWayHome)
}

/// Suggest a free-form deploy directory for a project on the remote host.
///
/// Follows the `/home/<user>/builds/<project name>` convention. The project
/// name is the final component of the project root.
pub fn default_deploy_dir(user: &str, project_root: impl AsRef<Path>) -> String {
    let name = project_root
        .as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    format!("/home/{user}/builds/{name}")
}

/// Express a path with forward-slash separators.
pub fn to_slash(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// No way to determine user's configuration or data directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directories")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn suggest_deploy_dir_from_project_name() {
        let result = default_deploy_dir("JDOE", "/home/jdoe/src/payroll");
        assert_eq!(result, "/home/JDOE/builds/payroll");
    }

    #[test]
    fn slash_separated_relative_path() {
        let path: PathBuf = ["a", "b", "c.txt"].iter().collect();
        assert_eq!(to_slash(path), "a/b/c.txt");
    }
}
