// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for configuration files that srcship uses to simplify
//! the process of serialization and deserialization. File I/O is left to the
//! caller to figure out.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Default number of transfers that may be in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Tool settings.
///
/// Settings that apply to every project, e.g., which host to talk to, and how
/// hard to push it during free-form transfers.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Destination handed to the ssh program, e.g., "jdoe@pub400".
    pub host: Option<String>,

    /// Bounded concurrency for free-form transfers.
    pub concurrency: usize,

    /// Name of ignore file looked up at the project root.
    pub ignore_file: String,

    /// Program used for remote command execution and byte transfer.
    pub ssh_program: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: None,
            concurrency: DEFAULT_CONCURRENCY,
            ignore_file: ".gitignore".into(),
            ssh_program: "ssh".into(),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: At least one transfer must be allowed in flight.
        if settings.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be greater than zero".into(),
            ));
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Project definition layout.
///
/// A project may carry a `srcship.toml` file at its root. This file lists
/// the object library that builds land in, library list adjustments, and the
/// __actions__ that can be run against deployed source.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProjectDefinition {
    /// Version of the project.
    pub version: String,

    /// Brief description of the project.
    pub description: String,

    /// Remote repository of the project.
    #[serde(default)]
    pub repository: String,

    /// Library that compiled objects are placed in.
    pub objlib: String,

    /// Current library used while running actions.
    #[serde(default)]
    pub curlib: String,

    /// Additional include directories.
    #[serde(default)]
    pub include_path: Vec<String>,

    /// Libraries placed in front of the user library list.
    #[serde(default)]
    pub pre_usrlibl: Vec<String>,

    /// Libraries placed at the end of the user library list.
    #[serde(default)]
    pub post_usrlibl: Vec<String>,

    /// Available actions.
    #[serde(rename = "action", default)]
    pub actions: Vec<Action>,
}

impl ProjectDefinition {
    /// List actions applicable to a file extension.
    ///
    /// Actions without an extension listing apply to every file. Extension
    /// comparison ignores case.
    pub fn actions_for(&self, extension: &str) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|action| match &action.extensions {
                None => true,
                Some(extensions) => extensions
                    .iter()
                    .any(|ext| ext.eq_ignore_ascii_case(extension)),
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.objlib.trim().is_empty() {
            return Err(ConfigError::Invalid("objlib must be set".into()));
        }

        if self.actions.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one action must be defined".into(),
            ));
        }

        for action in &self.actions {
            if action.name.trim().is_empty() || action.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "action {:?} needs both a name and a command",
                    action.name
                )));
            }

            if let Some(extensions) = &action.extensions {
                if extensions.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "action {:?} lists no extensions, omit the field instead",
                        action.name
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for ProjectDefinition {
    fn default() -> Self {
        let qsys = |name: &str, command: &str, extensions: &[&str]| Action {
            name: name.into(),
            command: command.into(),
            file_system: FileSystem::Qsys,
            command_environment: CommandEnvironment::Qsys,
            extensions: (!extensions.is_empty())
                .then(|| extensions.iter().map(|ext| ext.to_string()).collect()),
        };

        Self {
            version: "0.0.1".into(),
            description: "IBM i Project".into(),
            repository: String::new(),
            objlib: "$DEVLIB".into(),
            curlib: "$DEVLIB".into(),
            include_path: Vec::new(),
            pre_usrlibl: Vec::new(),
            post_usrlibl: Vec::new(),
            actions: vec![
                qsys(
                    "Compile: CRTSQLRPGI (Program)",
                    "CRTSQLRPGI OBJ(&OBJLIB/&NAME) SRCFILE(&OBJLIB/&FOLDER) CLOSQLCSR(*ENDMOD) OPTION(*EVENTF) DBGVIEW(*SOURCE) TGTRLS(*CURRENT)",
                    &["sqlrpgle"],
                ),
                qsys(
                    "Compile: CRTBNDRPG",
                    "CRTBNDRPG PGM(&OBJLIB/&NAME) SRCFILE(&OBJLIB/&FOLDER) SRCMBR(&NAME) OPTION(*EVENTF) DBGVIEW(*SOURCE)",
                    &["rpgle"],
                ),
                qsys(
                    "Compile: CRTRPGMOD",
                    "CRTRPGMOD MOD(&OBJLIB/&NAME) SRCFILE(&OBJLIB/&FOLDER) SRCMBR(&NAME) OPTION(*EVENTF) DBGVIEW(*SOURCE)",
                    &["rpgle"],
                ),
                qsys(
                    "Compile: CRTBNDCBL",
                    "CRTBNDCBL PGM(&OBJLIB/&NAME) SRCFILE(&OBJLIB/&FOLDER) OPTION(*SOURCE *EVENTF) DBGVIEW(*SOURCE)",
                    &["cbl", "cbble", "cob"],
                ),
                qsys(
                    "Compile: CRTCMD",
                    "CRTCMD CMD(&OBJLIB/&NAME) PGM(&OBJLIB/&NAME) SRCFILE(&OBJLIB/&FOLDER) ALLOW(*ALL) CURLIB(*NOCHG) PRDLIB(*NOCHG)",
                    &["cmd"],
                ),
                qsys(
                    "Compile: CRTBNDCL",
                    "CRTBNDCL PGM(&OBJLIB/&NAME) SRCFILE(&OBJLIB/&FOLDER) OPTION(*EVENTF) DBGVIEW(*SOURCE)",
                    &["cl", "clle"],
                ),
                qsys(
                    "Compile: CRTPGM",
                    "CRTPGM PGM(&OBJLIB/&NAME) MODULE(*PGM) ENTMOD(*FIRST) BNDSRVPGM(*NONE) BNDDIR(*NONE) ACTGRP(*ENTMOD) TGTRLS(*CURRENT)",
                    &[],
                ),
            ],
        }
    }
}

impl FromStr for ProjectDefinition {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut definition: ProjectDefinition =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on library fields.
        definition.objlib = shellexpand::full(definition.objlib.as_str())
            .map_err(ConfigError::ShellExpansion)?
            .to_uppercase();
        definition.curlib = shellexpand::full(definition.curlib.as_str())
            .map_err(ConfigError::ShellExpansion)?
            .to_uppercase();

        definition.validate()?;

        Ok(definition)
    }
}

impl Display for ProjectDefinition {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Action that can be run against deployed source.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Action {
    /// Name shown to the user.
    pub name: String,

    /// Host command to run.
    pub command: String,

    /// File system the source must be deployed to before running.
    pub file_system: FileSystem,

    /// Environment the command runs in.
    pub command_environment: CommandEnvironment,

    /// Extensions the action applies to. Applies to everything when absent.
    pub extensions: Option<Vec<String>>,
}

/// File system an action operates on.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSystem {
    /// Structured container/member namespace.
    Qsys,

    /// Hierarchical namespace.
    Ifs,
}

/// Environment an action command runs in.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandEnvironment {
    Qsys,
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Configuration parsed, but its content makes no sense.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn deserialize_settings_with_defaults() -> anyhow::Result<()> {
        let result: Settings = r#"
            host = "jdoe@pub400"
        "#
        .parse()?;

        let expect = Settings {
            host: Some("jdoe@pub400".into()),
            ..Settings::default()
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn reject_zero_concurrency() {
        let result = "concurrency = 0".parse::<Settings>();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn serialize_settings() {
        let result = Settings {
            host: Some("jdoe@pub400".into()),
            concurrency: 8,
            ..Settings::default()
        }
        .to_string();

        let expect = indoc! {r#"
            host = "jdoe@pub400"
            concurrency = 8
            ignore_file = ".gitignore"
            ssh_program = "ssh"
        "#};

        assert_eq!(result, expect);
    }

    #[sealed_test(env = [("DEVLIB", "jdoelib")])]
    fn deserialize_project_definition() -> anyhow::Result<()> {
        let result: ProjectDefinition = r#"
            version = "0.0.1"
            description = "payroll"
            objlib = "$DEVLIB"
            curlib = "$DEVLIB"

            [[action]]
            name = "Compile: CRTBNDRPG"
            command = "CRTBNDRPG PGM(&OBJLIB/&NAME)"
            file_system = "qsys"
            command_environment = "qsys"
            extensions = ["rpgle"]
        "#
        .parse()?;

        let expect = ProjectDefinition {
            version: "0.0.1".into(),
            description: "payroll".into(),
            repository: String::new(),
            objlib: "JDOELIB".into(),
            curlib: "JDOELIB".into(),
            include_path: Vec::new(),
            pre_usrlibl: Vec::new(),
            post_usrlibl: Vec::new(),
            actions: vec![Action {
                name: "Compile: CRTBNDRPG".into(),
                command: "CRTBNDRPG PGM(&OBJLIB/&NAME)".into(),
                file_system: FileSystem::Qsys,
                command_environment: CommandEnvironment::Qsys,
                extensions: Some(vec!["rpgle".into()]),
            }],
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn reject_project_definition_without_actions() {
        let result = r#"
            version = "0.0.1"
            description = "payroll"
            objlib = "JDOELIB"
        "#
        .parse::<ProjectDefinition>();

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn reject_unknown_file_system() {
        let result = r#"
            version = "0.0.1"
            description = "payroll"
            objlib = "JDOELIB"

            [[action]]
            name = "Compile"
            command = "CRTBNDRPG"
            file_system = "tape"
            command_environment = "qsys"
        "#
        .parse::<ProjectDefinition>();

        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[test]
    fn filter_actions_by_extension() {
        let definition = ProjectDefinition::default();

        let result = definition
            .actions_for("RPGLE")
            .into_iter()
            .map(|action| action.name.as_str())
            .collect::<Vec<_>>();

        let expect = vec![
            "Compile: CRTBNDRPG",
            "Compile: CRTRPGMOD",
            "Compile: CRTPGM",
        ];

        assert_eq!(result, expect);
    }
}
