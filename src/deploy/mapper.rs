// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path mapping between addressing models.
//!
//! The remote host stores objects in one of two ways:
//!
//! 1. __Free-form__: a hierarchical file system. Local paths map over
//!    verbatim, preserving full directory depth under the target root.
//! 2. __Structured__: a flat two-level namespace of containers holding
//!    members. A container is limited to ten characters and must start with a
//!    letter, a member name is limited to ten characters, and every member
//!    carries a short source type.
//!
//! A local file maps into the structured namespace only when it sits exactly
//! one directory below the project root, e.g., `QRPGLESRC/CUSTOMER.SQLRPGLE`
//! becomes member `CUSTOMER` of container `QRPGLESRC` with source type
//! `SQLRPGLE`. Anything else is skipped with a reason. Skips are routine, not
//! failures.
//!
//! Which model a target uses follows from the target itself: a target that
//! starts with `/` is a free-form directory, anything else names the library
//! that structured containers live in.

use crate::{deploy::changes::CandidateFile, host::join_remote};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

/// Maximum length of container and member names.
pub const NAME_LIMIT: usize = 10;

/// Maximum length of a source type.
pub const SOURCE_TYPE_LIMIT: usize = 10;

/// Addressing mode of a deployment target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// Hierarchical directory.
    FreeForm { root: String },

    /// Library holding containers of members.
    Structured { library: String },
}

/// Association of a project root with a remote target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    /// Absolute path to local project root.
    pub project_root: PathBuf,

    /// Remote target as configured by the user.
    pub location: String,

    /// Addressing mode inferred from location.
    pub kind: TargetKind,
}

impl DeploymentTarget {
    /// Construct deployment target, inferring its addressing mode.
    ///
    /// # Errors
    ///
    /// - Return [`InvalidTarget`] if location is blank, or names a library
    ///   the structured namespace cannot hold.
    pub fn new(
        project_root: impl Into<PathBuf>,
        location: impl Into<String>,
    ) -> Result<Self, InvalidTarget> {
        let location = location.into();
        let trimmed = location.trim();
        let invalid = |reason: &str| InvalidTarget {
            location: location.clone(),
            reason: reason.into(),
        };

        if trimmed.is_empty() {
            return Err(invalid("target is empty"));
        }

        let kind = if trimmed.starts_with('/') {
            TargetKind::FreeForm {
                root: trimmed.to_string(),
            }
        } else {
            if trimmed.chars().count() > NAME_LIMIT {
                return Err(invalid("library name exceeds ten characters"));
            }

            if trimmed.contains(|c: char| c.is_whitespace() || c == '/') {
                return Err(invalid("library name contains separators"));
            }

            TargetKind::Structured {
                library: trimmed.to_uppercase(),
            }
        };

        Ok(Self {
            project_root: project_root.into(),
            location,
            kind,
        })
    }

    /// Key identifying the remote side of this target.
    pub fn key(&self) -> String {
        match &self.kind {
            TargetKind::FreeForm { root } => {
                let root = root.trim_end_matches('/');
                if root.is_empty() {
                    "/".into()
                } else {
                    root.into()
                }
            }
            TargetKind::Structured { library } => library.clone(),
        }
    }

    /// Check if target uses the structured namespace.
    pub fn is_structured(&self) -> bool {
        matches!(self.kind, TargetKind::Structured { .. })
    }
}

impl Display for DeploymentTarget {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.key())
    }
}

/// Member in the structured namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberAddress {
    pub library: String,
    pub container: String,
    pub member: String,
    pub source_type: String,
}

impl MemberAddress {
    /// Path of member as seen through the hierarchical namespace.
    pub fn qsys_path(&self) -> String {
        format!(
            "/QSYS.LIB/{}.LIB/{}.FILE/{}.MBR",
            self.library, self.container, self.member
        )
    }
}

impl Display for MemberAddress {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}/{}/{}", self.library, self.container, self.member)
    }
}

/// Remote address of a candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAddress {
    /// Absolute path in the hierarchical namespace.
    FreeForm { path: String },

    /// Member in the structured namespace.
    Structured(MemberAddress),
}

impl Display for RemoteAddress {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::FreeForm { path } => fmt.write_str(path),
            Self::Structured(member) => member.fmt(fmt),
        }
    }
}

/// Why a candidate cannot be represented on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Relative path does not have exactly two segments.
    NotTwoSegments { segments: usize },

    /// Container name does not start with a letter.
    ContainerNotAlphabetic,

    /// Container name exceeds the name limit.
    ContainerTooLong,

    /// File has no extension to derive a source type from.
    MissingExtension,

    /// Member name exceeds the name limit.
    MemberTooLong,

    /// Source type exceeds the source type limit.
    SourceTypeTooLong,

    /// Name holds whitespace, parentheses, or quotes.
    ReservedCharacter,
}

impl Display for SkipReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::NotTwoSegments { segments } => write!(
                fmt,
                "expected <container>/<member>.<type>, found {segments} path segments"
            ),
            Self::ContainerNotAlphabetic => fmt.write_str("container name must start with a letter"),
            Self::ContainerTooLong => write!(fmt, "container name exceeds {NAME_LIMIT} characters"),
            Self::MissingExtension => fmt.write_str("file has no extension for a source type"),
            Self::MemberTooLong => write!(fmt, "member name exceeds {NAME_LIMIT} characters"),
            Self::SourceTypeTooLong => {
                write!(fmt, "source type exceeds {SOURCE_TYPE_LIMIT} characters")
            }
            Self::ReservedCharacter => {
                fmt.write_str("name contains whitespace, parentheses, or quotes")
            }
        }
    }
}

/// Result of mapping a candidate onto a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mapping {
    Remote(RemoteAddress),
    Skip(SkipReason),
}

/// Map candidate file onto deployment target.
pub fn map(candidate: &CandidateFile, target: &DeploymentTarget) -> Mapping {
    match &target.kind {
        TargetKind::FreeForm { root } => Mapping::Remote(RemoteAddress::FreeForm {
            path: join_remote(root, &candidate.relative_path),
        }),
        TargetKind::Structured { library } => match map_member(&candidate.relative_path, library) {
            Ok(member) => Mapping::Remote(RemoteAddress::Structured(member)),
            Err(reason) => Mapping::Skip(reason),
        },
    }
}

/// Map forward-slash relative path to a member of library.
///
/// # Errors
///
/// - Return [`SkipReason`] describing the first naming rule violated.
pub fn map_member(relative_path: &str, library: &str) -> Result<MemberAddress, SkipReason> {
    let segments = relative_path.split('/').collect::<Vec<_>>();
    let [container, file_name] = segments.as_slice() else {
        return Err(SkipReason::NotTwoSegments {
            segments: segments.len(),
        });
    };

    // INVARIANT: Fold case before any length check, folding can grow a name.
    let container = container.to_uppercase();
    if !container.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(SkipReason::ContainerNotAlphabetic);
    }

    if container.chars().count() > NAME_LIMIT {
        return Err(SkipReason::ContainerTooLong);
    }

    // INVARIANT: A leading dot starts a name, not an extension.
    let (member, source_type) = match file_name.rfind('.') {
        Some(index) if index > 0 => (&file_name[..index], &file_name[index + 1..]),
        _ => (*file_name, ""),
    };
    let member = member.to_uppercase();
    let source_type = source_type.to_uppercase();

    if source_type.is_empty() {
        return Err(SkipReason::MissingExtension);
    }

    if member.chars().count() > NAME_LIMIT {
        return Err(SkipReason::MemberTooLong);
    }

    if source_type.chars().count() > SOURCE_TYPE_LIMIT {
        return Err(SkipReason::SourceTypeTooLong);
    }

    // INVARIANT: Names end up inside host command parameters.
    if [&container, &member, &source_type]
        .iter()
        .any(|name| name.contains(is_reserved))
    {
        return Err(SkipReason::ReservedCharacter);
    }

    Ok(MemberAddress {
        library: library.to_uppercase(),
        container,
        member,
        source_type,
    })
}

fn is_reserved(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"')
}

/// Deployment target cannot be used.
#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid deployment target {location:?}: {reason}")]
pub struct InvalidTarget {
    pub location: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn candidate(relative_path: &str) -> CandidateFile {
        CandidateFile {
            local_path: PathBuf::from("/project").join(relative_path),
            relative_path: relative_path.into(),
        }
    }

    #[test]
    fn infer_target_kind() -> anyhow::Result<()> {
        let free = DeploymentTarget::new("/project", "/home/JDOE/builds/payroll/")?;
        assert_eq!(
            free.kind,
            TargetKind::FreeForm {
                root: "/home/JDOE/builds/payroll/".into()
            }
        );
        assert_eq!(free.key(), "/home/JDOE/builds/payroll");

        let structured = DeploymentTarget::new("/project", "mylib")?;
        assert_eq!(
            structured.kind,
            TargetKind::Structured {
                library: "MYLIB".into()
            }
        );

        Ok(())
    }

    #[test_case(""; "empty")]
    #[test_case("   "; "blank")]
    #[test_case("WAYTOOLONGLIB"; "long library")]
    #[test_case("MY LIB"; "library with space")]
    #[test]
    fn reject_invalid_target(location: &str) {
        assert!(DeploymentTarget::new("/project", location).is_err());
    }

    #[test]
    fn free_form_preserves_depth() -> anyhow::Result<()> {
        let target = DeploymentTarget::new("/project", "/home/JDOE/builds/payroll")?;

        let result = map(&candidate("a/b/c.txt"), &target);
        let expect = Mapping::Remote(RemoteAddress::FreeForm {
            path: "/home/JDOE/builds/payroll/a/b/c.txt".into(),
        });
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn structured_maps_container_member_and_type() -> anyhow::Result<()> {
        let target = DeploymentTarget::new("/project", "MYLIB")?;

        let result = map(&candidate("QRPGLESRC/CUSTOMER.SQLRPGLE"), &target);
        let expect = Mapping::Remote(RemoteAddress::Structured(MemberAddress {
            library: "MYLIB".into(),
            container: "QRPGLESRC".into(),
            member: "CUSTOMER".into(),
            source_type: "SQLRPGLE".into(),
        }));
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn structured_folds_case() -> anyhow::Result<()> {
        let member = map_member("qrpglesrc/customer.rpgle", "mylib");
        let expect = MemberAddress {
            library: "MYLIB".into(),
            container: "QRPGLESRC".into(),
            member: "CUSTOMER".into(),
            source_type: "RPGLE".into(),
        };
        assert_eq!(member, Ok(expect));

        Ok(())
    }

    #[test_case("CUSTOMER.RPGLE", SkipReason::NotTwoSegments { segments: 1 }; "top level file")]
    #[test_case("SRC/QRPGLESRC/CUSTOMER.RPGLE", SkipReason::NotTwoSegments { segments: 3 }; "three segments")]
    #[test_case("a/b/c/d/e.txt", SkipReason::NotTwoSegments { segments: 5 }; "deep path")]
    #[test_case("1SRC/CUSTOMER.RPGLE", SkipReason::ContainerNotAlphabetic; "numeric container")]
    #[test_case("_SRC/CUSTOMER.RPGLE", SkipReason::ContainerNotAlphabetic; "underscore container")]
    #[test_case("QRPGLESRCXX/CUSTOMER.RPGLE", SkipReason::ContainerTooLong; "eleven character container")]
    #[test_case("QRPGLESRC/THISNAMEISWAYTOOLONG.RPGLE", SkipReason::MemberTooLong; "long member")]
    #[test_case("QRPGLESRC/CUSTOMER", SkipReason::MissingExtension; "no extension")]
    #[test_case("QRPGLESRC/CUSTOMER.", SkipReason::MissingExtension; "trailing dot")]
    #[test_case("QRPGLESRC/.profile", SkipReason::MissingExtension; "dot file")]
    #[test_case("QRPGLESRC/CUSTOMER.ABCDEFGHIJK", SkipReason::SourceTypeTooLong; "long source type")]
    #[test_case("ABCDEFGHIß/X.RPGLE", SkipReason::ContainerTooLong; "container grows when folded")]
    #[test_case("QRPGLESRC/STRAßENAME.RPGLE", SkipReason::MemberTooLong; "member grows when folded")]
    #[test_case("QRPGLESRC/MY FILE.RPGLE", SkipReason::ReservedCharacter; "member with space")]
    #[test_case("QRPGLESRC/CUST(1).RPGLE", SkipReason::ReservedCharacter; "member with parentheses")]
    #[test_case("MY SRC/CUSTOMER.RPGLE", SkipReason::ReservedCharacter; "container with space")]
    #[test]
    fn structured_skips(relative_path: &str, reason: SkipReason) {
        pretty_assertions::assert_eq!(map_member(relative_path, "MYLIB"), Err(reason));
    }

    #[test_case("QRPGLESRC/CUSTOMER.SQLRPGLE"; "sql source type")]
    #[test_case("A/B.C"; "single characters")]
    #[test_case("QCLSRC/ABCDEFGHIJ.CLLE"; "ten character member")]
    #[test_case("ABCDEFGHIJ/CUSTOMER.RPGLE"; "ten character container")]
    #[test_case("src/a.b.rpgle"; "dotted member")]
    #[test]
    fn structured_accepts(relative_path: &str) {
        assert!(map_member(relative_path, "MYLIB").is_ok());
    }

    #[test]
    fn structured_never_maps_deep_paths() -> anyhow::Result<()> {
        let target = DeploymentTarget::new("/project", "MYLIB")?;

        for depth in 3..8 {
            let relative_path = (0..depth)
                .map(|index| format!("S{index}"))
                .collect::<Vec<_>>()
                .join("/")
                + ".RPGLE";
            let result = map(&candidate(&relative_path), &target);
            assert_eq!(
                result,
                Mapping::Skip(SkipReason::NotTwoSegments { segments: depth })
            );
        }

        Ok(())
    }

    #[test]
    fn member_address_paths() {
        let member = MemberAddress {
            library: "MYLIB".into(),
            container: "QRPGLESRC".into(),
            member: "CUSTOMER".into(),
            source_type: "SQLRPGLE".into(),
        };

        assert_eq!(member.to_string(), "MYLIB/QRPGLESRC/CUSTOMER");
        assert_eq!(
            member.qsys_path(),
            "/QSYS.LIB/MYLIB.LIB/QRPGLESRC.FILE/CUSTOMER.MBR"
        );
    }
}
