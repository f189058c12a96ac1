// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Object provisioning for structured targets.
//!
//! A member can only be written once both its container and the member itself
//! exist on the host. The host offers no atomic "create if absent" command, so
//! the provisioner issues an optimistic create for each and ignores any
//! failure. A failed create cannot be told apart from "already exists", thus
//! the subsequent member write is left to surface real problems.
//!
//! Containers are created at most once per run. The provisioner remembers
//! every container it attempted, whether or not the attempt worked.

use crate::{deploy::mapper::MemberAddress, host::RemoteCommand};

use std::collections::HashSet;
use tracing::{debug, instrument};

/// Record length of created source containers.
pub const RECORD_LENGTH: u32 = 112;

/// Result of ensuring a member exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    /// Both create commands were accepted by the host.
    Ready,

    /// At least one create command failed, most likely because the object
    /// already exists.
    Unconfirmed { reason: String },
}

/// Per-run container and member provisioning.
pub struct Provisioner<'a, C>
where
    C: RemoteCommand + ?Sized,
{
    commands: &'a C,
    containers: HashSet<String>,
}

impl<'a, C> Provisioner<'a, C>
where
    C: RemoteCommand + ?Sized,
{
    /// Construct new provisioner with an empty container memo.
    pub fn new(commands: &'a C) -> Self {
        Self {
            commands,
            containers: HashSet::new(),
        }
    }

    /// Ensure container and member exist for member address.
    ///
    /// Never fails. Any failed create is reported through
    /// [`Provisioned::Unconfirmed`] and logged at debug level.
    #[instrument(skip(self, member), fields(object = %member), level = "debug")]
    pub async fn ensure(&mut self, member: &MemberAddress) -> Provisioned {
        let mut reasons = Vec::new();
        let file = format!("{}/{}", member.library, member.container);

        // INVARIANT: Memoize before the attempt so a failed create is never repeated.
        if self.containers.insert(file.clone()) {
            let command = format!("CRTSRCPF FILE({file}) RCDLEN({RECORD_LENGTH})");
            if let Some(reason) = self.attempt(&command).await {
                reasons.push(reason);
            }
        }

        let command = format!(
            "ADDPFM FILE({file}) MBR({}) SRCTYPE({})",
            member.member, member.source_type
        );
        if let Some(reason) = self.attempt(&command).await {
            reasons.push(reason);
        }

        if reasons.is_empty() {
            Provisioned::Ready
        } else {
            Provisioned::Unconfirmed {
                reason: reasons.join("; "),
            }
        }
    }

    /// Number of containers attempted during this run.
    pub fn containers_attempted(&self) -> usize {
        self.containers.len()
    }

    async fn attempt(&self, command: &str) -> Option<String> {
        let reason = match self.commands.run(command).await {
            Ok(output) if output.success() => return None,
            Ok(output) => output.stderr.trim().to_string(),
            Err(err) => err.to_string(),
        };

        debug!("ignore failed create {command:?}: {reason}");
        Some(reason)
    }
}
