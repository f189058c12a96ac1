// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote host access.
//!
//! Srcship never speaks to the remote host directly. It sequences calls to two
//! collaborators instead: a [`Transport`] that moves bytes into the
//! hierarchical namespace, and a [`RemoteCommand`] runner that executes host
//! commands and writes member content into the structured namespace. Anything
//! that implements both is a [`Host`].
//!
//! Timeouts, authentication, and encryption all belong to the collaborator.
//! The provided [`SshHost`] leaves all of that to the system ssh program.

use crate::{config::Settings, deploy::mapper::MemberAddress, path::to_slash};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ignore::WalkBuilder;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::atomic::{AtomicUsize, Ordering},
};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, instrument};

/// Callback fired once per item as soon as its transfer settles.
pub type ItemTick<'a> = &'a (dyn Fn(&Upload, Option<&TransportError>) + Send + Sync);

/// Predicate deciding whether a local file should be transferred at all.
pub type ItemValidate<'a> = &'a (dyn Fn(&Path) -> bool + Send + Sync);

/// One local file headed for a remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Absolute local path.
    pub local: PathBuf,

    /// Absolute remote path.
    pub remote: String,
}

/// Policy for recursive directory transfer.
#[derive(Clone, Copy)]
pub struct TreeOptions<'a> {
    /// Maximum number of transfers in flight.
    pub concurrency: usize,

    /// Per-item validity predicate.
    pub validate: ItemValidate<'a>,

    /// Per-item completion callback.
    pub tick: ItemTick<'a>,
}

/// Result of a host command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, if the command exited normally.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Check if command succeeded.
    ///
    /// A missing exit code counts as success.
    pub fn success(&self) -> bool {
        matches!(self.code, Some(0) | None)
    }
}

/// Byte transfer into the hierarchical namespace.
///
/// Writes to a remote path create any missing intermediate directories.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write local file to remote path.
    async fn put_file(&self, local: &Path, remote: &str) -> Result<()>;

    /// Create remote directory along with any missing parents.
    async fn make_dir(&self, remote: &str) -> Result<()>;

    /// Write many local files with bounded concurrency.
    ///
    /// Every upload is attempted, and reported through `tick` as soon as it
    /// settles. Completion order is unspecified.
    ///
    /// # Errors
    ///
    /// - Return [`TransportError::Incomplete`] if any upload failed.
    async fn put_many(&self, uploads: &[Upload], concurrency: usize, tick: ItemTick<'_>) -> Result<()> {
        let mut failed = 0;
        let pending = uploads
            .iter()
            .map(|upload| async move {
                let result = self.put_file(&upload.local, &upload.remote).await;
                (upload, result)
            })
            .collect::<Vec<_>>();
        let mut settled = stream::iter(pending).buffer_unordered(concurrency.max(1));

        while let Some((upload, result)) = settled.next().await {
            if result.is_err() {
                failed += 1;
            }
            tick(upload, result.as_ref().err());
        }

        match failed {
            0 => Ok(()),
            failed => Err(TransportError::Incomplete {
                failed,
                total: uploads.len(),
            }),
        }
    }

    /// Write a local directory tree to a remote root.
    ///
    /// Walks every file under `local_root`, keeps those accepted by
    /// `options.validate`, and transfers them with bounded concurrency while
    /// reporting each one through `options.tick`.
    ///
    /// # Errors
    ///
    /// - Return [`TransportError::Walk`] if local tree cannot be walked.
    /// - Return [`TransportError::Incomplete`] if any upload failed.
    async fn put_tree(
        &self,
        local_root: &Path,
        remote_root: &str,
        options: TreeOptions<'_>,
    ) -> Result<()> {
        let uploads = collect_tree(local_root, remote_root, options.validate)?;
        debug!("transfer {} files under {:?}", uploads.len(), local_root.display());
        self.put_many(&uploads, options.concurrency, options.tick)
            .await
    }
}

/// Command execution on the host.
#[async_trait]
pub trait RemoteCommand: Send + Sync {
    /// Run host command.
    ///
    /// A command that ran but failed is still `Ok`, check
    /// [`CommandOutput::success`].
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Replace content of a member in the structured namespace.
    async fn write_member(&self, member: &MemberAddress, content: &[u8]) -> Result<()>;
}

/// Anything that can both transfer bytes and run commands.
pub trait Host: Transport + RemoteCommand {}

impl<T> Host for T where T: Transport + RemoteCommand + ?Sized {}

/// Join relative forward-slash path onto remote root.
pub fn join_remote(remote_root: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        remote_root.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

fn collect_tree(
    local_root: &Path,
    remote_root: &str,
    validate: ItemValidate<'_>,
) -> Result<Vec<Upload>> {
    let mut uploads = Vec::new();
    let walker = WalkBuilder::new(local_root)
        .standard_filters(false)
        .hidden(false)
        .build();

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }

        // INVARIANT: Never hand a rejected item to the transfer step.
        if !validate(entry.path()) {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(local_root)
            .unwrap_or(entry.path());
        uploads.push(Upload {
            local: entry.path().to_path_buf(),
            remote: join_remote(remote_root, &to_slash(relative)),
        });
    }

    Ok(uploads)
}

/// Host reached through the system ssh program.
///
/// Every call opens its own ssh session, so connection reuse is up to the
/// user's ssh configuration, e.g., `ControlMaster`.
#[derive(Debug, Clone)]
pub struct SshHost {
    destination: String,
    program: String,
}

impl SshHost {
    /// Construct new ssh host.
    pub fn new(destination: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            program: program.into(),
        }
    }

    /// Construct ssh host from tool settings.
    ///
    /// # Errors
    ///
    /// - Return [`TransportError::NoHost`] if settings name no host.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let destination = settings.host.clone().ok_or(TransportError::NoHost)?;
        Ok(Self::new(destination, settings.ssh_program.clone()))
    }

    /// Destination handed to ssh.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[instrument(skip(self, input), level = "debug")]
    async fn ssh(&self, command: &str, input: Option<&[u8]>) -> Result<CommandOutput> {
        let mut child = Command::new(&self.program)
            .arg(&self.destination)
            .arg(command)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| TransportError::Spawn {
                source: err,
                program: self.program.clone(),
            })?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn ssh_checked(&self, command: &str, input: Option<&[u8]>) -> Result<()> {
        let output = self.ssh(command, input).await?;
        if !output.success() {
            return Err(TransportError::Command {
                command: command.to_string(),
                message: output.stderr.trim().to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for SshHost {
    async fn put_file(&self, local: &Path, remote: &str) -> Result<()> {
        let content = tokio::fs::read(local)
            .await
            .map_err(|err| TransportError::ReadLocal {
                source: err,
                path: local.to_path_buf(),
            })?;
        let parent = remote.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("");
        let command = if parent.is_empty() {
            format!("cat > {}", quote(remote))
        } else {
            format!("mkdir -p {} && cat > {}", quote(parent), quote(remote))
        };

        self.ssh_checked(&command, Some(&content)).await
    }

    async fn make_dir(&self, remote: &str) -> Result<()> {
        self.ssh_checked(&format!("mkdir -p {}", quote(remote)), None)
            .await
    }
}

#[async_trait]
impl RemoteCommand for SshHost {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.ssh(&format!("system {}", quote(command)), None).await
    }

    async fn write_member(&self, member: &MemberAddress, content: &[u8]) -> Result<()> {
        static SEQUENCE: AtomicUsize = AtomicUsize::new(0);
        let staging = format!(
            "/tmp/srcship-{}-{}.mbr",
            std::process::id(),
            SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        let copy = format!(
            "CPYFRMSTMF FROMSTMF('{staging}') TOMBR('{}') MBROPT(*REPLACE)",
            member.qsys_path()
        );
        let command = format!(
            "cat > {staging} && system {copy}; rc=$?; rm -f {staging}; exit $rc",
            staging = quote(&staging),
            copy = quote(&copy),
        );

        self.ssh_checked(&command, Some(content)).await
    }
}

/// Quote string for safe use in a remote shell command.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Host access error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No host destination configured.
    #[error("no remote host configured")]
    NoHost,

    /// Collaborator program cannot be started.
    #[error("failed to spawn {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Local file cannot be read.
    #[error("failed to read local file at {:?}", path.display())]
    ReadLocal {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Host command ran but failed.
    #[error("command {command:?} failed: {message}")]
    Command { command: String, message: String },

    /// Local tree cannot be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// Some items of a batch transfer failed.
    #[error("{failed} of {total} transfers failed")]
    Incomplete { failed: usize, total: usize },

    /// I/O with the collaborator program failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = TransportError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FlakyTransport {
        written: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn put_file(&self, _local: &Path, remote: &str) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if remote.ends_with(".bad") {
                return Err(TransportError::Command {
                    command: "put".into(),
                    message: "denied".into(),
                });
            }

            self.written.lock().unwrap().push(remote.to_string());
            Ok(())
        }

        async fn make_dir(&self, _remote: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn join_remote_paths() {
        assert_eq!(join_remote("/home/jdoe/", "a/b/c.txt"), "/home/jdoe/a/b/c.txt");
        assert_eq!(join_remote("/home/jdoe", "c.txt"), "/home/jdoe/c.txt");
    }

    #[test]
    fn quote_single_quotes() {
        assert_eq!(quote("it's"), r#"'it'\''s'"#);
    }

    #[tokio::test]
    async fn put_many_reports_every_item() {
        let transport = FlakyTransport::default();
        let uploads = ["/r/a.txt", "/r/b.bad", "/r/c.txt"]
            .into_iter()
            .map(|remote| Upload {
                local: PathBuf::from("unused"),
                remote: remote.into(),
            })
            .collect::<Vec<_>>();
        let ticks = Mutex::new(Vec::new());
        let tick = |upload: &Upload, error: Option<&TransportError>| {
            ticks
                .lock()
                .unwrap()
                .push((upload.remote.clone(), error.is_some()));
        };

        let result = transport.put_many(&uploads, 2, &tick).await;
        assert!(matches!(
            result,
            Err(TransportError::Incomplete {
                failed: 1,
                total: 3
            })
        ));

        let mut ticks = ticks.into_inner().unwrap();
        ticks.sort();
        assert_eq!(
            ticks,
            vec![
                ("/r/a.txt".to_string(), false),
                ("/r/b.bad".to_string(), true),
                ("/r/c.txt".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn put_many_stays_within_bound() {
        let transport = FlakyTransport::default();
        let uploads = (0..20)
            .map(|index| Upload {
                local: PathBuf::from("unused"),
                remote: format!("/r/{index}.txt"),
            })
            .collect::<Vec<_>>();

        let tick = |_: &Upload, _: Option<&TransportError>| {};

        transport.put_many(&uploads, 5, &tick).await.unwrap();
        assert_eq!(transport.written.lock().unwrap().len(), 20);
        assert_eq!(transport.peak.load(Ordering::SeqCst), 5);
    }
}
