// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Transfer execution.
//!
//! Move candidate files onto the host, producing exactly one
//! [`TransferOutcome`] per file. There are three paths:
//!
//! 1. __Tree__: a free-form full deployment hands the whole project root to
//!    [`Transport::put_tree`], which walks and uploads with bounded
//!    concurrency while re-checking ignore rules for every item.
//! 2. __Changes__: a free-form change-set deployment hands the candidate list
//!    to [`Transport::put_many`] with the same concurrency bound.
//! 3. __Members__: a structured deployment provisions and writes one member at
//!    a time. Each write depends on its own provisioning step.
//!
//! Outcomes from the concurrent paths are pushed through a channel as items
//! settle, so their order follows completion, not submission.
//!
//! [`Transport::put_tree`]: crate::host::Transport::put_tree
//! [`Transport::put_many`]: crate::host::Transport::put_many

use crate::{
    deploy::{
        changes::CandidateFile,
        ignore::IgnoreRuleSet,
        mapper::{MemberAddress, RemoteAddress, SkipReason},
        provision::{Provisioned, Provisioner},
        report::ReportSink,
        RunStatus,
    },
    host::{Host, TransportError, TreeOptions, Upload},
};

use std::{
    collections::{HashMap, HashSet},
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, warn};

/// Final state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransferStatus {
    Success,
    Failed,
    Skipped,
}

impl Display for TransferStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        })
    }
}

/// Result of deploying one candidate file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub candidate: CandidateFile,
    pub remote: Option<RemoteAddress>,
    pub status: TransferStatus,
    pub detail: Option<String>,
}

impl TransferOutcome {
    /// Construct successful outcome.
    pub fn success(candidate: CandidateFile, remote: RemoteAddress) -> Self {
        Self {
            candidate,
            remote: Some(remote),
            status: TransferStatus::Success,
            detail: None,
        }
    }

    /// Construct failed outcome.
    pub fn failed(
        candidate: CandidateFile,
        remote: Option<RemoteAddress>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            candidate,
            remote,
            status: TransferStatus::Failed,
            detail: Some(detail.into()),
        }
    }

    /// Construct skipped outcome.
    pub fn skipped(candidate: CandidateFile, reason: SkipReason) -> Self {
        Self {
            candidate,
            remote: None,
            status: TransferStatus::Skipped,
            detail: Some(reason.to_string()),
        }
    }
}

impl Display for TransferOutcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}: {}", self.status, self.candidate.relative_path)?;
        if let Some(remote) = &self.remote {
            write!(fmt, " -> {remote}")?;
        }
        if let Some(detail) = &self.detail {
            write!(fmt, ": {detail}")?;
        }

        Ok(())
    }
}

/// What to do after a member write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the failure and move on to the next file.
    Continue,

    /// Record the failure and abandon the remaining files.
    StopAtFirst,
}

/// Outcomes of one transfer step.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Batch {
    pub outcomes: Vec<TransferOutcome>,

    /// Set if the step stopped before every file was attempted.
    pub aborted: Option<String>,
}

/// Transfer executor bound to one host.
pub struct TransferExecutor<'a, H>
where
    H: Host + ?Sized,
{
    host: &'a H,
    concurrency: usize,
    sink: &'a dyn ReportSink,
}

impl<'a, H> TransferExecutor<'a, H>
where
    H: Host + ?Sized,
{
    /// Construct new transfer executor.
    pub fn new(host: &'a H, concurrency: usize, sink: &'a dyn ReportSink) -> Self {
        Self {
            host,
            concurrency: concurrency.max(1),
            sink,
        }
    }

    /// Transfer one candidate to its remote address.
    ///
    /// Structured addresses are provisioned before the member is written.
    /// Provisioning problems never fail the outcome by themselves. `on_phase`
    /// observes each switch between provisioning and writing.
    pub async fn transfer(
        &self,
        candidate: &CandidateFile,
        remote: &RemoteAddress,
        provisioner: &mut Provisioner<'_, H>,
        on_phase: &(dyn Fn(RunStatus) + Sync),
    ) -> TransferOutcome {
        let result = match remote {
            RemoteAddress::FreeForm { path } => {
                on_phase(RunStatus::Transferring);
                self.host.put_file(&candidate.local_path, path).await
            }
            RemoteAddress::Structured(member) => {
                on_phase(RunStatus::Provisioning);
                if let Provisioned::Unconfirmed { reason } = provisioner.ensure(member).await {
                    debug!("continue with {member} despite: {reason}");
                }

                on_phase(RunStatus::Transferring);
                self.write_member(candidate, member).await
            }
        };

        let outcome = match result {
            Ok(()) => TransferOutcome::success(candidate.clone(), remote.clone()),
            Err(err) => {
                TransferOutcome::failed(candidate.clone(), Some(remote.clone()), err.to_string())
            }
        };
        self.sink.on_item_complete(&outcome);

        outcome
    }

    /// Transfer whole project tree onto a free-form root.
    ///
    /// Files matched by the ignore rules are never handed to the transport.
    pub async fn transfer_tree(
        &self,
        project_root: &Path,
        remote_root: &str,
        rules: &IgnoreRuleSet,
    ) -> Batch {
        let (sender, mut receiver) = unbounded_channel();
        let done = AtomicUsize::new(0);
        let validate = |path: &Path| !rules.is_ignored(path, false);
        let tick = |upload: &Upload, error: Option<&TransportError>| {
            let candidate = CandidateFile::from_local(project_root, &upload.local)
                .unwrap_or_else(|| CandidateFile {
                    local_path: upload.local.clone(),
                    relative_path: upload.remote.clone(),
                });
            let settled = done.fetch_add(1, Ordering::Relaxed) + 1;
            self.sink
                .report_progress(&format!("[{settled}] {}", candidate.relative_path));
            let outcome = outcome_of(candidate, upload, error);
            self.sink.on_item_complete(&outcome);
            let _ = sender.send(outcome);
        };
        let options = TreeOptions {
            concurrency: self.concurrency,
            validate: &validate,
            tick: &tick,
        };

        let result = self.host.put_tree(project_root, remote_root, options).await;
        let mut batch = Batch::default();
        while let Ok(outcome) = receiver.try_recv() {
            batch.outcomes.push(outcome);
        }
        batch.aborted = abort_reason(result);

        batch
    }

    /// Transfer change-set onto free-form remote paths.
    ///
    /// Every candidate yields exactly one outcome, even if the transport
    /// never got around to it.
    pub async fn transfer_changes(&self, items: &[(CandidateFile, String)]) -> Batch {
        let uploads = items
            .iter()
            .map(|(candidate, remote)| Upload {
                local: candidate.local_path.clone(),
                remote: remote.clone(),
            })
            .collect::<Vec<_>>();
        let by_remote = items
            .iter()
            .map(|(candidate, remote)| (remote.as_str(), candidate))
            .collect::<HashMap<_, _>>();

        let (sender, mut receiver) = unbounded_channel();
        let done = AtomicUsize::new(0);
        let tick = |upload: &Upload, error: Option<&TransportError>| {
            let Some(candidate) = by_remote.get(upload.remote.as_str()) else {
                warn!("transport reported unknown upload {:?}", upload.remote);
                return;
            };
            let settled = done.fetch_add(1, Ordering::Relaxed) + 1;
            self.sink.report_progress(&format!(
                "[{settled}/{}] {}",
                items.len(),
                candidate.relative_path
            ));
            let outcome = outcome_of((*candidate).clone(), upload, error);
            self.sink.on_item_complete(&outcome);
            let _ = sender.send(outcome);
        };

        let result = self
            .host
            .put_many(&uploads, self.concurrency, &tick)
            .await;
        let mut batch = Batch::default();
        while let Ok(outcome) = receiver.try_recv() {
            batch.outcomes.push(outcome);
        }

        // INVARIANT: One outcome per candidate.
        let reported = batch
            .outcomes
            .iter()
            .map(|outcome| outcome.candidate.relative_path.clone())
            .collect::<HashSet<_>>();
        for (candidate, remote) in items {
            if reported.contains(&candidate.relative_path) {
                continue;
            }

            let outcome = TransferOutcome::failed(
                candidate.clone(),
                Some(RemoteAddress::FreeForm {
                    path: remote.clone(),
                }),
                "transport never reported this file",
            );
            self.sink.on_item_complete(&outcome);
            batch.outcomes.push(outcome);
        }
        batch.aborted = abort_reason(result);

        batch
    }

    /// Provision and write members one at a time.
    pub async fn transfer_members(
        &self,
        items: &[(CandidateFile, MemberAddress)],
        provisioner: &mut Provisioner<'_, H>,
        policy: FailurePolicy,
        on_phase: &(dyn Fn(RunStatus) + Sync),
    ) -> Batch {
        let mut batch = Batch::default();

        for (index, (candidate, member)) in items.iter().enumerate() {
            self.sink.report_progress(&format!(
                "[{}/{}] {}",
                index + 1,
                items.len(),
                candidate.relative_path
            ));

            let remote = RemoteAddress::Structured(member.clone());
            let outcome = self
                .transfer(candidate, &remote, provisioner, on_phase)
                .await;
            let failed = outcome.status == TransferStatus::Failed;
            batch.outcomes.push(outcome);

            if failed && policy == FailurePolicy::StopAtFirst {
                let remaining = items.len() - index - 1;
                warn!("stop after failed write of {member}, {remaining} files left");
                batch.aborted = Some(format!(
                    "write of {member} failed, {remaining} remaining files abandoned"
                ));
                break;
            }
        }

        batch
    }

    async fn write_member(
        &self,
        candidate: &CandidateFile,
        member: &MemberAddress,
    ) -> Result<(), TransportError> {
        let content = tokio::fs::read(&candidate.local_path)
            .await
            .map_err(|err| TransportError::ReadLocal {
                source: err,
                path: candidate.local_path.clone(),
            })?;

        self.host.write_member(member, &content).await
    }
}

fn outcome_of(
    candidate: CandidateFile,
    upload: &Upload,
    error: Option<&TransportError>,
) -> TransferOutcome {
    let remote = RemoteAddress::FreeForm {
        path: upload.remote.clone(),
    };
    match error {
        None => TransferOutcome::success(candidate, remote),
        Some(err) => TransferOutcome::failed(candidate, Some(remote), err.to_string()),
    }
}

fn abort_reason(result: Result<(), TransportError>) -> Option<String> {
    match result {
        Ok(()) | Err(TransportError::Incomplete { .. }) => None,
        Err(err) => Some(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        deploy::report::NullSink,
        host::{CommandOutput, RemoteCommand, Result, Transport},
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::{path::PathBuf, sync::Mutex};

    #[derive(Default)]
    struct ScriptedHost {
        log: Mutex<Vec<String>>,
        refuse: Vec<&'static str>,
    }

    impl ScriptedHost {
        fn refusing(refuse: Vec<&'static str>) -> Self {
            Self {
                refuse,
                ..Default::default()
            }
        }

        fn check(&self, entry: String) -> Result<()> {
            let refused = self.refuse.iter().any(|name| entry.contains(name));
            self.log.lock().unwrap().push(entry.clone());
            if refused {
                return Err(TransportError::Command {
                    command: entry,
                    message: "not authorized".into(),
                });
            }

            Ok(())
        }
    }

    #[async_trait]
    impl Transport for ScriptedHost {
        async fn put_file(&self, _local: &Path, remote: &str) -> Result<()> {
            self.check(format!("put {remote}"))
        }

        async fn make_dir(&self, remote: &str) -> Result<()> {
            self.check(format!("mkdir {remote}"))
        }
    }

    #[async_trait]
    impl RemoteCommand for ScriptedHost {
        async fn run(&self, command: &str) -> Result<CommandOutput> {
            self.log.lock().unwrap().push(command.to_string());
            Ok(CommandOutput::default())
        }

        async fn write_member(&self, member: &MemberAddress, _content: &[u8]) -> Result<()> {
            self.check(format!("write {member}"))
        }
    }

    fn candidate(root: &Path, relative_path: &str) -> CandidateFile {
        CandidateFile {
            local_path: root.join(relative_path),
            relative_path: relative_path.into(),
        }
    }

    fn member(container: &str, name: &str) -> MemberAddress {
        MemberAddress {
            library: "MYLIB".into(),
            container: container.into(),
            member: name.into(),
            source_type: "RPGLE".into(),
        }
    }

    #[test]
    fn outcome_log_lines() {
        let root = PathBuf::from("/project");
        let remote = RemoteAddress::FreeForm {
            path: "/home/jdoe/a.txt".into(),
        };

        let success = TransferOutcome::success(candidate(&root, "a.txt"), remote.clone());
        let failed = TransferOutcome::failed(candidate(&root, "a.txt"), Some(remote), "denied");
        let skipped = TransferOutcome::skipped(
            candidate(&root, "a/b/c.txt"),
            SkipReason::NotTwoSegments { segments: 3 },
        );

        assert_eq!(success.to_string(), "SUCCESS: a.txt -> /home/jdoe/a.txt");
        assert_eq!(
            failed.to_string(),
            "FAILED: a.txt -> /home/jdoe/a.txt: denied"
        );
        assert_eq!(
            skipped.to_string(),
            "SKIPPED: a/b/c.txt: expected <container>/<member>.<type>, found 3 path segments"
        );
    }

    #[tokio::test]
    async fn changes_yield_one_outcome_per_candidate() {
        let host = ScriptedHost::refusing(vec!["b.txt"]);
        let executor = TransferExecutor::new(&host, 5, &NullSink);
        let root = PathBuf::from("/project");
        let items = ["a.txt", "b.txt", "c/d.txt"]
            .into_iter()
            .map(|path| (candidate(&root, path), format!("/remote/{path}")))
            .collect::<Vec<_>>();

        let batch = executor.transfer_changes(&items).await;
        let mut result = batch
            .outcomes
            .iter()
            .map(|outcome| (outcome.candidate.relative_path.as_str(), outcome.status))
            .collect::<Vec<_>>();
        result.sort();

        let expect = vec![
            ("a.txt", TransferStatus::Success),
            ("b.txt", TransferStatus::Failed),
            ("c/d.txt", TransferStatus::Success),
        ];
        assert_eq!(result, expect);
        assert_eq!(batch.aborted, None);
    }

    #[tokio::test]
    async fn members_continue_or_stop_on_failure() -> anyhow::Result<()> {
        let scratch = tempfile::tempdir()?;
        let root = scratch.path();
        std::fs::create_dir_all(root.join("QRPGLESRC"))?;
        let items = ["A", "B", "C"]
            .into_iter()
            .map(|name| {
                let path = format!("QRPGLESRC/{name}.RPGLE");
                std::fs::write(root.join(&path), "**free\n")?;
                Ok((candidate(root, &path), member("QRPGLESRC", name)))
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut results = Vec::new();
        for policy in [FailurePolicy::Continue, FailurePolicy::StopAtFirst] {
            let host = ScriptedHost::refusing(vec!["QRPGLESRC/B"]);
            let executor = TransferExecutor::new(&host, 5, &NullSink);
            let mut provisioner = Provisioner::new(&host);
            let batch = executor
                .transfer_members(&items, &mut provisioner, policy, &|_: RunStatus| {})
                .await;
            let statuses = batch
                .outcomes
                .iter()
                .map(|outcome| outcome.status)
                .collect::<Vec<_>>();
            results.push((statuses, batch.aborted.is_some()));
        }

        let expect = vec![
            (
                vec![
                    TransferStatus::Success,
                    TransferStatus::Failed,
                    TransferStatus::Success,
                ],
                false,
            ),
            (vec![TransferStatus::Success, TransferStatus::Failed], true),
        ];
        assert_eq!(results, expect);

        Ok(())
    }

    #[tokio::test]
    async fn unreadable_member_source_fails() {
        let host = ScriptedHost::default();
        let executor = TransferExecutor::new(&host, 5, &NullSink);
        let mut provisioner = Provisioner::new(&host);
        let item = candidate(Path::new("/does/not/exist"), "QRPGLESRC/A.RPGLE");
        let remote = RemoteAddress::Structured(member("QRPGLESRC", "A"));

        let phases = Mutex::new(Vec::new());
        let on_phase = |status: RunStatus| phases.lock().unwrap().push(status);

        let outcome = executor
            .transfer(&item, &remote, &mut provisioner, &on_phase)
            .await;
        assert_eq!(outcome.status, TransferStatus::Failed);
        assert_eq!(provisioner.containers_attempted(), 1);
        assert_eq!(
            phases.into_inner().unwrap(),
            vec![RunStatus::Provisioning, RunStatus::Transferring]
        );
    }

    #[derive(Default)]
    struct ProgressLog {
        progress: Mutex<Vec<String>>,
    }

    impl ReportSink for ProgressLog {
        fn append_line(&self, _line: &str) {}

        fn report_progress(&self, message: &str) {
            self.progress.lock().unwrap().push(message.to_string());
        }
    }

    #[tokio::test]
    async fn free_form_paths_report_progress_per_item() -> anyhow::Result<()> {
        let scratch = tempfile::tempdir()?;
        let root = scratch.path();
        std::fs::create_dir_all(root.join("src"))?;
        std::fs::write(root.join("a.txt"), "a\n")?;
        std::fs::write(root.join("src/b.c"), "int b;\n")?;
        let host = ScriptedHost::default();
        let sink = ProgressLog::default();
        let executor = TransferExecutor::new(&host, 5, &sink);

        let rules = IgnoreRuleSet::builtin(root)?;
        let batch = executor.transfer_tree(root, "/remote", &rules).await;
        assert_eq!(batch.outcomes.len(), 2);

        let mut progress = sink.progress.lock().unwrap().clone();
        progress.sort();
        let expect = vec!["[1] ".to_string(), "[2] ".to_string()];
        let prefixes = progress
            .iter()
            .map(|message| message[..4].to_string())
            .collect::<Vec<_>>();
        assert_eq!(prefixes, expect);

        sink.progress.lock().unwrap().clear();
        let items = vec![(candidate(root, "a.txt"), "/remote/a.txt".to_string())];
        executor.transfer_changes(&items).await;
        assert_eq!(
            sink.progress.into_inner().unwrap(),
            vec!["[1/1] a.txt".to_string()]
        );

        Ok(())
    }
}
