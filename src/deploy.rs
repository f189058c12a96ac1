// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment orchestration.
//!
//! A __deployment run__ takes the files of a local project and places them on
//! the remote target registered for that project. The [`Deployer`] sequences
//! one run through a fixed pipeline:
//!
//! 1. __Resolving__: look up the target, load ignore rules, and collect the
//!    candidate files picked by the [`ChangeSelection`].
//! 2. __Mapping__: translate every candidate into a remote address, or skip it
//!    if the target cannot represent it.
//! 3. __Provisioning__: for structured targets, ensure the container and
//!    member of each file exist.
//! 4. __Transferring__: move the bytes, producing one outcome per file.
//!
//! A run ends in [`RunStatus::Succeeded`] if every file that was not skipped
//! made it across, and [`RunStatus::Failed`] otherwise. Per-file problems
//! never abort the call. They end up in the outcome log instead. Only problems
//! that stop a run from starting are returned as errors.
//!
//! # Run Exclusivity
//!
//! At most one run may be active per target. A request for a target that is
//! already busy is rejected with [`DeployError::RunInProgress`], never queued.
//! The current status of a target is readable at any time through
//! [`Deployer::status`].
//!
//! # See Also
//!
//! 1. [`changes`]
//! 2. [`mapper`]
//! 3. [`transfer`]

pub mod changes;
pub mod ignore;
pub mod mapper;
pub mod provision;
pub mod report;
pub mod transfer;

use crate::{
    deploy::{
        changes::{resolve, CandidateFile, ChangeSelection, ResolveError, VersionControl},
        ignore::IgnoreRuleSet,
        mapper::{map, InvalidTarget, DeploymentTarget, Mapping, RemoteAddress, TargetKind},
        provision::Provisioner,
        report::ReportSink,
        transfer::{
            Batch, FailurePolicy, TransferExecutor, TransferOutcome, TransferStatus,
        },
    },
    config::{Settings, DEFAULT_CONCURRENCY},
    host::Host,
    store::{SettingsStore, StoreError, TargetRegistry},
};

use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};
use tracing::{info, instrument, warn};

/// Stage of a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    Idle,
    Resolving,
    Mapping,
    Provisioning,
    Transferring,
    Succeeded,
    Failed,
}

impl RunStatus {
    /// Check if run has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl Display for RunStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Mapping => "mapping",
            Self::Provisioning => "provisioning",
            Self::Transferring => "transferring",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

/// Counts of per-file outcomes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Display for RunSummary {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} succeeded, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        )
    }
}

/// Result of one deployment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRun {
    pub target: DeploymentTarget,
    pub selection: ChangeSelection,
    pub candidates: Vec<CandidateFile>,
    pub outcomes: Vec<TransferOutcome>,
    pub status: RunStatus,

    /// Set if the selection turned up nothing to deploy.
    pub no_changes: bool,
}

impl DeploymentRun {
    fn new(target: DeploymentTarget, selection: ChangeSelection) -> Self {
        Self {
            target,
            selection,
            candidates: Vec::new(),
            outcomes: Vec::new(),
            status: RunStatus::Idle,
            no_changes: false,
        }
    }

    /// Count outcomes by status.
    pub fn summary(&self) -> RunSummary {
        self.outcomes
            .iter()
            .fold(RunSummary::default(), |mut summary, outcome| {
                match outcome.status {
                    TransferStatus::Success => summary.succeeded += 1,
                    TransferStatus::Failed => summary.failed += 1,
                    TransferStatus::Skipped => summary.skipped += 1,
                }
                summary
            })
    }

    /// Check if run succeeded.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Tunables of the deployment engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    /// Maximum number of free-form transfers in flight.
    pub concurrency: usize,

    /// Name of ignore file at project root.
    pub ignore_file: String,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            ignore_file: ".gitignore".into(),
        }
    }
}

impl From<&Settings> for DeployOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            concurrency: settings.concurrency,
            ignore_file: settings.ignore_file.clone(),
        }
    }
}

/// Deployment orchestrator.
pub struct Deployer<S, V, H>
where
    S: SettingsStore,
    V: VersionControl,
    H: Host,
{
    registry: TargetRegistry<S>,
    vcs: V,
    host: H,
    options: DeployOptions,
    active: Mutex<HashMap<String, RunStatus>>,
}

impl<S, V, H> Deployer<S, V, H>
where
    S: SettingsStore,
    V: VersionControl,
    H: Host,
{
    /// Construct new deployer from its collaborators.
    pub fn new(registry: TargetRegistry<S>, vcs: V, host: H, options: DeployOptions) -> Self {
        Self {
            registry,
            vcs,
            host,
            options,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Target registry in use.
    pub fn registry(&self) -> &TargetRegistry<S> {
        &self.registry
    }

    /// Host in use.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Register deployment target of project root.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::InvalidTarget`] if location cannot be used as
    ///   a target.
    /// - Return [`DeployError::Registry`] if target cannot be stored.
    pub fn set_target(
        &self,
        project_root: impl Into<PathBuf>,
        location: impl Into<String>,
    ) -> Result<DeploymentTarget> {
        let target = DeploymentTarget::new(project_root, location)?;
        self.registry
            .set(&target.project_root, target.location.clone())?;
        info!("deploy {:?} to {target}", target.project_root.display());

        Ok(target)
    }

    /// Get deployment target of project root.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::NoTargetConfigured`] if project root has no
    ///   target.
    /// - Return [`DeployError::InvalidTarget`] if stored target cannot be
    ///   used.
    /// - Return [`DeployError::Registry`] if target cannot be read.
    pub fn target(&self, project_root: &Path) -> Result<DeploymentTarget> {
        let location =
            self.registry
                .get(project_root)?
                .ok_or_else(|| DeployError::NoTargetConfigured {
                    root: project_root.to_path_buf(),
                })?;

        Ok(DeploymentTarget::new(project_root, location)?)
    }

    /// Current status of target.
    ///
    /// Targets without an active run are [`RunStatus::Idle`].
    pub fn status(&self, target: &DeploymentTarget) -> RunStatus {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target.key())
            .copied()
            .unwrap_or(RunStatus::Idle)
    }

    /// Deploy project root to its registered target.
    ///
    /// An empty change-set terminates the run successfully without any
    /// outcomes.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::NoTargetConfigured`] if project root has no
    ///   target.
    /// - Return [`DeployError::InvalidTarget`] if stored target cannot be
    ///   used.
    /// - Return [`DeployError::RunInProgress`] if target is already busy.
    /// - Return [`DeployError::NoRepositoryForRoot`] if working or staged
    ///   changes are requested without a repository at project root.
    /// - Return [`DeployError::Ignore`] if ignore file cannot be loaded.
    /// - Return [`DeployError::Resolve`] if candidates cannot be resolved.
    #[instrument(skip(self, project_root, sink), level = "debug")]
    pub async fn deploy(
        &self,
        project_root: &Path,
        selection: ChangeSelection,
        sink: &dyn ReportSink,
    ) -> Result<DeploymentRun> {
        let target = self.target(project_root)?;
        let guard = self.claim(&target, sink)?;
        let mut run = DeploymentRun::new(target, selection);
        info!(
            "deploy {selection} changes of {:?} to {}",
            project_root.display(),
            run.target
        );

        let rules = IgnoreRuleSet::load(project_root, &self.options.ignore_file)?;
        run.candidates = resolve(&self.vcs, project_root, selection, &rules)?;
        if run.candidates.is_empty() {
            sink.append_line(&format!("no {selection} changes to deploy"));
            run.no_changes = true;
            run.status = guard.finish(RunStatus::Succeeded);
            return Ok(run);
        }

        guard.mark(RunStatus::Mapping);
        let mut remotes = Vec::new();
        for candidate in &run.candidates {
            match map(candidate, &run.target) {
                Mapping::Remote(remote) => remotes.push((candidate.clone(), remote)),
                Mapping::Skip(reason) => {
                    warn!("skip {:?}: {reason}", candidate.relative_path);
                    let outcome = TransferOutcome::skipped(candidate.clone(), reason);
                    sink.on_item_complete(&outcome);
                    run.outcomes.push(outcome);
                }
            }
        }

        let executor = TransferExecutor::new(&self.host, self.options.concurrency, sink);
        let batch = match &run.target.kind {
            TargetKind::FreeForm { root } if selection == ChangeSelection::Full => {
                guard.mark(RunStatus::Transferring);
                executor.transfer_tree(project_root, root, &rules).await
            }
            TargetKind::FreeForm { .. } => {
                guard.mark(RunStatus::Transferring);
                let items = remotes
                    .into_iter()
                    .filter_map(|(candidate, remote)| match remote {
                        RemoteAddress::FreeForm { path } => Some((candidate, path)),
                        RemoteAddress::Structured(_) => None,
                    })
                    .collect::<Vec<_>>();
                executor.transfer_changes(&items).await
            }
            TargetKind::Structured { .. } => {
                let items = remotes
                    .into_iter()
                    .filter_map(|(candidate, remote)| match remote {
                        RemoteAddress::Structured(member) => Some((candidate, member)),
                        RemoteAddress::FreeForm { .. } => None,
                    })
                    .collect::<Vec<_>>();
                let policy = match selection {
                    ChangeSelection::Full => FailurePolicy::StopAtFirst,
                    ChangeSelection::Working | ChangeSelection::Staged => FailurePolicy::Continue,
                };
                let mut provisioner = Provisioner::new(&self.host);
                let on_phase = |status: RunStatus| guard.mark(status);
                executor
                    .transfer_members(&items, &mut provisioner, policy, &on_phase)
                    .await
            }
        };

        let Batch { outcomes, aborted } = batch;
        run.outcomes.extend(outcomes);
        if let Some(reason) = &aborted {
            warn!("run aborted: {reason}");
            sink.append_line(&format!("ABORTED: {reason}"));
        }

        let summary = run.summary();
        let status = if summary.failed == 0 && aborted.is_none() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        run.status = guard.finish(status);
        info!("deployment {status}: {summary}");
        sink.append_line(&format!("deployment {status}: {summary}"));

        Ok(run)
    }

    fn claim<'a>(
        &'a self,
        target: &DeploymentTarget,
        sink: &'a dyn ReportSink,
    ) -> Result<RunGuard<'a>> {
        let key = target.key();
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);

        // INVARIANT: At most one non-terminal run per target.
        if active.contains_key(&key) {
            return Err(DeployError::RunInProgress { target: key });
        }

        active.insert(key.clone(), RunStatus::Resolving);
        drop(active);
        sink.on_status(RunStatus::Resolving);

        Ok(RunGuard {
            active: &self.active,
            key,
            sink,
        })
    }
}

/// Claim on a target for the lifetime of a run.
///
/// Releases the target when dropped, no matter how the run ended.
struct RunGuard<'a> {
    active: &'a Mutex<HashMap<String, RunStatus>>,
    key: String,
    sink: &'a dyn ReportSink,
}

impl RunGuard<'_> {
    fn mark(&self, status: RunStatus) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.key.clone(), status);
        self.sink.on_status(status);
    }

    fn finish(self, status: RunStatus) -> RunStatus {
        self.sink.on_status(status);
        status
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Deployment error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Project root has no deployment target.
    #[error("no deployment target configured for {:?}", root.display())]
    NoTargetConfigured { root: PathBuf },

    /// Deployment target cannot be used.
    #[error(transparent)]
    InvalidTarget(#[from] InvalidTarget),

    /// Change-set requested for project root without a repository.
    #[error("no repository found for {:?}", root.display())]
    NoRepositoryForRoot { root: PathBuf },

    /// Target already has an active run.
    #[error("deployment to {target:?} already in progress")]
    RunInProgress { target: String },

    /// Candidate files cannot be resolved.
    #[error(transparent)]
    Resolve(ResolveError),

    /// Ignore rules cannot be loaded.
    #[error(transparent)]
    Ignore(#[from] ignore::Error),

    /// Target registry cannot be accessed.
    #[error(transparent)]
    Registry(#[from] StoreError),
}

impl From<ResolveError> for DeployError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::NoRepositoryForRoot { root } => Self::NoRepositoryForRoot { root },
            error => Self::Resolve(error),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = DeployError> = std::result::Result<T, E>;
