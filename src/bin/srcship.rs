// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use srcship::{
    config::{ProjectDefinition, Settings},
    deploy::{
        changes::{ChangeSelection, Git2VersionControl},
        mapper::DeploymentTarget,
        report::ReportSink,
        transfer::TransferOutcome,
    },
    host::{SshHost, Transport},
    path::{default_config_file, default_deploy_dir, default_state_file},
    store::{TargetRegistry, TomlSettingsStore},
    DeployOptions, Deployer, RunStatus,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, Select, Text};
use std::{
    fs::{read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
    process::exit,
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Name of project definition file at the project root.
const PROJECT_FILE: &str = "srcship.toml";

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "srcship [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Project root to operate on instead of the current directory.
    #[arg(short, long, global = true, value_name = "path")]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let project_root = project_root(self.project)?;
        match self.command {
            Command::Target(TargetCommand::Set(opts)) => run_target_set(&project_root, opts),
            Command::Target(TargetCommand::Show) => run_target_show(&project_root),
            Command::Target(TargetCommand::Init) => run_target_init(&project_root).await,
            Command::Deploy(opts) => run_deploy(&project_root, opts).await,
            Command::Project(ProjectCommand::Init) => run_project_init(&project_root),
            Command::Project(ProjectCommand::Actions(opts)) => {
                run_project_actions(&project_root, opts)
            }
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Manage deployment target of project.
    #[command(subcommand)]
    Target(TargetCommand),

    /// Deploy project to its target.
    #[command(override_usage = "srcship deploy [--working | --staged | --all]")]
    Deploy(DeployArgs),

    /// Manage project definition.
    #[command(subcommand)]
    Project(ProjectCommand),
}

#[derive(Debug, Clone, Subcommand)]
enum TargetCommand {
    /// Set deployment target, either a directory or a library.
    #[command(override_usage = "srcship target set [location]")]
    Set(TargetSetArgs),

    /// Show deployment target.
    Show,

    /// Create default deploy directory on the host and use it as target.
    Init,
}

#[derive(Debug, Clone, Subcommand)]
enum ProjectCommand {
    /// Write default project definition.
    Init,

    /// List actions applicable to a file.
    #[command(override_usage = "srcship project actions <file>")]
    Actions(ProjectActionsArgs),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct TargetSetArgs {
    /// Absolute directory, or library name.
    #[arg(value_name = "location")]
    pub location: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployArgs {
    /// Deploy uncommitted working tree changes.
    #[arg(short, long, group = "selection")]
    pub working: bool,

    /// Deploy staged changes.
    #[arg(short, long, group = "selection")]
    pub staged: bool,

    /// Deploy every file not excluded by ignore rules.
    #[arg(short, long, group = "selection")]
    pub all: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ProjectActionsArgs {
    /// File to list actions for.
    #[arg(value_name = "file")]
    pub file: PathBuf,
}

/// Progress surface of a deployment run.
struct ProgressSink {
    bar: ProgressBar,
}

impl ProgressSink {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner:.green} [{pos}] {msg}")?);
        bar.enable_steady_tick(Duration::from_millis(100));

        Ok(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ReportSink for ProgressSink {
    fn append_line(&self, line: &str) {
        self.bar.println(line);
    }

    fn report_progress(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn on_item_complete(&self, outcome: &TransferOutcome) {
        self.bar.inc(1);
        self.append_line(&outcome.to_string());
    }

    fn on_status(&self, status: RunStatus) {
        self.bar.set_message(status.to_string());
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn project_root(project: Option<PathBuf>) -> Result<PathBuf> {
    let root = match project {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    Ok(root.canonicalize()?)
}

fn load_settings() -> Result<Settings> {
    let path = default_config_file()?;
    match read_to_string(&path) {
        Ok(data) => Ok(data.parse::<Settings>()?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Settings::default()),
        Err(err) => Err(anyhow!("failed to read {:?}: {err}", path.display())),
    }
}

fn registry() -> Result<TargetRegistry<TomlSettingsStore>> {
    Ok(TargetRegistry::new(TomlSettingsStore::open(
        default_state_file()?,
    )?))
}

fn remote_user(settings: &Settings) -> Result<String> {
    let from_host = settings
        .host
        .as_deref()
        .and_then(|host| host.split_once('@'))
        .map(|(user, _)| user.to_string());

    match from_host {
        Some(user) => Ok(user),
        None => std::env::var("USER").map_err(|_| anyhow!("cannot determine remote user")),
    }
}

fn run_target_set(project_root: &Path, opts: TargetSetArgs) -> Result<()> {
    let location = match opts.location {
        Some(location) => location,
        None => {
            let settings = load_settings()?;
            let suggestion = default_deploy_dir(&remote_user(&settings)?, project_root);
            Text::new("Deploy to directory or library:")
                .with_default(&suggestion)
                .prompt()?
        }
    };

    let target = DeploymentTarget::new(project_root, location)?;
    registry()?.set(project_root, target.location.clone())?;
    info!("target of {:?} is now {target}", project_root.display());

    Ok(())
}

fn run_target_show(project_root: &Path) -> Result<()> {
    match registry()?.get(project_root)? {
        Some(target) => println!("{target}"),
        None => warn!("no deployment target for {:?}", project_root.display()),
    }

    Ok(())
}

async fn run_target_init(project_root: &Path) -> Result<()> {
    let settings = load_settings()?;
    let directory = default_deploy_dir(&remote_user(&settings)?, project_root);
    let accepted = Confirm::new(&format!("Create {directory} and deploy there?"))
        .with_default(true)
        .prompt()?;
    if !accepted {
        return Ok(());
    }

    let host = SshHost::from_settings(&settings)?;
    host.make_dir(&directory).await?;

    let deployer = Deployer::new(
        registry()?,
        Git2VersionControl::new(),
        host,
        DeployOptions::from(&settings),
    );
    let target = deployer.set_target(project_root, directory)?;
    info!("target of {:?} is now {target}", project_root.display());

    Ok(())
}

async fn run_deploy(project_root: &Path, opts: DeployArgs) -> Result<()> {
    let selection = if opts.working {
        ChangeSelection::Working
    } else if opts.staged {
        ChangeSelection::Staged
    } else if opts.all {
        ChangeSelection::Full
    } else {
        Select::new(
            "What to deploy?",
            vec![
                ChangeSelection::Working,
                ChangeSelection::Staged,
                ChangeSelection::Full,
            ],
        )
        .prompt()?
    };

    let settings = load_settings()?;
    let deployer = Deployer::new(
        registry()?,
        Git2VersionControl::new(),
        SshHost::from_settings(&settings)?,
        DeployOptions::from(&settings),
    );

    let sink = ProgressSink::new()?;
    let result = deployer.deploy(project_root, selection, &sink).await;
    sink.finish();

    let run = result?;
    if run.is_success() {
        Ok(())
    } else {
        Err(anyhow!("deployment failed: {}", run.summary()))
    }
}

fn run_project_init(project_root: &Path) -> Result<()> {
    let path = project_root.join(PROJECT_FILE);
    if path.exists() {
        return Err(anyhow!("{:?} already exists", path.display()));
    }

    write(&path, ProjectDefinition::default().to_string())?;
    info!("wrote {:?}", path.display());

    Ok(())
}

fn run_project_actions(project_root: &Path, opts: ProjectActionsArgs) -> Result<()> {
    let definition = read_to_string(project_root.join(PROJECT_FILE))?.parse::<ProjectDefinition>()?;
    let extension = opts
        .file
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();

    let actions = definition.actions_for(&extension);
    if actions.is_empty() {
        warn!("no actions apply to {:?}", opts.file.display());
    }

    for action in actions {
        println!("{}: {}", action.name, action.command);
    }

    Ok(())
}
