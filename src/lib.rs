// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deploy local source trees to a remote legacy host.
//!
//! The host keeps objects in two namespaces: a hierarchical file system, and
//! a flat container/member namespace with strict naming rules. Srcship maps a
//! local project onto either one, transfers only what changed, and reports
//! the fate of every file.
//!
//! See [`deploy`] for the deployment engine itself.

pub mod config;
pub mod deploy;
pub mod host;
pub mod path;
pub mod store;

pub use deploy::{DeployError, DeployOptions, Deployer, DeploymentRun, RunStatus};
