// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Reporting sinks.
//!
//! The deployment engine knows nothing about terminals, prompts, or progress
//! bars. It pushes lines, progress messages, per-file outcomes, and status
//! changes into a [`ReportSink`], and never reads anything back.

use crate::deploy::{transfer::TransferOutcome, RunStatus};

use tracing::{debug, info};

/// Fire-and-forget observer of a deployment run.
pub trait ReportSink: Send + Sync {
    /// Append line to the outcome log.
    fn append_line(&self, line: &str);

    /// Report transient progress message.
    fn report_progress(&self, message: &str);

    /// Observe outcome of one file as soon as it settles.
    fn on_item_complete(&self, outcome: &TransferOutcome) {
        self.append_line(&outcome.to_string());
    }

    /// Observe status change of the run.
    fn on_status(&self, _status: RunStatus) {}
}

/// Sink that forwards everything to tracing.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn append_line(&self, line: &str) {
        info!("{line}");
    }

    fn report_progress(&self, message: &str) {
        info!("{message}");
    }

    fn on_status(&self, status: RunStatus) {
        debug!("run status is now {status}");
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn append_line(&self, _line: &str) {}

    fn report_progress(&self, _message: &str) {}
}
