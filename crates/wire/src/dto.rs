// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-shape mirrors of the daemon's internal job/printer records, the
//! Rust equivalent of the original's `Job.todict()`/`Printer.todict()`.

use conveyor_core::{Conclusion, CurrentStep, Failure, Job, State};
use serde::{Deserialize, Serialize};

/// Broadcast/response payload for a device, known profile or attached.
/// `can_print` mirrors `conveyor.domain.Printer.fromprofile` — true only
/// for an attached [`conveyor_core`] device worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrinterDto {
    pub printer_id: String,
    pub portname: Option<String>,
    pub profile: serde_json::Value,
    pub can_print: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<serde_json::Value>,
}

/// Broadcast/response payload for a job. `currentstep`/`failure` are `None`
/// until the pipeline has heartbeat/stopped at least once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDto {
    pub id: u64,
    pub build_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer_id: Option<String>,
    pub state: State,
    pub conclusion: Conclusion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currentstep: Option<CurrentStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

impl From<&Job> for JobDto {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.get(),
            build_name: job.config.build_name.clone(),
            printer_id: job.config.printer_id.as_ref().map(|id| id.as_str().to_string()),
            state: job.state,
            conclusion: job.conclusion,
            currentstep: job.currentstep.clone(),
            failure: job.failure.clone(),
        }
    }
}
