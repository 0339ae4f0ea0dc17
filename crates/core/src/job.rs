// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job identifier and record.
//!
//! A `Job` is the user-visible unit of work created by an RPC handler
//! (`print`/`printtofile`/`slice`) and driven by its attached pipeline
//! [`Task`]. Field set is grounded in `Job.todict()` /
//! `conveyor.domain.Job` in the original server, which the distilled spec
//! collapsed into "gcode-processor flags" and "slicer settings" — kept here
//! as named fields so the three RPC entry points are told apart
//! structurally rather than by an untyped flags bag.

use crate::id::{JobId, PrinterId};
use crate::task::{Conclusion, Progress, State, Task};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything an RPC handler supplies when creating a job, before the
/// Recipe assembles a pipeline for it. Mirrors the arguments to the
/// original's `print`/`printtofile`/`slice` JSON-RPC methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub build_name: String,
    pub input_path: PathBuf,
    /// Null for `slice`/`printtofile` with no attached device; set for `print`.
    #[serde(default)]
    pub printer_id: Option<PrinterId>,
    /// Name of the post-processing gcode filter to run after slicing, if any.
    #[serde(default)]
    pub gcodeprocessor: Option<String>,
    #[serde(default)]
    pub skip_start_end: bool,
    #[serde(default)]
    pub with_start_end: bool,
    /// Archive verbosity level for the slicer's intermediate output.
    #[serde(default)]
    pub archive_lvl: Option<String>,
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    /// Output container for `printtofile`/`slice` (e.g. `"s3g"`, `"gcode"`).
    #[serde(default)]
    pub print_to_file_type: Option<String>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub dualstrusion: bool,
    /// Opaque slicer settings bag (profile-specific; not modeled further —
    /// the slicer subprocess wrapper is an out-of-scope collaborator).
    #[serde(default)]
    pub slicer_settings: serde_json::Value,
}

impl JobConfig {
    pub fn builder(build_name: impl Into<String>, input_path: impl Into<PathBuf>) -> JobConfigBuilder {
        JobConfigBuilder {
            build_name: build_name.into(),
            input_path: input_path.into(),
            printer_id: None,
            gcodeprocessor: None,
            skip_start_end: false,
            with_start_end: false,
            archive_lvl: None,
            archive_dir: None,
            print_to_file_type: None,
            output_path: None,
            material: None,
            dualstrusion: false,
            slicer_settings: serde_json::Value::Null,
        }
    }
}

pub struct JobConfigBuilder {
    build_name: String,
    input_path: PathBuf,
    printer_id: Option<PrinterId>,
    gcodeprocessor: Option<String>,
    skip_start_end: bool,
    with_start_end: bool,
    archive_lvl: Option<String>,
    archive_dir: Option<PathBuf>,
    print_to_file_type: Option<String>,
    output_path: Option<PathBuf>,
    material: Option<String>,
    dualstrusion: bool,
    slicer_settings: serde_json::Value,
}

impl JobConfigBuilder {
    crate::setters! {
        set {
            printer_id: Option<PrinterId>,
            skip_start_end: bool,
            with_start_end: bool,
            dualstrusion: bool,
            slicer_settings: serde_json::Value,
        }
        option {
            gcodeprocessor: String,
            archive_lvl: String,
            archive_dir: PathBuf,
            print_to_file_type: String,
            output_path: PathBuf,
            material: String,
        }
    }

    pub fn build(self) -> JobConfig {
        JobConfig {
            build_name: self.build_name,
            input_path: self.input_path,
            printer_id: self.printer_id,
            gcodeprocessor: self.gcodeprocessor,
            skip_start_end: self.skip_start_end,
            with_start_end: self.with_start_end,
            archive_lvl: self.archive_lvl,
            archive_dir: self.archive_dir,
            print_to_file_type: self.print_to_file_type,
            output_path: self.output_path,
            material: self.material,
            dualstrusion: self.dualstrusion,
            slicer_settings: self.slicer_settings,
        }
    }
}

/// A snapshot of a pipeline step's progress, suitable for the `jobchanged`
/// broadcast's `currentstep` field. Flattened from [`Progress`] since a
/// `Task` itself isn't serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CurrentStep {
    Percent(f64),
    Nested { name: String, percent: Option<f64> },
}

/// A user-visible unit of work: the job descriptor plus the live mirror of
/// its pipeline task's state. Per §5, these mirror fields are
/// single-writer — only the Server Core, reacting to the process task's
/// events, calls [`Job::sync_from_process`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub config: JobConfig,
    pub state: State,
    pub conclusion: Conclusion,
    #[serde(default)]
    pub currentstep: Option<CurrentStep>,
    #[serde(default)]
    pub failure: Option<crate::error::Failure>,
    /// Not serialized: the live pipeline. `None` between `createjob` and the
    /// RPC handler attaching + starting it.
    #[serde(skip)]
    pub process: Option<Task<serde_json::Value>>,
}

impl Job {
    /// Constructed by the Server Core with a null `process`; the RPC
    /// handler then builds the pipeline via Recipe, calls
    /// [`Job::attach_process`], and starts it.
    pub fn new(id: JobId, config: JobConfig) -> Self {
        Self {
            id,
            config,
            state: State::Pending,
            conclusion: Conclusion::None,
            currentstep: None,
            failure: None,
            process: None,
        }
    }

    pub fn attach_process(&mut self, process: Task<serde_json::Value>) {
        self.process = Some(process);
    }

    /// Mirror the attached process task's observable fields onto this
    /// record. Called from the Server Core's `heartbeatevent`/`stoppedevent`
    /// observers (§4.I), never directly by the pipeline itself.
    pub fn sync_from_process(&mut self) {
        let Some(process) = &self.process else {
            return;
        };
        self.state = process.state();
        self.conclusion = process.conclusion();
        self.failure = process.failure();
        self.currentstep = process.progress().map(|p| match p {
            Progress::Percent(pct) => CurrentStep::Percent(pct),
            Progress::Child(child) => CurrentStep::Nested {
                name: child
                    .startevent
                    .name()
                    .trim_end_matches(".start")
                    .to_string(),
                percent: match child.progress() {
                    Some(Progress::Percent(pct)) => Some(pct),
                    _ => None,
                },
            },
        });
    }

    pub fn is_terminal(&self) -> bool {
        self.state == State::Stopped
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Job {
    /// Build a job for tests without going through the Server Core's id
    /// counter.
    pub fn for_test(id: u64, build_name: impl Into<String>, input_path: impl Into<PathBuf>) -> Self {
        Self::new(JobId::new(id), JobConfig::builder(build_name, input_path).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use std::sync::Arc;

    #[test]
    fn sync_from_process_mirrors_terminal_state() {
        let bus = EventBus::new();
        let mut job = Job::for_test(1, "widget", "/tmp/widget.stl");
        let process: Task<serde_json::Value> = Task::new("job-1", bus.clone());
        job.attach_process(process.clone());

        process.start();
        bus.drain();
        process.heartbeat(crate::task::Progress::Percent(0.3));
        bus.drain();
        job.sync_from_process();
        assert_eq!(job.state, State::Running);
        assert_eq!(job.currentstep, Some(CurrentStep::Percent(0.3)));

        process.end(serde_json::Value::Null);
        bus.drain();
        job.sync_from_process();
        assert_eq!(job.state, State::Stopped);
        assert_eq!(job.conclusion, Conclusion::Ended);
    }
}
