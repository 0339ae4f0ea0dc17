// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The slicer subprocess boundary (§6 "Slicer interface"), grounded in
//! `original_source/conveyor/server/__init__.py::Server.slice`, which
//! dispatches to `MiracleGrueSlicer`/`SkeinforgeSlicer` by
//! `slicer_settings.slicer` and drives `task.heartbeat` with numeric
//! progress while the subprocess runs.

use async_trait::async_trait;
use conveyor_core::{Progress, Task};
use std::path::Path;

#[async_trait]
pub trait Slicer: Send + Sync {
    async fn slice(
        &self,
        input_path: &Path,
        output_path: &Path,
        settings: &serde_json::Value,
        material: Option<&str>,
        dualstrusion: bool,
        task: Task<serde_json::Value>,
    );
}

/// Test double: heartbeats a fixed sequence of synthetic progress
/// percentages, then ends. No subprocess is ever spawned.
pub struct FakeSlicer {
    pub steps: Vec<f64>,
    /// When set, fail after heartbeating instead of ending.
    pub fail_with: Option<String>,
}

impl FakeSlicer {
    pub fn new() -> Self {
        Self { steps: vec![0.25, 0.5, 0.75, 1.0], fail_with: None }
    }
}

impl Default for FakeSlicer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Slicer for FakeSlicer {
    async fn slice(
        &self,
        _input_path: &Path,
        _output_path: &Path,
        _settings: &serde_json::Value,
        _material: Option<&str>,
        _dualstrusion: bool,
        task: Task<serde_json::Value>,
    ) {
        let mut canceled = false;
        let cancel_flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag_for_cancel = std::sync::Arc::clone(&cancel_flag);
        task.on_cancel(move |_| {
            flag_for_cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        for pct in &self.steps {
            if cancel_flag.load(std::sync::atomic::Ordering::SeqCst) {
                canceled = true;
                break;
            }
            task.heartbeat(Progress::Percent(*pct));
        }
        if canceled {
            return; // cancel() already drove the terminal transition
        }
        if let Some(message) = &self.fail_with {
            task.fail(conveyor_core::Failure::new("SlicerFailure", message.clone()));
        } else {
            task.end(serde_json::Value::Null);
        }
    }
}
