// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The physical-device driver boundary (§6 "Device Worker interface").
//!
//! A [`DeviceWorker`](crate::device_worker::DeviceWorker) owns exactly one
//! `DeviceDriver` and drives every operation through it. The `Task` handed
//! to each method is already `RUNNING` (the worker's `startevent` handler
//! claimed it before dispatching) — the driver only needs to heartbeat and
//! conclude it.

use async_trait::async_trait;
use conveyor_core::Task;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[async_trait]
pub trait DeviceDriver: Send + Sync {
    fn printer_id(&self) -> &str;
    fn portname(&self) -> &str;
    fn profile(&self) -> serde_json::Value;

    async fn print(&self, gcode_path: &Path, task: Task<serde_json::Value>);
    async fn read_eeprom(&self, task: Task<serde_json::Value>);
    async fn write_eeprom(&self, map: serde_json::Value, task: Task<serde_json::Value>);
    async fn upload_firmware(&self, machine_type: &str, file: &Path, task: Task<serde_json::Value>);
    async fn reset_to_factory(&self, task: Task<serde_json::Value>);
}

/// Test double driving every operation to a deterministic outcome, gated
/// like the teacher's fake adapters behind `test-support`.
pub struct FakeDeviceDriver {
    printer_id: String,
    portname: String,
    /// When set, every operation fails with this I/O error instead of
    /// succeeding — used to simulate §8 seed scenario 6 (device eviction).
    pub fail_with: Option<std::io::Error>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeDeviceDriver {
    pub fn new(printer_id: impl Into<String>, portname: impl Into<String>) -> Self {
        Self {
            printer_id: printer_id.into(),
            portname: portname.into(),
            fail_with: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceDriver for FakeDeviceDriver {
    fn printer_id(&self) -> &str {
        &self.printer_id
    }

    fn portname(&self) -> &str {
        &self.portname
    }

    fn profile(&self) -> serde_json::Value {
        serde_json::json!({ "type": "fake" })
    }

    async fn print(&self, _gcode_path: &Path, task: Task<serde_json::Value>) {
        self.record();
        if let Some(err) = &self.fail_with {
            task.fail(conveyor_core::Failure::from_io_error("DeviceIOError", err));
            return;
        }
        task.heartbeat(conveyor_core::Progress::Percent(1.0));
        task.end(serde_json::Value::Null);
    }

    async fn read_eeprom(&self, task: Task<serde_json::Value>) {
        self.record();
        task.end(serde_json::json!({}));
    }

    async fn write_eeprom(&self, _map: serde_json::Value, task: Task<serde_json::Value>) {
        self.record();
        task.end(serde_json::Value::Null);
    }

    async fn upload_firmware(&self, _machine_type: &str, _file: &Path, task: Task<serde_json::Value>) {
        self.record();
        task.end(serde_json::Value::Null);
    }

    async fn reset_to_factory(&self, task: Task<serde_json::Value>) {
        self.record();
        task.end(serde_json::Value::Null);
    }
}
