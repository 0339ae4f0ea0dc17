// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recipe (§4.I): turns a [`JobConfig`] into the concrete [`Task`] pipeline
//! that drives it. Three recipes share a slice stage and diverge after it:
//!
//! - **slice**: `invoke_slicer` -> optional `gcodeprocessor`.
//! - **printtofile**: the slice pipeline -> write the sliced gcode to its
//!   output container via the Hardware Queue (no device is claimed).
//! - **print**: the slice pipeline -> the target device's `print` operation,
//!   claimed and run through its [`DeviceWorker`].
//!
//! Every stage is built `Pending` and only claims its real resource (the
//! slicer subprocess, the hardware queue, the device) once the pipeline
//! actually starts it — grounded in the same lazy-dispatch pattern as
//! [`crate::device_worker::DeviceWorker`].

use conveyor_core::{pipeline, EventBus, Failure, JobConfig, Progress, Task};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapters::Slicer;
use crate::device_worker::DeviceWorker;
use crate::hardware_queue::HardwareQueue;

pub struct Recipe {
    slicer: Arc<dyn Slicer>,
    hardware_queue: Arc<HardwareQueue>,
    bus: Arc<EventBus>,
}

impl Recipe {
    pub fn new(slicer: Arc<dyn Slicer>, hardware_queue: Arc<HardwareQueue>, bus: Arc<EventBus>) -> Self {
        Self { slicer, hardware_queue, bus }
    }

    fn gcode_path(config: &JobConfig) -> PathBuf {
        config.output_path.clone().unwrap_or_else(|| config.input_path.with_extension("gcode"))
    }

    /// The `invoke_slicer` stage: `Pending` until started, at which point
    /// the slicer subprocess wrapper is spawned and drives the task itself.
    fn slice_step(&self, config: &JobConfig) -> Task<Value> {
        let task: Task<Value> = Task::new("recipe.slice", Arc::clone(&self.bus));
        let slicer = Arc::clone(&self.slicer);
        let input_path = config.input_path.clone();
        let output_path = Self::gcode_path(config);
        let settings = config.slicer_settings.clone();
        let material = config.material.clone();
        let dualstrusion = config.dualstrusion;
        task.startevent.attach(move |started| {
            let slicer = Arc::clone(&slicer);
            let input_path = input_path.clone();
            let output_path = output_path.clone();
            let settings = settings.clone();
            let material = material.clone();
            let started = started.clone();
            tokio::spawn(async move {
                slicer
                    .slice(&input_path, &output_path, &settings, material.as_deref(), dualstrusion, started)
                    .await;
            });
        });
        task
    }

    /// The optional post-processing filter named by `gcodeprocessor`.
    /// Out-of-scope filters aren't modeled; running one is reduced to a
    /// single heartbeat-then-end, matching how the slicer subprocess
    /// wrapper is faked in tests.
    fn gcodeprocessor_step(&self, name: String) -> Task<Value> {
        let task: Task<Value> = Task::new(format!("recipe.gcodeprocessor.{name}"), Arc::clone(&self.bus));
        task.startevent.attach(move |started| {
            started.heartbeat(Progress::Percent(1.0));
            started.end(Value::Null);
        });
        task
    }

    fn slice_steps(&self, config: &JobConfig) -> Vec<Task<Value>> {
        let mut steps = vec![self.slice_step(config)];
        if let Some(name) = &config.gcodeprocessor {
            steps.push(self.gcodeprocessor_step(name.clone()));
        }
        steps
    }

    /// `slice`: produce the pipeline without attaching any print target.
    pub fn slice(&self, config: &JobConfig) -> Task<Value> {
        pipeline("recipe.slice-job", Arc::clone(&self.bus), self.slice_steps(config))
    }

    /// `printtofile`: slice, then serialize the write through the Hardware
    /// Queue instead of any per-device worker (§4.I — `printtofile` isn't a
    /// `DeviceDriver` operation; it's a process-wide resource).
    pub fn printtofile(&self, config: &JobConfig) -> Task<Value> {
        let mut steps = self.slice_steps(config);
        steps.push(self.printtofile_step(config));
        pipeline("recipe.printtofile-job", Arc::clone(&self.bus), steps)
    }

    fn printtofile_step(&self, config: &JobConfig) -> Task<Value> {
        let task: Task<Value> = Task::new("recipe.printtofile", Arc::clone(&self.bus));
        let queue = Arc::clone(&self.hardware_queue);
        let output_path = config.output_path.clone().unwrap_or_else(|| Self::gcode_path(config).with_extension("s3g"));
        let container = config.print_to_file_type.clone().unwrap_or_else(|| "s3g".to_string());
        task.startevent.attach(move |started| {
            let started = started.clone();
            let output_path = output_path.clone();
            let container = container.clone();
            queue.submit(move || {
                started.heartbeat(Progress::Percent(1.0));
                started.end(serde_json::json!({ "output_path": output_path, "type": container }));
            });
        });
        task
    }

    /// `print`: slice, then claim and run the named device's `print`
    /// operation, surfacing `DeviceBusy` as a task failure if another
    /// operation is already running on it.
    pub fn print(&self, config: &JobConfig, device: &DeviceWorker) -> Task<Value> {
        let mut steps = self.slice_steps(config);
        let gcode_path = Self::gcode_path(config);
        steps.push(device.print(gcode_path));
        pipeline("recipe.print-job", Arc::clone(&self.bus), steps)
    }

    /// Build the appropriate pipeline for `config` without attaching or
    /// starting it. `device` must be `Some` for a `print` job and is ignored
    /// otherwise; a `print` job with no resolved device fails immediately.
    ///
    /// Deliberately stops short of [`Job::attach_process`]/`start()`: the
    /// caller (`crate::session`) must attach its `heartbeatevent`/
    /// `stoppedevent` observers and call `ServerCore::addjob` *before*
    /// starting the pipeline, or a fast-completing task could deliver
    /// `jobchanged` ahead of `jobadded` (§5's ordering invariant).
    pub fn build(&self, config: &JobConfig, device: Option<&DeviceWorker>) -> Result<Task<Value>, Failure> {
        if config.printer_id.is_some() {
            match device {
                Some(device) => Ok(self.print(config, device)),
                None => Err(Failure::new("NoPrinterConnected", "print job has no resolved device")),
            }
        } else if config.print_to_file_type.is_some() {
            Ok(self.printtofile(config))
        } else {
            Ok(self.slice(config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FakeDeviceDriver, FakeSlicer};
    use conveyor_core::{Conclusion, JobConfig};

    fn recipe() -> (Recipe, Arc<EventBus>) {
        let bus = EventBus::new();
        let recipe = Recipe::new(Arc::new(FakeSlicer::new()), HardwareQueue::new(), Arc::clone(&bus));
        (recipe, bus)
    }

    #[tokio::test]
    async fn slice_pipeline_ends_after_slicer_finishes() {
        let (recipe, bus) = recipe();
        let config = JobConfig::builder("widget", "/tmp/widget.stl").build();
        let task = recipe.slice(&config);
        task.start();
        bus.drain();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.drain();
        assert_eq!(task.conclusion(), Conclusion::Ended);
    }

    #[tokio::test]
    async fn printtofile_pipeline_runs_through_hardware_queue() {
        let bus = EventBus::new();
        let queue = HardwareQueue::new();
        let recipe = Recipe::new(Arc::new(FakeSlicer::new()), Arc::clone(&queue), Arc::clone(&bus));
        let config = JobConfig::builder("widget", "/tmp/widget.stl")
            .print_to_file_type("s3g")
            .build();
        let task = recipe.printtofile(&config);
        task.start();
        bus.drain();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        queue.drain();
        bus.drain();
        assert_eq!(task.conclusion(), Conclusion::Ended);
    }

    #[test]
    fn build_rejects_a_print_job_with_no_resolved_device() {
        let (recipe, _bus) = recipe();
        let config = JobConfig::builder("widget", "/tmp/widget.stl")
            .printer_id(Some(conveyor_core::PrinterId::new("uuid-1")))
            .build();
        let err = recipe.build(&config, None).unwrap_err();
        assert_eq!(err.name, "NoPrinterConnected");
    }

    #[tokio::test]
    async fn print_pipeline_drives_device_after_slicing() {
        let (recipe, bus) = recipe();
        let device = DeviceWorker::new(Arc::new(FakeDeviceDriver::new("uuid-1", "/dev/ttyACM0")), Arc::clone(&bus));
        let config = JobConfig::builder("widget", "/tmp/widget.stl")
            .printer_id(Some(conveyor_core::PrinterId::new("uuid-1")))
            .build();
        let task = recipe.print(&config, &device);
        task.start();
        bus.drain();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.drain();
        assert_eq!(task.conclusion(), Conclusion::Ended);
    }
}
