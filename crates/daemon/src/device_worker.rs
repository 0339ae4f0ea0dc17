// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One [`DeviceWorker`] per attached device (§4.E). Owns the device's
//! [`DeviceDriver`] handle and serializes every operation against it: at
//! most one non-idle operation may be `RUNNING` at a time (§8 "device
//! exclusivity"); a second request while busy fails the task with a
//! `DeviceBusy`-named [`Failure`] once the bus delivers its `startevent`.
//!
//! Every operation returns a `Pending` [`Task`] whose `startevent` is
//! wired to perform the actual device claim and dispatch — so a task built
//! here is equally safe used standalone (caller calls `start()` right
//! away) or embedded as a deferred step inside a [`conveyor_core::pipeline`]
//! (the pipeline machinery calls `start()` only once the prior step ends).

use conveyor_core::{Event, EventBus, Failure, Handle, PortName, PrinterId, Task};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::adapters::DeviceDriver;

pub struct DeviceWorker {
    driver: Arc<dyn DeviceDriver>,
    bus: Arc<EventBus>,
    busy: Arc<AtomicBool>,
    /// Fires this worker's portname whenever an operation concludes
    /// `FAILED` with a `DeviceIOError` (§7: "evict device + `printerremoved`
    /// broadcast"). The worker itself has no reference to the Server Core —
    /// whoever registers it (`main.rs::spawn_detector`, or a test) attaches
    /// the eviction handler via [`DeviceWorker::on_io_error`] before handing
    /// the worker to [`crate::server::ServerCore::appendprinter`].
    io_error_event: Event<PortName>,
}

impl DeviceWorker {
    pub fn new(driver: Arc<dyn DeviceDriver>, bus: Arc<EventBus>) -> Self {
        let io_error_event = Event::new(format!("device.{}.io_error", driver.printer_id()), Arc::clone(&bus));
        Self { driver, bus, busy: Arc::new(AtomicBool::new(false)), io_error_event }
    }

    /// Observe this device's I/O-error eviction signal (§7, §8 seed scenario
    /// 6). Invoked with the device's portname once per failed operation
    /// whose failure is `DeviceIOError`.
    pub fn on_io_error(&self, handler: impl Fn(&PortName) + Send + Sync + 'static) -> Handle {
        self.io_error_event.attach(handler)
    }

    pub fn printer_id(&self) -> PrinterId {
        PrinterId::new(self.driver.printer_id())
    }

    pub fn portname(&self) -> PortName {
        PortName::new(self.driver.portname())
    }

    pub fn profile(&self) -> serde_json::Value {
        self.driver.profile()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Build a `Pending` task for operation `name` whose `startevent`
    /// claims exclusive access (failing the task with `DeviceBusy` if
    /// already held) and, once claimed, runs `dispatch` with the task and
    /// releases the claim on `stoppedevent` regardless of conclusion.
    fn build_task<F>(&self, name: &str, dispatch: F) -> Task<serde_json::Value>
    where
        F: FnOnce(Arc<dyn DeviceDriver>, Task<serde_json::Value>) + Send + 'static,
    {
        let task: Task<serde_json::Value> =
            Task::new(format!("device.{}.{name}", self.driver.printer_id()), Arc::clone(&self.bus));
        let busy = Arc::clone(&self.busy);
        let driver = Arc::clone(&self.driver);
        let mut dispatch = Some(dispatch);
        let io_error_event = self.io_error_event.clone();
        let portname = self.portname();
        task.startevent.attach(move |started| {
            if busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                started.fail(Failure::new("DeviceBusy", "device is already running an operation"));
                return;
            }
            let busy_release = Arc::clone(&busy);
            let io_error_event = io_error_event.clone();
            let portname = portname.clone();
            started.stoppedevent.attach(move |stopped| {
                busy_release.store(false, Ordering::SeqCst);
                if stopped.conclusion() == conveyor_core::Conclusion::Failed {
                    if let Some(failure) = stopped.failure() {
                        if failure.name == "DeviceIOError" {
                            io_error_event.fire(portname.clone());
                        }
                    }
                }
            });
            if let Some(dispatch) = dispatch.take() {
                dispatch(Arc::clone(&driver), started.clone());
            }
        });
        task
    }

    pub fn print(&self, gcode_path: PathBuf) -> Task<serde_json::Value> {
        self.build_task("print", move |driver, task| {
            tokio::spawn(async move {
                driver.print(&gcode_path, task).await;
            });
        })
    }

    pub fn read_eeprom(&self) -> Task<serde_json::Value> {
        self.build_task("read_eeprom", |driver, task| {
            tokio::spawn(async move {
                driver.read_eeprom(task).await;
            });
        })
    }

    pub fn write_eeprom(&self, map: serde_json::Value) -> Task<serde_json::Value> {
        self.build_task("write_eeprom", move |driver, task| {
            tokio::spawn(async move {
                driver.write_eeprom(map, task).await;
            });
        })
    }

    pub fn upload_firmware(&self, machine_type: String, file: PathBuf) -> Task<serde_json::Value> {
        self.build_task("upload_firmware", move |driver, task| {
            tokio::spawn(async move {
                driver.upload_firmware(&machine_type, Path::new(&file), task).await;
            });
        })
    }

    pub fn reset_to_factory(&self) -> Task<serde_json::Value> {
        self.build_task("reset_to_factory", |driver, task| {
            tokio::spawn(async move {
                driver.reset_to_factory(task).await;
            });
        })
    }
}

/// Convenience used directly by `session`/RPC handlers for standalone
/// (non-pipeline) operations: start the task and hand it back for the
/// caller to await. The busy claim itself happens inside the task's
/// `startevent` handler, which the bus delivers asynchronously, so an
/// already-busy device can never be detected synchronously here — callers
/// must await the task's `stoppedevent` (as `session::await_task` does) to
/// observe a `DeviceBusy`-named [`Failure`].
pub fn start(task: Task<serde_json::Value>) -> Task<serde_json::Value> {
    task.start();
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FakeDeviceDriver;

    fn worker() -> DeviceWorker {
        let bus = EventBus::new();
        DeviceWorker::new(Arc::new(FakeDeviceDriver::new("uuid-1", "/dev/ttyACM0")), bus)
    }

    #[tokio::test]
    async fn a_second_operation_fails_with_device_busy_while_first_is_running() {
        let worker = worker();
        let first = start(worker.print(PathBuf::from("/tmp/a.gcode")));
        worker.bus.drain();
        let second = start(worker.read_eeprom());
        worker.bus.drain();
        assert_eq!(second.conclusion(), conveyor_core::Conclusion::Failed);
        assert_eq!(second.failure().unwrap().name, "DeviceBusy");

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        worker.bus.drain();
        assert_eq!(first.state(), conveyor_core::State::Stopped);
        assert!(!worker.is_busy());
    }

    #[tokio::test]
    async fn worker_goes_idle_again_after_completion() {
        let worker = worker();
        let task = start(worker.print(PathBuf::from("/tmp/a.gcode")));
        worker.bus.drain();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        worker.bus.drain();
        assert_eq!(task.conclusion(), conveyor_core::Conclusion::Ended);

        let second = start(worker.print(PathBuf::from("/tmp/b.gcode")));
        worker.bus.drain();
        assert_ne!(second.conclusion(), conveyor_core::Conclusion::Failed);
    }

    #[tokio::test]
    async fn a_device_io_error_fires_the_eviction_signal_with_the_portname() {
        let bus = EventBus::new();
        let mut driver = FakeDeviceDriver::new("uuid-1", "/dev/ttyACM0");
        driver.fail_with = Some(std::io::Error::other("usb disconnected"));
        let worker = DeviceWorker::new(Arc::new(driver), Arc::clone(&bus));

        let evicted = Arc::new(parking_lot::Mutex::new(None));
        let evicted2 = Arc::clone(&evicted);
        worker.on_io_error(move |port| *evicted2.lock() = Some(port.clone()));

        let task = start(worker.print(PathBuf::from("/tmp/a.gcode")));
        bus.drain();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.drain();

        assert_eq!(task.conclusion(), conveyor_core::Conclusion::Failed);
        assert_eq!(evicted.lock().as_ref().unwrap().as_str(), "/dev/ttyACM0");
    }
}
