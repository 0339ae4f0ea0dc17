// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client Session (§4.G): binds one connected peer's framed request/response
//! stream to the Server Core, Recipe and device/firmware adapters.
//!
//! Grounded in `conveyor/server/__init__.py::_ClientThread` — one thread per
//! connection there, one `tokio::spawn`'d task per connection here, split
//! into a reader (drives [`ClientSession::dispatch`]) and a writer (drains
//! an `mpsc` channel fed by both RPC responses and [`ServerCore`]
//! broadcasts), the same split the teacher's `listener::handle_connection`
//! uses for its read/write halves.
//!
//! A handful of methods (`read_eeprom`, `write_eeprom`, `upload_firmware`,
//! `reset_to_factory`, `verify_s3g`) are `Task`-driving per §6 even though
//! they answer a single request/response pair: [`await_task`] bridges the
//! task's `stoppedevent` to an `oneshot` so the RPC call still blocks on
//! completion the way a synchronous method would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use conveyor_core::{Conclusion, EventBus, Failure, Job, JobConfig, JobConfigBuilder, PortName, Task};
use conveyor_wire::{JobArgs, JobDto, Notification, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use crate::adapters::FirmwareRepository;
use crate::device_worker::{self, DeviceWorker};
use crate::error::ServerError;
use crate::recipe::Recipe;
use crate::server::{ClientNotifier, ServerCore};

type RpcOutcome = Result<Response, Failure>;

/// Forwards broadcasts to a connected peer's outbound channel. `notify`
/// only ever fails once the peer has disconnected and the receiver half has
/// been dropped — the reader loop races disconnect detection separately.
struct ChannelNotifier {
    tx: mpsc::UnboundedSender<conveyor_wire::ServerMessage>,
}

impl ClientNotifier for ChannelNotifier {
    fn notify(&self, notification: Notification) -> Result<(), std::io::Error> {
        self.tx
            .send(conveyor_wire::ServerMessage::Notification(notification))
            .map_err(|_| std::io::Error::other("client channel closed"))
    }
}

pub struct ClientSession {
    server: Arc<ServerCore>,
    recipe: Arc<Recipe>,
    firmware: Arc<dyn FirmwareRepository>,
    bus: Arc<EventBus>,
    /// Bound on how long a device-driven RPC (`read_eeprom`, `print`'s
    /// device leg, ...) waits for its [`Task`] to go terminal before the
    /// caller gets a timeout failure back (§6 "ipc timeout").
    ipc_timeout: Duration,
}

impl ClientSession {
    pub fn new(
        server: Arc<ServerCore>,
        recipe: Arc<Recipe>,
        firmware: Arc<dyn FirmwareRepository>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self::with_ipc_timeout(server, recipe, firmware, bus, Duration::from_secs(5))
    }

    pub fn with_ipc_timeout(
        server: Arc<ServerCore>,
        recipe: Arc<Recipe>,
        firmware: Arc<dyn FirmwareRepository>,
        bus: Arc<EventBus>,
        ipc_timeout: Duration,
    ) -> Self {
        Self { server, recipe, firmware, bus, ipc_timeout }
    }

    /// Drive one connection to completion: register a client, split the
    /// stream, spawn the writer, and read requests until the peer
    /// disconnects or a frame fails to parse.
    pub async fn run<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let client_id = self.server.appendclient(Arc::new(ChannelNotifier { tx: tx.clone() }));

        let writer_task = tokio::spawn(Self::write_loop(writer, rx));
        self.read_loop(reader, tx).await;

        self.server.removeclient(client_id);
        writer_task.abort();
    }

    async fn write_loop<W: AsyncWrite + Unpin>(
        mut writer: WriteHalf<W>,
        mut rx: mpsc::UnboundedReceiver<conveyor_wire::ServerMessage>,
    ) {
        while let Some(message) = rx.recv().await {
            if let Err(err) = conveyor_wire::write_message(&mut writer, &message).await {
                tracing::warn!(error = %err, "client write failed, closing connection");
                return;
            }
        }
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        mut reader: ReadHalf<R>,
        tx: mpsc::UnboundedSender<conveyor_wire::ServerMessage>,
    ) {
        loop {
            let message = match conveyor_wire::read_request(&mut reader).await {
                Ok(message) => message,
                Err(err) => {
                    tracing::debug!(error = %err, "client disconnected");
                    return;
                }
            };
            let result = self.dispatch(message.request).await;
            let response = conveyor_wire::ServerMessage::Response { id: message.id, result };
            if tx.send(response).is_err() {
                return;
            }
        }
    }

    /// Bind one [`Request`] to its Server Core / Recipe / adapter operation
    /// (§4.G's method table).
    pub async fn dispatch(&self, request: Request) -> RpcOutcome {
        match request {
            Request::Hello => Ok(Response::hello()),
            Request::Dir => Ok(dir_response()),
            Request::GetPrinters => Ok(Response::Printers { printers: self.server.getprinters() }),
            Request::GetJobs => Ok(Response::Jobs { jobs: self.server.getjobs() }),
            Request::GetJob { id } => self
                .server
                .getjob(id.into())
                .map(|job| Response::Job { job })
                .ok_or_else(|| Failure::from(&ServerError::UnknownJob(id))),

            Request::Print { printer_name, input_path, job } => {
                self.create_job(printer_name.as_deref(), input_path, None, job).await
            }
            Request::PrintToFile { profile_name: _, input_path, output_path, job } => {
                let container = output_path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .unwrap_or("s3g")
                    .to_string();
                self.create_job(None, input_path, Some((output_path, container)), job).await
            }
            Request::Slice { profile_name: _, input_path, output_path, job } => {
                let mut builder = apply_job_args(JobConfig::builder(build_name(&job, &input_path), input_path), &job);
                builder = builder.output_path(output_path);
                self.start_job(builder.build(), None).await
            }

            Request::CancelJob { id } => {
                self.server.canceljob(id.into()).map(|_| Response::Ack).map_err(|err| Failure::from(&err))
            }

            Request::ReadEeprom { printer_name } => {
                self.with_device_task(&printer_name, |w| w.read_eeprom()).await.map(|value| Response::Eeprom { map: value })
            }
            Request::WriteEeprom { printer_name, map } => {
                self.with_device_task(&printer_name, move |w| w.write_eeprom(map)).await.map(|_| Response::Ack)
            }
            Request::UploadFirmware { printer_name, machine_type, file } => self
                .with_device_task(&printer_name, move |w| w.upload_firmware(machine_type, file))
                .await
                .map(|_| Response::Ack),
            Request::ResetToFactory { printer_name } => {
                self.with_device_task(&printer_name, |w| w.reset_to_factory()).await.map(|_| Response::Ack)
            }

            Request::GetUploadableMachines => {
                self.firmware.list_uploadable_machines().await.map(|machines| Response::UploadableMachines { machines })
            }
            Request::GetMachineVersions { machine_type } => self
                .firmware
                .list_machine_versions(&machine_type)
                .await
                .map(|versions| Response::MachineVersions { versions }),
            Request::DownloadFirmware { machine_type, version } => self
                .firmware
                .download_firmware(&machine_type, &version)
                .await
                .map(|path| Response::FirmwarePath { path }),
            Request::VerifyS3g { path } => {
                let task: Task<serde_json::Value> = Task::new("firmware.verify_s3g", Arc::clone(&self.bus));
                self.firmware.verify_s3g(&path, task.clone()).await;
                let ok = await_task(task).await.is_ok();
                Ok(Response::VerifyResult { ok })
            }
            Request::CompatibleFirmware { version } => {
                Ok(Response::CompatibleFirmware { compatible: self.firmware.compatible_firmware(&version) })
            }
        }
    }

    /// Resolve `printer_name` to a device and run `op` on its
    /// [`DeviceWorker`], awaiting the task to completion. A concurrent
    /// operation on the same device surfaces as a `DeviceBusy` task failure
    /// once the claim is processed off the bus, same as any other failure
    /// observed through [`await_task`].
    async fn with_device_task(
        &self,
        printer_name: &str,
        op: impl FnOnce(&DeviceWorker) -> Task<serde_json::Value>,
    ) -> Result<serde_json::Value, Failure> {
        let port = self.server.findprinter(Some(printer_name)).map_err(|err| Failure::from(&err))?;
        let task = self
            .server
            .with_device(&port, op)
            .ok_or_else(|| Failure::from(&ServerError::UnknownPrinter(printer_name.to_string())))?;
        let started = device_worker::start(task);
        match tokio::time::timeout(self.ipc_timeout, await_task(started)).await {
            Ok(result) => result,
            Err(_) => Err(Failure::new("IpcTimeout", "device operation did not complete in time")),
        }
    }

    /// `print`: resolve the device first (per `printer_name`, `None` meaning
    /// "the first attached device", §9(a)) and attach `printer_id` to the
    /// job config before handing it to [`Recipe::build`].
    async fn create_job(
        &self,
        printer_name: Option<&str>,
        input_path: PathBuf,
        printtofile: Option<(PathBuf, String)>,
        job: JobArgs,
    ) -> RpcOutcome {
        let mut builder = apply_job_args(JobConfig::builder(build_name(&job, &input_path), input_path), &job);
        let device = if let Some((output_path, container)) = printtofile {
            builder = builder.output_path(output_path).print_to_file_type(container);
            None
        } else {
            let port = self.server.findprinter(printer_name).map_err(|err| Failure::from(&err))?;
            let printer_id = self
                .server
                .with_device(&port, |w| w.printer_id())
                .ok_or_else(|| Failure::from(&ServerError::UnknownPrinter(printer_name.unwrap_or_default().to_string())))?;
            builder = builder.printer_id(Some(printer_id));
            Some(port)
        };
        self.start_job(builder.build(), device).await
    }

    /// Build the pipeline for `config`, wire its mirroring observers, then
    /// add it to the registry (`jobadded`) strictly before starting it
    /// (§5's ordering invariant).
    async fn start_job(&self, config: JobConfig, device: Option<PortName>) -> RpcOutcome {
        let process = match &device {
            Some(port) => self
                .server
                .with_device(port, |w| self.recipe.build(&config, Some(w)))
                .ok_or_else(|| Failure::from(&ServerError::NoPrinterConnected))??,
            None => self.recipe.build(&config, None)?,
        };

        let mut job = self.server.createjob(config);
        let id = job.id;
        job.attach_process(process.clone());

        let server_for_heartbeat = Arc::clone(&self.server);
        process.heartbeatevent.attach(move |_| {
            server_for_heartbeat.with_job_mut(id, Job::sync_from_process);
            server_for_heartbeat.changejob(id);
        });
        let server_for_stop = Arc::clone(&self.server);
        process.stoppedevent.attach(move |_| {
            server_for_stop.with_job_mut(id, Job::sync_from_process);
            server_for_stop.changejob(id);
        });

        let dto = JobDto::from(&job);
        self.server.addjob(job);
        process.start();
        Ok(Response::JobCreated { job: dto })
    }
}

fn build_name(job: &JobArgs, input_path: &std::path::Path) -> String {
    job.build_name.clone().unwrap_or_else(|| {
        input_path.file_stem().and_then(|s| s.to_str()).unwrap_or("job").to_string()
    })
}

fn apply_job_args(mut builder: JobConfigBuilder, job: &JobArgs) -> JobConfigBuilder {
    builder = builder
        .skip_start_end(job.skip_start_end)
        .with_start_end(job.with_start_end)
        .dualstrusion(job.dualstrusion)
        .slicer_settings(job.slicer_settings.clone());
    if let Some(v) = &job.gcodeprocessor {
        builder = builder.gcodeprocessor(v.clone());
    }
    if let Some(v) = &job.archive_lvl {
        builder = builder.archive_lvl(v.clone());
    }
    if let Some(v) = &job.archive_dir {
        builder = builder.archive_dir(v.clone());
    }
    if let Some(v) = &job.material {
        builder = builder.material(v.clone());
    }
    builder
}

/// `dir`'s method-name -> one-line-doc table (§4.G), plus the crate version
/// in place of the original's `__version__`.
fn dir_response() -> Response {
    let methods = [
        ("hello", "Answer \"world\"."),
        ("dir", "List every exported method with its documentation."),
        ("getprinters", "List every attached device."),
        ("getjobs", "List every known job."),
        ("getjob", "Fetch one job by id."),
        ("print", "Slice and print to the named (or first) attached device."),
        ("printtofile", "Slice and write the result to a container file."),
        ("slice", "Slice only, with no print target."),
        ("canceljob", "Cancel a job's pipeline."),
        ("read_eeprom", "Read a device's EEPROM map."),
        ("write_eeprom", "Write a device's EEPROM map."),
        ("upload_firmware", "Flash firmware onto a device."),
        ("get_uploadable_machines", "List machine types with available firmware."),
        ("get_machine_versions", "List firmware versions for a machine type."),
        ("download_firmware", "Fetch a firmware image for a machine type/version."),
        ("verify_s3g", "Validate an s3g file."),
        ("reset_to_factory", "Reset a device to its factory firmware."),
        ("compatible_firmware", "Check whether a firmware version is compatible."),
    ]
    .into_iter()
    .map(|(name, doc)| (name.to_string(), doc.to_string()))
    .collect();
    Response::Dir { methods, version: env!("CARGO_PKG_VERSION").to_string() }
}

/// Bridge a task's terminal `stoppedevent` to an awaitable `Result`. Returns
/// immediately if the task is already terminal (the device driver ran
/// synchronously by the time `start()` returned).
async fn await_task(task: Task<serde_json::Value>) -> Result<serde_json::Value, Failure> {
    if task.is_terminal() {
        return terminal_result(&task);
    }
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = parking_lot::Mutex::new(Some(tx));
    task.stoppedevent.attach(move |stopped| {
        if let Some(tx) = tx.lock().take() {
            let _ = tx.send(stopped.clone());
        }
    });
    // The task could have gone terminal between the check above and the
    // attach call; re-check now that an observer is guaranteed to catch it.
    if task.is_terminal() {
        return terminal_result(&task);
    }
    match rx.await {
        Ok(stopped) => terminal_result(&stopped),
        Err(_) => Err(Failure::new("InternalError", "task dropped before completion")),
    }
}

fn terminal_result(task: &Task<serde_json::Value>) -> Result<serde_json::Value, Failure> {
    match task.conclusion() {
        Conclusion::Ended => Ok(task.result().unwrap_or(serde_json::Value::Null)),
        Conclusion::Failed => Err(task.failure().unwrap_or_else(|| Failure::new("InternalError", "task failed with no failure payload"))),
        Conclusion::Canceled => Err(Failure::new("Canceled", "task was canceled")),
        Conclusion::None => Err(Failure::new("InternalError", "awaited a non-terminal task")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FakeDeviceDriver, FakeFirmwareRepository, FakeSlicer};
    use crate::hardware_queue::HardwareQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingNotifier {
        count: Arc<AtomicUsize>,
    }

    impl ClientNotifier for RecordingNotifier {
        fn notify(&self, _notification: Notification) -> Result<(), std::io::Error> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn session() -> (Arc<ClientSession>, Arc<ServerCore>, Arc<EventBus>) {
        let bus = EventBus::new();
        let server = Arc::new(ServerCore::new());
        let recipe = Arc::new(Recipe::new(Arc::new(FakeSlicer::new()), HardwareQueue::new(), Arc::clone(&bus)));
        let firmware = Arc::new(FakeFirmwareRepository::new());
        (Arc::new(ClientSession::new(Arc::clone(&server), recipe, firmware, Arc::clone(&bus))), server, bus)
    }

    #[tokio::test]
    async fn hello_answers_world() {
        let (session, _server, _bus) = session();
        let resp = session.dispatch(Request::Hello).await.unwrap();
        assert_eq!(resp, Response::Hello { greeting: "world".to_string() });
    }

    #[tokio::test]
    async fn slice_request_creates_a_job_and_broadcasts_jobadded_before_it_runs() {
        let (session, server, bus) = session();
        let count = Arc::new(AtomicUsize::new(0));
        server.appendclient(Arc::new(RecordingNotifier { count: Arc::clone(&count) }));

        let resp = session
            .dispatch(Request::Slice {
                profile_name: "replicator2".into(),
                input_path: "/tmp/widget.stl".into(),
                output_path: "/tmp/widget.gcode".into(),
                job: JobArgs::default(),
            })
            .await
            .unwrap();

        assert!(matches!(resp, Response::JobCreated { .. }));
        assert_eq!(count.load(Ordering::SeqCst), 1, "jobadded must broadcast synchronously");

        bus.drain();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.drain();
        assert!(count.load(Ordering::SeqCst) >= 2, "jobchanged should follow jobadded");
    }

    #[tokio::test]
    async fn print_request_with_no_attached_device_fails_with_no_printer_connected() {
        let (session, _server, _bus) = session();
        let err = session
            .dispatch(Request::Print { printer_name: None, input_path: "/tmp/widget.stl".into(), job: JobArgs::default() })
            .await
            .unwrap_err();
        assert_eq!(err.name, "NoPrinterConnected");
    }

    #[tokio::test]
    async fn read_eeprom_awaits_the_device_task_to_completion() {
        let (session, server, bus) = session();
        let worker = DeviceWorker::new(Arc::new(FakeDeviceDriver::new("uuid-1", "/dev/ttyACM0")), Arc::clone(&bus));
        server.appendprinter(worker);

        let dispatched = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.dispatch(Request::ReadEeprom { printer_name: "uuid-1".into() }).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        bus.drain();
        let resp = dispatched.await.unwrap().unwrap();
        assert!(matches!(resp, Response::Eeprom { .. }));
    }

    #[tokio::test]
    async fn compatible_firmware_is_synchronous() {
        let (session, _server, _bus) = session();
        let resp = session.dispatch(Request::CompatibleFirmware { version: "7.6".into() }).await.unwrap();
        assert_eq!(resp, Response::CompatibleFirmware { compatible: true });
    }
}
