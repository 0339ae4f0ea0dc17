// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server Core (§4.H): the three registries (jobs, devices, clients), the
//! monotonic id counters, and the broadcast fan-out. Registries are
//! protected by a single lock; per §5, critical sections are limited to
//! pointer/copy operations and callbacks/broadcasts always run outside it.

use conveyor_core::{ClientId, ClientIdGen, Job, JobConfig, JobId, JobIdGen, PortName, PrinterId};
use conveyor_wire::{JobDto, Notification, PrinterDto};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::device_worker::DeviceWorker;
use crate::error::ServerError;

/// A connected client's outbound half. Implemented by `crate::session`'s
/// per-connection write task; kept as a trait here so the Server Core has
/// no dependency on the wire transport.
pub trait ClientNotifier: Send + Sync {
    /// Forward a broadcast to the remote peer. An `Err` return is always a
    /// connection-write failure (§7 `ConnectionWriteError`), triggering
    /// teardown of the session (§4.H).
    fn notify(&self, notification: Notification) -> Result<(), std::io::Error>;
}

struct Registries {
    jobs: HashMap<JobId, Job>,
    devices: HashMap<PortName, DeviceWorker>,
    printer_index: HashMap<PrinterId, PortName>,
    clients: HashMap<ClientId, Arc<dyn ClientNotifier>>,
}

pub struct ServerCore {
    registries: Mutex<Registries>,
    job_ids: JobIdGen,
    client_ids: ClientIdGen,
}

impl Default for ServerCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCore {
    pub fn new() -> Self {
        Self {
            registries: Mutex::new(Registries {
                jobs: HashMap::new(),
                devices: HashMap::new(),
                printer_index: HashMap::new(),
                clients: HashMap::new(),
            }),
            job_ids: JobIdGen::new(),
            client_ids: ClientIdGen::new(),
        }
    }

    // -- jobs --------------------------------------------------------

    /// Allocate an id and construct a `Job` with a null `process`; the RPC
    /// handler attaches the Recipe-built pipeline and starts it before
    /// calling [`ServerCore::addjob`].
    pub fn createjob(&self, config: JobConfig) -> Job {
        Job::new(self.job_ids.next(), config)
    }

    /// Insert into the registry and broadcast `jobadded`.
    pub fn addjob(&self, job: Job) {
        let dto = JobDto::from(&job);
        {
            let mut reg = self.registries.lock();
            reg.jobs.insert(job.id, job);
        }
        self.broadcast(Notification::JobAdded { job: dto });
    }

    /// Broadcast `jobchanged` for a job already mutated in place by the
    /// caller (the Recipe's `heartbeatevent`/`stoppedevent` observers).
    pub fn changejob(&self, id: JobId) {
        let dto = {
            let reg = self.registries.lock();
            reg.jobs.get(&id).map(JobDto::from)
        };
        if let Some(dto) = dto {
            self.broadcast(Notification::JobChanged { job: dto });
        }
    }

    pub fn with_job_mut<R>(&self, id: JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut reg = self.registries.lock();
        reg.jobs.get_mut(&id).map(f)
    }

    pub fn canceljob(&self, id: JobId) -> Result<(), ServerError> {
        let process = {
            let reg = self.registries.lock();
            reg.jobs.get(&id).ok_or(ServerError::UnknownJob(id.get()))?.process.clone()
        };
        if let Some(process) = process {
            if !process.is_terminal() {
                process.cancel();
            }
        }
        Ok(())
    }

    pub fn getjob(&self, id: JobId) -> Option<JobDto> {
        self.registries.lock().jobs.get(&id).map(JobDto::from)
    }

    pub fn getjobs(&self) -> Vec<JobDto> {
        self.registries.lock().jobs.values().map(JobDto::from).collect()
    }

    // -- devices ------------------------------------------------------

    /// Register a newly attached device. Per §3's device registry
    /// invariant, a registration for an already-present port only replaces
    /// the prior entry if it has already been removed.
    pub fn appendprinter(&self, worker: DeviceWorker) {
        let printer_id = worker.printer_id();
        let portname = worker.portname();
        let dto = PrinterDto {
            printer_id: printer_id.as_str().to_string(),
            portname: Some(portname.as_str().to_string()),
            profile: worker.profile(),
            can_print: true,
            temperature: None,
        };
        {
            let mut reg = self.registries.lock();
            if reg.devices.contains_key(&portname) {
                tracing::warn!(port = %portname, "ignoring duplicate device registration");
                return;
            }
            reg.printer_index.insert(printer_id, portname.clone());
            reg.devices.insert(portname, worker);
        }
        self.broadcast(Notification::PrinterAdded { printer: dto });
    }

    pub fn changeprinter(&self, portname: &PortName) {
        let dto = {
            let reg = self.registries.lock();
            reg.devices.get(portname).map(|w| PrinterDto {
                printer_id: w.printer_id().as_str().to_string(),
                portname: Some(portname.as_str().to_string()),
                profile: w.profile(),
                can_print: true,
                temperature: None,
            })
        };
        if let Some(dto) = dto {
            self.broadcast(Notification::PrinterChanged { printer: dto });
        }
    }

    pub fn removeprinter(&self, portname: &PortName) {
        let removed = {
            let mut reg = self.registries.lock();
            let worker = reg.devices.remove(portname);
            if let Some(worker) = &worker {
                reg.printer_index.remove(&worker.printer_id());
            }
            worker
        };
        if let Some(worker) = removed {
            self.broadcast(Notification::PrinterRemoved { id: worker.printer_id().as_str().to_string() });
        }
    }

    pub fn getprinters(&self) -> Vec<PrinterDto> {
        self.registries
            .lock()
            .devices
            .iter()
            .map(|(port, worker)| PrinterDto {
                printer_id: worker.printer_id().as_str().to_string(),
                portname: Some(port.as_str().to_string()),
                profile: worker.profile(),
                can_print: true,
                temperature: None,
            })
            .collect()
    }

    /// Printer lookup order (§4.G): `None` -> first attached device
    /// (implementation-defined, §9(a)); else exact match on `printer_id`,
    /// then `portname`; else `UnknownPrinter`.
    pub fn findprinter(&self, name: Option<&str>) -> Result<PortName, ServerError> {
        let reg = self.registries.lock();
        match name {
            None => reg.devices.keys().next().cloned().ok_or(ServerError::NoPrinterConnected),
            Some(name) => {
                if let Some(port) = reg.printer_index.get(&PrinterId::new(name)) {
                    return Ok(port.clone());
                }
                let port = PortName::new(name);
                if reg.devices.contains_key(&port) {
                    return Ok(port);
                }
                Err(ServerError::UnknownPrinter(name.to_string()))
            }
        }
    }

    pub fn with_device<R>(&self, port: &PortName, f: impl FnOnce(&DeviceWorker) -> R) -> Option<R> {
        self.registries.lock().devices.get(port).map(f)
    }

    // -- clients --------------------------------------------------------

    pub fn appendclient(&self, notifier: Arc<dyn ClientNotifier>) -> ClientId {
        let id = self.client_ids.next();
        self.registries.lock().clients.insert(id, notifier);
        id
    }

    pub fn removeclient(&self, id: ClientId) {
        self.registries.lock().clients.remove(&id);
    }

    /// Snapshot clients under the lock, release it, then invoke the
    /// notifier on each. Connection-write failures tear down that one
    /// session; other notifiers are unaffected (§4.H).
    fn broadcast(&self, notification: Notification) {
        let snapshot: Vec<(ClientId, Arc<dyn ClientNotifier>)> = {
            let reg = self.registries.lock();
            reg.clients.iter().map(|(id, c)| (*id, Arc::clone(c))).collect()
        };
        for (id, client) in snapshot {
            if let Err(err) = client.notify(notification.clone()) {
                tracing::warn!(client = %id, error = %err, "broadcast write failed, tearing down session");
                self.removeclient(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::EventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingNotifier {
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ClientNotifier for RecordingNotifier {
        fn notify(&self, _notification: Notification) -> Result<(), std::io::Error> {
            if self.fail {
                return Err(std::io::Error::other("broken pipe"));
            }
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn createjob_addjob_broadcasts_jobadded() {
        let server = ServerCore::new();
        let count = Arc::new(AtomicUsize::new(0));
        server.appendclient(Arc::new(RecordingNotifier { count: Arc::clone(&count), fail: false }));

        let job = server.createjob(JobConfig::builder("widget", "/tmp/w.stl").build());
        let id = job.id;
        server.addjob(job);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(server.getjob(id).is_some());
    }

    #[test]
    fn broadcast_write_failure_tears_down_that_client_only() {
        let server = ServerCore::new();
        let good = Arc::new(AtomicUsize::new(0));
        let bad_id = server.appendclient(Arc::new(RecordingNotifier { count: Arc::new(AtomicUsize::new(0)), fail: true }));
        server.appendclient(Arc::new(RecordingNotifier { count: Arc::clone(&good), fail: false }));

        let job = server.createjob(JobConfig::builder("widget", "/tmp/w.stl").build());
        server.addjob(job);

        assert_eq!(good.load(Ordering::SeqCst), 1);
        // the failing client was torn down: a second broadcast should only reach `good`
        let job2 = server.createjob(JobConfig::builder("widget2", "/tmp/w2.stl").build());
        server.addjob(job2);
        assert_eq!(good.load(Ordering::SeqCst), 2);
        let _ = bad_id;
    }

    #[test]
    fn findprinter_falls_back_to_unknown_when_name_given_but_absent() {
        let server = ServerCore::new();
        assert!(matches!(server.findprinter(Some("nope")), Err(ServerError::UnknownPrinter(_))));
        assert!(matches!(server.findprinter(None), Err(ServerError::NoPrinterConnected)));
    }

    #[test]
    fn findprinter_matches_by_printer_id_then_portname() {
        let server = ServerCore::new();
        let bus = EventBus::new();
        let worker = DeviceWorker::new(Arc::new(crate::adapters::FakeDeviceDriver::new("uuid-1", "/dev/ttyACM0")), bus);
        server.appendprinter(worker);

        assert_eq!(server.findprinter(Some("uuid-1")).unwrap().as_str(), "/dev/ttyACM0");
        assert_eq!(server.findprinter(Some("/dev/ttyACM0")).unwrap().as_str(), "/dev/ttyACM0");
        assert_eq!(server.findprinter(None).unwrap().as_str(), "/dev/ttyACM0");
    }
}
