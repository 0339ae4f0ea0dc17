// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The device-detector boundary (§6, component F): polls for device
//! attach/detach and reports them as a stream of [`DeviceEvent`]s. The
//! Server Core (`conveyor-daemon::server`) owns registering/evicting
//! [`crate::device_worker::DeviceWorker`]s in response; blacklist policy
//! (how long an evicted port is suppressed) lives in
//! [`crate::config::DaemonConfig::eviction_blacklist`], consumed by the
//! detector loop, not by the core.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::adapters::DeviceDriver;

pub enum DeviceEvent {
    Attached(Arc<dyn DeviceDriver>),
    Detached { portname: String },
}

#[async_trait]
pub trait DeviceDetector: Send + Sync {
    /// Run the poll loop until `stop` fires, forwarding every attach/detach
    /// as a [`DeviceEvent`] on `tx`.
    async fn run(&self, tx: mpsc::Sender<DeviceEvent>, stop: tokio::sync::oneshot::Receiver<()>);
}

/// Test double: events are injected by the test via [`FakeDeviceDetector::inject`]
/// rather than discovered by real polling.
pub struct FakeDeviceDetector {
    inbox: tokio::sync::Mutex<mpsc::Receiver<DeviceEvent>>,
    injector: mpsc::Sender<DeviceEvent>,
}

impl FakeDeviceDetector {
    pub fn new() -> Self {
        let (injector, inbox) = mpsc::channel(16);
        Self { inbox: tokio::sync::Mutex::new(inbox), injector }
    }

    pub fn injector(&self) -> mpsc::Sender<DeviceEvent> {
        self.injector.clone()
    }
}

impl Default for FakeDeviceDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceDetector for FakeDeviceDetector {
    async fn run(&self, tx: mpsc::Sender<DeviceEvent>, mut stop: tokio::sync::oneshot::Receiver<()>) {
        let mut inbox = self.inbox.lock().await;
        loop {
            tokio::select! {
                _ = &mut stop => return,
                event = inbox.recv() => {
                    match event {
                        Some(event) => {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    }
}
