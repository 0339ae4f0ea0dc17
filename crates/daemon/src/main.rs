// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `conveyord`: process entrypoint. Resolves configuration, takes the
//! pidfile lock, wires every component (Server Core, Recipe, Hardware
//! Queue, device detector, adapters), and drives the Unix (and optional
//! TCP) accept loop until `SIGTERM`, in the style of the teacher's
//! `lifecycle::startup` + `listener` split: validate and acquire every
//! resource before opening the socket, bind the socket last.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use conveyor_core::{EventBus, PortName, SystemClock};
use conveyor_daemon::adapters::{
    DeviceDetector, DeviceEvent, FakeDeviceDetector, FakeFirmwareRepository, FakeSlicer,
};
use conveyor_daemon::blacklist::PortBlacklist;
use conveyor_daemon::config::DaemonConfig;
use conveyor_daemon::hardware_queue::HardwareQueue;
use conveyor_daemon::recipe::Recipe;
use conveyor_daemon::server::ServerCore;
use conveyor_daemon::session::ClientSession;
use tokio::net::UnixListener;
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] conveyor_daemon::config::ConfigError),
    #[error("another conveyord instance is already running (pidfile {0})")]
    AlreadyRunning(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Holds the pidfile's exclusive lock for the process lifetime; releasing
/// and removing the file on drop so a clean shutdown never leaves a stale
/// lock behind.
struct PidFile {
    file: std::fs::File,
    path: PathBuf,
}

impl PidFile {
    fn acquire(path: PathBuf) -> Result<Self, DaemonError> {
        use std::io::Write;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new().create(true).write(true).truncate(false).open(&path)?;
        fs2::FileExt::try_lock_exclusive(&file).map_err(|_| DaemonError::AlreadyRunning(path.clone()))?;
        file.set_len(0)?;
        let mut file = file;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { file, path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "failed to start the async runtime");
            return std::process::ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err @ DaemonError::AlreadyRunning(_)) => {
            tracing::error!(error = %err, "conveyord exited with an error");
            std::process::ExitCode::from(1)
        }
        Err(err) => {
            tracing::error!(error = %err, "conveyord exited with an error");
            std::process::ExitCode::from(2)
        }
    }
}

async fn run() -> Result<(), DaemonError> {
    let config = DaemonConfig::load()?;
    let _pidfile = PidFile::acquire(config.pidfile_path.clone())?;
    tracing::info!(socket = %config.socket_path.display(), "starting conveyord");

    let bus = EventBus::new();
    let hardware_queue = HardwareQueue::new();
    let server = Arc::new(ServerCore::new());
    let blacklist = Arc::new(PortBlacklist::new(SystemClock));
    let detector_bus = Arc::clone(&bus);

    // No real subprocess/hardware/HTTP backend exists for any of these in
    // this ecosystem (§6) — the `Fake*` adapters are what production wires
    // in, same as tests.
    let slicer = Arc::new(FakeSlicer::new());
    let firmware = Arc::new(FakeFirmwareRepository::new());
    let detector: Arc<dyn DeviceDetector> = Arc::new(FakeDeviceDetector::new());

    let recipe = Arc::new(Recipe::new(slicer, Arc::clone(&hardware_queue), Arc::clone(&bus)));
    let session_factory = Arc::new(SessionFactory {
        server: Arc::clone(&server),
        recipe,
        firmware,
        bus: Arc::clone(&bus),
        ipc_timeout: config.ipc_timeout,
    });

    let (stop_tx, stop_rx) = watch::channel(false);

    let bus_task = tokio::spawn(Arc::clone(&bus).run_forever());
    let queue_task = tokio::spawn(Arc::clone(&hardware_queue).run_forever());
    let detector_task = spawn_detector(
        detector,
        Arc::clone(&server),
        detector_bus,
        Arc::clone(&blacklist),
        config.eviction_blacklist,
        stop_rx.clone(),
    );

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let unix_listener = UnixListener::bind(&config.socket_path)?;
    let unix_task = tokio::spawn(accept_unix(unix_listener, Arc::clone(&session_factory), stop_rx.clone()));

    let tcp_task = match config.tcp_port {
        Some(port) => {
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
            Some(tokio::spawn(accept_tcp(listener, Arc::clone(&session_factory), config.auth_token.clone(), stop_rx.clone())))
        }
        None => None,
    };

    wait_for_sigterm().await?;
    tracing::info!("received shutdown signal, stopping conveyord");
    let _ = stop_tx.send(true);

    let _ = unix_task.await;
    if let Some(tcp_task) = tcp_task {
        let _ = tcp_task.await;
    }
    let _ = detector_task.await;

    bus.shutdown();
    hardware_queue.stop();
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), bus_task).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), queue_task).await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => Ok(()),
        _ = sigint.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Bundles everything a [`ClientSession`] needs so the accept loops can
/// spawn one per connection without threading four `Arc`s through each call.
struct SessionFactory {
    server: Arc<ServerCore>,
    recipe: Arc<Recipe>,
    firmware: Arc<dyn conveyor_daemon::adapters::FirmwareRepository>,
    bus: Arc<EventBus>,
    ipc_timeout: std::time::Duration,
}

impl SessionFactory {
    fn session(&self) -> Arc<ClientSession> {
        Arc::new(ClientSession::with_ipc_timeout(
            Arc::clone(&self.server),
            Arc::clone(&self.recipe),
            Arc::clone(&self.firmware),
            Arc::clone(&self.bus),
            self.ipc_timeout,
        ))
    }
}

async fn accept_unix(listener: UnixListener, factory: Arc<SessionFactory>, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = stop.changed() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let session = factory.session();
                        tokio::spawn(async move { session.run(stream).await; });
                    }
                    Err(err) => tracing::warn!(error = %err, "unix accept failed"),
                }
            }
        }
    }
}

/// Remote connections are gated on `auth_token` (unlike the Unix socket,
/// which trusts anyone able to reach it locally): the peer must send the
/// token as the first length-prefixed frame before the normal
/// request/response loop starts.
async fn accept_tcp(
    listener: tokio::net::TcpListener,
    factory: Arc<SessionFactory>,
    auth_token: Option<String>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((mut stream, addr)) => {
                        let session = factory.session();
                        let auth_token = auth_token.clone();
                        tokio::spawn(async move {
                            if let Some(expected) = &auth_token {
                                match conveyor_wire::read_message::<String, _>(&mut stream).await {
                                    Ok(presented) if &presented == expected => {}
                                    _ => {
                                        tracing::warn!(peer = %addr, "tcp client rejected: bad or missing auth token");
                                        return;
                                    }
                                }
                            }
                            session.run(stream).await;
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "tcp accept failed"),
                }
            }
        }
    }
}

/// Drive the device detector and translate its events into Server Core
/// registry mutations, consulting the eviction blacklist on both ends: a
/// detach blacklists its port for `window`; an attach for a still-blacklisted
/// port is ignored (§8 seed scenario 6, §9(c)).
fn spawn_detector(
    detector: Arc<dyn DeviceDetector>,
    server: Arc<ServerCore>,
    bus: Arc<EventBus>,
    blacklist: Arc<PortBlacklist<SystemClock>>,
    window: std::time::Duration,
    mut stop: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let (detector_stop_tx, detector_stop_rx) = tokio::sync::oneshot::channel();

        let run_handle = tokio::spawn({
            let detector = Arc::clone(&detector);
            async move { detector.run(tx, detector_stop_rx).await }
        });

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    let _ = detector_stop_tx.send(());
                    break;
                }
                event = rx.recv() => {
                    match event {
                        Some(DeviceEvent::Attached(driver)) => {
                            let port = PortName::new(driver.portname());
                            if blacklist.is_blacklisted(&port) {
                                tracing::info!(port = %port, "ignoring attach: port is still eviction-blacklisted");
                                continue;
                            }
                            let worker = conveyor_daemon::device_worker::DeviceWorker::new(driver, Arc::clone(&bus));
                            let server_for_eviction = Arc::clone(&server);
                            let blacklist_for_eviction = Arc::clone(&blacklist);
                            worker.on_io_error(move |port| {
                                tracing::warn!(port = %port, "evicting device after an i/o error");
                                blacklist_for_eviction.add(port.clone(), window);
                                server_for_eviction.removeprinter(port);
                            });
                            server.appendprinter(worker);
                        }
                        Some(DeviceEvent::Detached { portname }) => {
                            let port = PortName::new(portname);
                            blacklist.add(port.clone(), window);
                            server.removeprinter(&port);
                        }
                        None => break,
                    }
                }
            }
        }
        let _ = run_handle.await;
    })
}
