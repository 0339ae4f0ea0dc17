// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds raised by daemon components, §7.

use conveyor_core::Failure;

/// Errors raised by the Server Core / Client Session boundary. Kept
/// separate from [`Failure`] (which is what a failed [`Task`](conveyor_core::Task)
/// carries) since most of these never reach a client — they're a local
/// `Result` for RPC dispatch to turn into a `Failure` or an immediate error
/// response.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("no printer connected")]
    NoPrinterConnected,
    #[error("unknown printer: {0}")]
    UnknownPrinter(String),
    #[error("job {0} not found")]
    UnknownJob(u64),
    #[error("connection write failed")]
    ConnectionWriteError(#[from] std::io::Error),
}

impl From<&ServerError> for Failure {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::NoPrinterConnected => Failure::new("NoPrinterConnected", err.to_string()),
            ServerError::UnknownPrinter(name) => Failure::new("UnknownPrinter", name.clone()),
            ServerError::UnknownJob(id) => Failure::new("UnknownJob", id.to_string()),
            ServerError::ConnectionWriteError(io) => Failure::from_io_error("ConnectionWriteError", io),
        }
    }
}
