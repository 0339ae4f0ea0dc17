// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured failure payloads carried by a [`crate::task::Task`] on the
//! FAILED conclusion.
//!
//! Grounded in `getexception()` from the original server implementation,
//! which renders any raised exception into a wire-transmissible dict with
//! `name`, `args`, `errno`, `strerror`, `filename` and `winerror` fields.
//! `winerror` is a Windows-only errno variant; kept for wire-format parity
//! even though this implementation has no Windows-specific failure source.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A structured, wire-transmissible description of a failed [`Task`](crate::task::Task).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// The failing error's type name (e.g. `"UnknownPrinter"`, `"DeviceIOError"`).
    pub name: String,
    /// Positional arguments the error was constructed with, rendered as strings.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strerror: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winerror: Option<i32>,
}

impl Failure {
    /// Build a failure carrying only a name and message, the common case for
    /// errors raised directly by this daemon (`UnknownPrinter`, `DeviceBusy`, …).
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: vec![message.into()],
            errno: None,
            strerror: None,
            filename: None,
            winerror: None,
        }
    }

    /// Build a failure from an I/O error, populating `errno`/`strerror` the
    /// way `getexception` does for an `OSError`.
    pub fn from_io_error(name: impl Into<String>, err: &std::io::Error) -> Self {
        Self {
            name: name.into(),
            args: vec![err.to_string()],
            errno: err.raw_os_error(),
            strerror: Some(err.to_string()),
            filename: None,
            winerror: None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.args.join(", "))
        }
    }
}

impl std::error::Error for Failure {}
