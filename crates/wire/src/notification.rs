// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::dto::{JobDto, PrinterDto};
use serde::{Deserialize, Serialize};

/// One-way broadcasts forwarded by a Client Session to its remote peer
/// (§4.G/§4.H). Ordering guarantees (§5): `printeradded` precedes any
/// `printerchanged` for that device and `printerremoved` is last;
/// `jobadded` precedes any `jobchanged` for that job and the terminal
/// `jobchanged` is last.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Notification {
    #[serde(rename = "printeradded")]
    PrinterAdded { printer: PrinterDto },
    #[serde(rename = "printerchanged")]
    PrinterChanged { printer: PrinterDto },
    #[serde(rename = "printerremoved")]
    PrinterRemoved { id: String },
    #[serde(rename = "jobadded")]
    JobAdded { job: JobDto },
    #[serde(rename = "jobchanged")]
    JobChanged { job: JobDto },
}
