// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::dto::{JobDto, PrinterDto};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Successful-call payloads, one variant per §4.G method's output shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// `hello` always answers with the literal string `"world"`.
    Hello { greeting: String },
    /// `dir`: mapping method name -> doc, plus `__version__`.
    Dir {
        methods: BTreeMap<String, String>,
        version: String,
    },
    Printers {
        printers: Vec<PrinterDto>,
    },
    Jobs {
        jobs: Vec<JobDto>,
    },
    Job {
        job: JobDto,
    },
    /// Returned by `print`/`printtofile`/`slice`: the job descriptor as of
    /// creation, before the pipeline has made any progress.
    JobCreated {
        job: JobDto,
    },
    /// `canceljob`/`write_eeprom`/`reset_to_factory` acknowledge with no payload.
    Ack,
    Eeprom {
        map: serde_json::Value,
    },
    UploadableMachines {
        machines: Vec<String>,
    },
    MachineVersions {
        versions: Vec<String>,
    },
    FirmwarePath {
        path: PathBuf,
    },
    VerifyResult {
        ok: bool,
    },
    CompatibleFirmware {
        compatible: bool,
    },
}

impl Response {
    pub fn hello() -> Self {
        Response::Hello { greeting: "world".to_string() }
    }
}
