// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Shared job flags carried by `print`, `printtofile`, and `slice` — kept as
/// a flattened sub-struct rather than duplicated across three variants.
/// Field set mirrors `conveyor_core::JobConfig`'s supplemental fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobArgs {
    #[serde(default)]
    pub build_name: Option<String>,
    #[serde(default)]
    pub gcodeprocessor: Option<String>,
    #[serde(default)]
    pub skip_start_end: bool,
    #[serde(default)]
    pub with_start_end: bool,
    #[serde(default)]
    pub archive_lvl: Option<String>,
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub dualstrusion: bool,
    #[serde(default)]
    pub slicer_settings: serde_json::Value,
}

/// The exported RPC method table (§4.G), one variant per method. Printer
/// lookup argument is always `printer_name: Option<String>` — `None` means
/// "the first attached device" (§4.G's `_findprinter_default`, preserved as
/// implementation-defined per the open question in spec §9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method")]
pub enum Request {
    #[serde(rename = "hello")]
    Hello,
    #[serde(rename = "dir")]
    Dir,
    #[serde(rename = "getprinters")]
    GetPrinters,
    #[serde(rename = "getjobs")]
    GetJobs,
    #[serde(rename = "getjob")]
    GetJob {
        id: u64,
    },
    #[serde(rename = "print")]
    Print {
        printer_name: Option<String>,
        input_path: PathBuf,
        #[serde(flatten)]
        job: JobArgs,
    },
    #[serde(rename = "printtofile")]
    PrintToFile {
        profile_name: String,
        input_path: PathBuf,
        output_path: PathBuf,
        #[serde(flatten)]
        job: JobArgs,
    },
    #[serde(rename = "slice")]
    Slice {
        profile_name: String,
        input_path: PathBuf,
        output_path: PathBuf,
        #[serde(flatten)]
        job: JobArgs,
    },
    #[serde(rename = "canceljob")]
    CancelJob {
        id: u64,
    },
    #[serde(rename = "read_eeprom")]
    ReadEeprom {
        printer_name: String,
    },
    #[serde(rename = "write_eeprom")]
    WriteEeprom {
        printer_name: String,
        map: serde_json::Value,
    },
    #[serde(rename = "upload_firmware")]
    UploadFirmware {
        printer_name: String,
        machine_type: String,
        file: PathBuf,
    },
    #[serde(rename = "get_uploadable_machines")]
    GetUploadableMachines,
    #[serde(rename = "get_machine_versions")]
    GetMachineVersions {
        machine_type: String,
    },
    #[serde(rename = "download_firmware")]
    DownloadFirmware {
        machine_type: String,
        version: String,
    },
    #[serde(rename = "verify_s3g")]
    VerifyS3g {
        path: PathBuf,
    },
    #[serde(rename = "reset_to_factory")]
    ResetToFactory {
        printer_name: String,
    },
    #[serde(rename = "compatible_firmware")]
    CompatibleFirmware {
        version: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_request_roundtrips_with_flattened_job_args() {
        let req = Request::Print {
            printer_name: Some("bot1".into()),
            input_path: PathBuf::from("/tmp/in.stl"),
            job: JobArgs {
                build_name: Some("widget".into()),
                material: Some("PLA".into()),
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"method\":\"print\""));
        assert!(json.contains("\"material\":\"PLA\""));
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn get_job_request_roundtrips() {
        let req = Request::GetJob { id: 42 };
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}
