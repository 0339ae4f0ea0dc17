// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The firmware-catalog boundary (§6 `get_uploadable_machines`,
//! `get_machine_versions`, `download_firmware`, `compatible_firmware`,
//! `verify_s3g`), grounded in the original's
//! `_GetUploadableMachinesTaskFactory`/`_GetMachineVersionsTaskFactory`/
//! `_DownloadFirmwareTaskFactory` (plain values, no device involved) and
//! `_VerifyS3gTaskFactory` (delegates to `Recipe.verifys3gtask`, a
//! standalone file-validity check — wired here as a [`Task`] like the
//! device operations since it can run arbitrarily long on a large file).

use async_trait::async_trait;
use conveyor_core::{Failure, Task};
use std::path::{Path, PathBuf};

#[async_trait]
pub trait FirmwareRepository: Send + Sync {
    async fn list_uploadable_machines(&self) -> Result<Vec<String>, Failure>;
    async fn list_machine_versions(&self, machine_type: &str) -> Result<Vec<String>, Failure>;
    async fn download_firmware(&self, machine_type: &str, version: &str) -> Result<PathBuf, Failure>;
    /// Synchronous per the original (`uploader.compatible_firmware`, no I/O).
    fn compatible_firmware(&self, version: &str) -> bool;
    async fn verify_s3g(&self, path: &Path, task: Task<serde_json::Value>);
}

/// Test double with a fixed catalog of one machine/version.
pub struct FakeFirmwareRepository {
    pub machines: Vec<String>,
    pub versions: Vec<String>,
}

impl FakeFirmwareRepository {
    pub fn new() -> Self {
        Self { machines: vec!["replicator2".to_string()], versions: vec!["7.6".to_string()] }
    }
}

impl Default for FakeFirmwareRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FirmwareRepository for FakeFirmwareRepository {
    async fn list_uploadable_machines(&self) -> Result<Vec<String>, Failure> {
        Ok(self.machines.clone())
    }

    async fn list_machine_versions(&self, _machine_type: &str) -> Result<Vec<String>, Failure> {
        Ok(self.versions.clone())
    }

    async fn download_firmware(&self, machine_type: &str, version: &str) -> Result<PathBuf, Failure> {
        Ok(PathBuf::from(format!("/tmp/{machine_type}-{version}.hex")))
    }

    fn compatible_firmware(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v == version)
    }

    async fn verify_s3g(&self, _path: &Path, task: Task<serde_json::Value>) {
        task.start();
        task.end(serde_json::json!({ "valid": true }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::EventBus;

    #[tokio::test]
    async fn compatible_firmware_matches_known_version() {
        let repo = FakeFirmwareRepository::new();
        assert!(repo.compatible_firmware("7.6"));
        assert!(!repo.compatible_firmware("9.9"));
    }

    #[tokio::test]
    async fn verify_s3g_ends_the_task() {
        let repo = FakeFirmwareRepository::new();
        let bus = EventBus::new();
        let task: Task<serde_json::Value> = Task::new("verify", bus);
        repo.verify_s3g(Path::new("/tmp/x.s3g"), task.clone()).await;
        assert_eq!(task.conclusion(), conveyor_core::Conclusion::Ended);
    }
}
