// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: fixed paths plus a handful of tunables loaded from
//! an optional TOML file, in the style of the teacher's `lifecycle::Config`
//! (a plain struct with a `load()` constructor, no config-file schema
//! crate).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not resolve a home directory (set CONVEYOR_STATE_DIR or HOME)")]
    NoStateDir,
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

/// On-disk TOML shape. Every field optional; absent fields fall back to
/// [`DaemonConfig`]'s defaults, mirroring `CONVEYOR_*` env-var overrides.
#[derive(Debug, Default, serde::Deserialize)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    tcp_port: Option<u16>,
    auth_token: Option<String>,
    ipc_timeout_ms: Option<u64>,
    eviction_blacklist_secs: Option<u64>,
}

/// Resolved daemon configuration: where the pidfile/socket live, whether a
/// TCP listener is also opened, and the eviction-blacklist window (§9 open
/// question (c), resolved in DESIGN.md).
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pidfile_path: PathBuf,
    pub tcp_port: Option<u16>,
    pub auth_token: Option<String>,
    pub ipc_timeout: Duration,
    /// How long a device port stays blacklisted after an eviction before the
    /// detector is allowed to re-add it (§8 seed scenario 6, §9(c)).
    pub eviction_blacklist: Duration,
}

impl DaemonConfig {
    /// Resolve the state directory: `CONVEYOR_STATE_DIR` > `XDG_STATE_HOME/conveyor`
    /// > `~/.local/state/conveyor`.
    pub fn state_dir() -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = std::env::var("CONVEYOR_STATE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return Ok(PathBuf::from(xdg).join("conveyor"));
        }
        let home = std::env::var("HOME").map_err(|_| ConfigError::NoStateDir)?;
        Ok(PathBuf::from(home).join(".local/state/conveyor"))
    }

    /// Load configuration, optionally overlaying a TOML file at
    /// `state_dir/conveyor.toml` if present.
    pub fn load() -> Result<Self, ConfigError> {
        let state_dir = Self::state_dir()?;
        let file_path = state_dir.join("conveyor.toml");
        let file = match std::fs::read_to_string(&file_path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|source| ConfigError::Parse { path: file_path.clone(), source })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(source) => return Err(ConfigError::Read { path: file_path, source }),
        };

        Ok(Self {
            socket_path: file.socket_path.unwrap_or_else(|| state_dir.join("conveyord.sock")),
            pidfile_path: state_dir.join("conveyord.pid"),
            tcp_port: file.tcp_port.or_else(|| std::env::var("CONVEYOR_TCP_PORT").ok().and_then(|s| s.parse().ok())),
            auth_token: file.auth_token.or_else(|| std::env::var("CONVEYOR_AUTH_TOKEN").ok()).filter(|s| !s.is_empty()),
            ipc_timeout: Duration::from_millis(file.ipc_timeout_ms.unwrap_or(5_000)),
            eviction_blacklist: Duration::from_secs(file.eviction_blacklist_secs.unwrap_or(30)),
            state_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_falls_back_to_defaults_when_file_absent() {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("CONVEYOR_STATE_DIR", tmp.path());
        std::env::remove_var("CONVEYOR_TCP_PORT");
        std::env::remove_var("CONVEYOR_AUTH_TOKEN");

        let cfg = DaemonConfig::load().unwrap();
        assert_eq!(cfg.socket_path, tmp.path().join("conveyord.sock"));
        assert_eq!(cfg.tcp_port, None);
        assert_eq!(cfg.eviction_blacklist, Duration::from_secs(30));

        std::env::remove_var("CONVEYOR_STATE_DIR");
    }

    #[test]
    #[serial]
    fn load_overlays_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("conveyor.toml"), "tcp_port = 9000\neviction_blacklist_secs = 60\n").unwrap();
        std::env::set_var("CONVEYOR_STATE_DIR", tmp.path());

        let cfg = DaemonConfig::load().unwrap();
        assert_eq!(cfg.tcp_port, Some(9000));
        assert_eq!(cfg.eviction_blacklist, Duration::from_secs(60));

        std::env::remove_var("CONVEYOR_STATE_DIR");
    }
}
