// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Eviction blacklist (§4.E, §8 seed scenario 6, §9 open question (c)).
//!
//! A device evicted after an I/O error is suppressed from redetection for a
//! bounded window so a flaky USB re-enumeration doesn't thrash the job
//! queue with an endless attach/detach/attach cycle. The source left the
//! window's duration unspecified; [`crate::config::DaemonConfig::eviction_blacklist`]
//! fixes it (default 30s, documented in DESIGN.md).

use conveyor_core::{Clock, PortName};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct PortBlacklist<C: Clock> {
    clock: C,
    expiry: Mutex<HashMap<PortName, Instant>>,
}

impl<C: Clock> PortBlacklist<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, expiry: Mutex::new(HashMap::new()) }
    }

    /// Suppress `port` from re-registration for `window`, starting now.
    pub fn add(&self, port: PortName, window: Duration) {
        self.expiry.lock().insert(port, self.clock.now() + window);
    }

    /// Whether `port` is still within its suppression window. Lazily evicts
    /// expired entries so the map doesn't grow unbounded over a long uptime.
    pub fn is_blacklisted(&self, port: &PortName) -> bool {
        let mut expiry = self.expiry.lock();
        match expiry.get(port) {
            Some(until) if *until > self.clock.now() => true,
            Some(_) => {
                expiry.remove(port);
                false
            }
            None => false,
        }
    }
}
