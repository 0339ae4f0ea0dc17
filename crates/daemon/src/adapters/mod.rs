// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trait boundaries for the out-of-scope collaborators named in spec §6:
//! the physical-device driver, the slicer subprocess wrapper, the device
//! detector, and the firmware catalog. Each gets a narrow async trait so
//! the core dispatch engine is testable against a fake, in the style of
//! the teacher's `AgentAdapter`/`WorkspaceAdapter` boundary. No real
//! hardware/subprocess/HTTP implementation exists for any of them (there
//! is no Rust equivalent of `makerbot_driver` to bind to) — the `Fake*`
//! struct in each module is what `main` wires in, same as it is in tests.

mod detector;
mod device;
mod firmware;
mod slicer;

pub use detector::{DeviceDetector, DeviceEvent, FakeDeviceDetector};
pub use device::{DeviceDriver, FakeDeviceDriver};
pub use firmware::{FakeFirmwareRepository, FirmwareRepository};
pub use slicer::{FakeSlicer, Slicer};
