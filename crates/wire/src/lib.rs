// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! IPC protocol for the print-dispatch daemon.
//!
//! Wire format: 4-byte big-endian length prefix + JSON payload, one
//! [`ClientMessage`] per request and one [`ServerMessage`] per response or
//! broadcast notification, grounded in spec §6 ("framed bidirectional
//! request/response channel carrying request/response pairs with integer
//! id and one-way notifications") and the teacher's `daemon/src/protocol`
//! module (same framing, same exported function names).

mod dto;
mod message;
mod notification;
mod request;
mod response;
mod wire;

pub use dto::{JobDto, PrinterDto};
pub use message::{ClientMessage, RpcResult, ServerMessage};
pub use notification::Notification;
pub use request::{JobArgs, Request};
pub use response::Response;
pub use wire::{decode, encode, read_message, read_request, write_message, write_response, ProtocolError};
