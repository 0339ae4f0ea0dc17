// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::{Notification, Response};
use conveyor_core::Failure;
use serde::{Deserialize, Serialize};

/// Envelope sent client -> daemon: a request paired with the id the caller
/// wants echoed back on the matching [`ServerMessage::Response`] (§6 —
/// "request/response pairs with integer id").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    pub id: u64,
    #[serde(flatten)]
    pub request: crate::Request,
}

/// `Ok`/`Err` outcome of a single RPC call, carried inside
/// [`ServerMessage::Response`]. A structured [`Failure`] rather than a bare
/// string, mirroring `getexception()`'s payload shape.
pub type RpcResult = Result<Response, Failure>;

/// Envelope sent daemon -> client: either the answer to one prior
/// [`ClientMessage`] (tagged with its id) or an unsolicited broadcast. Uses
/// adjacent tagging (`type`/`data`) rather than flattening since both
/// payloads are themselves internally-tagged enums.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "response")]
    Response { id: u64, result: RpcResult },
    #[serde(rename = "notification")]
    Notification(Notification),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Request;

    #[test]
    fn client_message_flattens_request_alongside_id() {
        let msg = ClientMessage { id: 7, request: Request::Hello };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"method\":\"hello\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn server_message_response_roundtrips_ok_and_err() {
        let ok = ServerMessage::Response { id: 1, result: Ok(Response::hello()) };
        let json = serde_json::to_string(&ok).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ok);

        let err = ServerMessage::Response {
            id: 2,
            result: Err(Failure::new("UnknownPrinter", "no such printer")),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn server_message_notification_roundtrips() {
        let msg = ServerMessage::Notification(Notification::PrinterRemoved { id: "bot1".into() });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"notification\""));
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
