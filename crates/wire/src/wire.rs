// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame codec: 4-byte big-endian length prefix + JSON payload, matching the
//! original's `struct.pack('>I', len(payload))` framing in
//! `conveyor/server/__init__.py`.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::{ClientMessage, ServerMessage};
use crate::response::Response;

/// Hard cap on a single frame's payload length, guarding against a peer
/// sending a bogus length prefix and exhausting memory before the JSON
/// parser ever runs.
const MAX_MESSAGE_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge { len: u32, max: u32 },
}

/// Serialize `value` to its JSON wire bytes without the length prefix.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserialize a complete (unframed) JSON payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let len = reader.read_u32().await?;
    if len > MAX_MESSAGE_LEN {
        return Err(ProtocolError::MessageTooLarge { len, max: MAX_MESSAGE_LEN });
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<(), ProtocolError> {
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| ProtocolError::MessageTooLarge { len: u32::MAX, max: MAX_MESSAGE_LEN })?;
    if len > MAX_MESSAGE_LEN {
        return Err(ProtocolError::MessageTooLarge { len, max: MAX_MESSAGE_LEN });
    }
    writer.write_u32(len).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed, JSON-decoded message of any deserializable type.
/// Used by both sides: the client session reads [`ClientMessage`]s, the CLI
/// reads [`ServerMessage`]s.
pub async fn read_message<T: DeserializeOwned, R: AsyncRead + Unpin>(reader: &mut R) -> Result<T, ProtocolError> {
    let bytes = read_frame(reader).await?;
    decode(&bytes)
}

/// Write one length-prefixed, JSON-encoded message of any serializable type.
pub async fn write_message<T: Serialize, W: AsyncWrite + Unpin>(writer: &mut W, value: &T) -> Result<(), ProtocolError> {
    let bytes = encode(value)?;
    write_frame(writer, &bytes).await
}

/// Convenience wrapper for the client-session read side.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ClientMessage, ProtocolError> {
    read_message(reader).await
}

/// Convenience wrapper for the client-session write side: wraps a raw
/// [`Response`] result for request id `id` into the [`ServerMessage`]
/// envelope before framing it.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    id: u64,
    result: Result<Response, conveyor_core::Failure>,
) -> Result<(), ProtocolError> {
    write_message(writer, &ServerMessage::Response { id, result }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{JobArgs, Request};

    #[tokio::test]
    async fn request_roundtrips_through_frame() {
        let mut buf = Vec::new();
        let msg = ClientMessage {
            id: 3,
            request: Request::Print {
                printer_name: None,
                input_path: "/tmp/in.stl".into(),
                job: JobArgs::default(),
            },
        };
        write_message(&mut buf, &msg).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded: ClientMessage = read_message(&mut cursor).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn write_response_wraps_result_in_server_message() {
        let mut buf = Vec::new();
        write_response(&mut buf, 9, Ok(Response::hello())).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded: ServerMessage = read_message(&mut cursor).await.unwrap();
        assert_eq!(decoded, ServerMessage::Response { id: 9, result: Ok(Response::hello()) });
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_MESSAGE_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_message::<ClientMessage, _>(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }
}
