//! Wire protocol types and frame I/O for the IPC server (component J).
//!
//! Two frame shapes share one socket: a completion frame is
//! `uint32_le length | length bytes JSON`; a debug frame is the same with a
//! leading `b'D'` marker byte. Both directions use the same framing.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::cache::CompletionItem;
use crate::ipc::error::{IpcError, IpcResult};

pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
pub const DEBUG_MARKER: u8 = b'D';

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    #[serde(rename = "Command")]
    pub command: String,
    #[serde(rename = "CommandLine")]
    pub command_line: String,
    #[serde(rename = "WordToComplete")]
    pub word_to_complete: String,
    #[serde(rename = "IncludeDynamicArguments", default)]
    pub include_dynamic_arguments: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionItemWire {
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Score", skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl From<CompletionItem> for CompletionItemWire {
    fn from(item: CompletionItem) -> Self {
        Self {
            text: item.text,
            description: item.description,
            score: item.score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponse {
    #[serde(rename = "Completions")]
    pub completions: Vec<CompletionItemWire>,
    #[serde(rename = "Cached")]
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DebugRequestType {
    Ping,
    Clear,
    Stats,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebugRequest {
    #[serde(rename = "RequestType")]
    pub request_type: DebugRequestType,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DebugResponse {
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "Message", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One decoded inbound frame.
pub enum InboundFrame {
    Completion(CompletionRequest),
    Debug(DebugRequest),
}

/// Read one frame from `stream`. Returns `Ok(None)` on clean EOF before any
/// byte of a new frame arrives.
pub async fn read_frame<R: AsyncReadExt + Unpin>(stream: &mut R) -> IpcResult<Option<InboundFrame>> {
    let marker = match stream.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(IpcError::Io(e)),
    };

    if marker == DEBUG_MARKER {
        let body = read_length_prefixed(stream).await?;
        let request: DebugRequest = serde_json::from_slice(&body).map_err(IpcError::MalformedJson)?;
        Ok(Some(InboundFrame::Debug(request)))
    } else {
        // The first byte we peeked is the first byte of the 4-byte LE length
        // prefix for a completion frame, so read the remaining 3 and splice.
        let mut rest = [0u8; 3];
        stream.read_exact(&mut rest).await.map_err(IpcError::Io)?;
        let len = u32::from_le_bytes([marker, rest[0], rest[1], rest[2]]) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(IpcError::FrameTooLarge { len });
        }
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.map_err(IpcError::Io)?;
        let request: CompletionRequest = serde_json::from_slice(&body).map_err(IpcError::MalformedJson)?;
        Ok(Some(InboundFrame::Completion(request)))
    }
}

async fn read_length_prefixed<R: AsyncReadExt + Unpin>(stream: &mut R) -> IpcResult<Vec<u8>> {
    let len = stream.read_u32_le().await.map_err(IpcError::Io)? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(IpcError::FrameTooLarge { len });
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.map_err(IpcError::Io)?;
    Ok(body)
}

pub async fn write_completion_response<W: AsyncWriteExt + Unpin>(
    stream: &mut W,
    response: &CompletionResponse,
) -> IpcResult<()> {
    let body = serde_json::to_vec(response).map_err(IpcError::MalformedJson)?;
    write_framed(stream, &body, false).await
}

pub async fn write_debug_response<W: AsyncWriteExt + Unpin>(
    stream: &mut W,
    response: &DebugResponse,
) -> IpcResult<()> {
    let body = serde_json::to_vec(response).map_err(IpcError::MalformedJson)?;
    write_framed(stream, &body, true).await
}

async fn write_framed<W: AsyncWriteExt + Unpin>(stream: &mut W, body: &[u8], debug: bool) -> IpcResult<()> {
    if debug {
        stream.write_u8(DEBUG_MARKER).await.map_err(IpcError::Io)?;
    }
    stream.write_u32_le(body.len() as u32).await.map_err(IpcError::Io)?;
    stream.write_all(body).await.map_err(IpcError::Io)?;
    stream.flush().await.map_err(IpcError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_completion_frame() {
        let payload = br#"{"Command":"git","CommandLine":"git s","WordToComplete":"s"}"#;
        let mut framed = (payload.len() as u32).to_le_bytes().to_vec();
        framed.extend_from_slice(payload);
        let mut cursor = Cursor::new(framed);
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        match frame {
            InboundFrame::Completion(req) => assert_eq!(req.command, "git"),
            _ => panic!("expected completion frame"),
        }
    }

    #[tokio::test]
    async fn reads_debug_frame() {
        let payload = br#"{"RequestType":"ping"}"#;
        let mut framed = vec![DEBUG_MARKER];
        framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        framed.extend_from_slice(payload);
        let mut cursor = Cursor::new(framed);
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        match frame {
            InboundFrame::Debug(req) => assert_eq!(req.request_type, DebugRequestType::Ping),
            _ => panic!("expected debug frame"),
        }
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let mut framed = ((MAX_FRAME_BYTES + 1) as u32).to_le_bytes().to_vec();
        framed.extend_from_slice(&[0u8; 16]);
        let mut cursor = Cursor::new(framed);
        assert!(matches!(read_frame(&mut cursor).await, Err(IpcError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn clean_eof_before_frame_returns_none() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }
}
