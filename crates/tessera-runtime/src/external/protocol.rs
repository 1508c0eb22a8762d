//! External reader messages and framing.
//!
//! | Code | Message |
//! |------|---------|
//! | `0x26` | [`ReadResourceRequest`] |
//! | `0x27` | [`ReadResourceResponse`] |
//! | `0x28` | [`ReadModuleRequest`] |
//! | `0x29` | [`ReadModuleResponse`] |
//! | `0x2c` | [`ListModulesRequest`] |
//! | `0x2d` | [`ListModulesResponse`] |

use crate::error::ProtocolError;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use tessera_types::{EvaluatorId, PathElement, RequestId};

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub const READ_RESOURCE_REQUEST: u8 = 0x26;
pub const READ_RESOURCE_RESPONSE: u8 = 0x27;
pub const READ_MODULE_REQUEST: u8 = 0x28;
pub const READ_MODULE_RESPONSE: u8 = 0x29;
pub const LIST_MODULES_REQUEST: u8 = 0x2c;
pub const LIST_MODULES_RESPONSE: u8 = 0x2d;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadModuleRequest {
    pub request_id: RequestId,
    pub evaluator_id: EvaluatorId,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadModuleResponse {
    pub request_id: RequestId,
    pub evaluator_id: EvaluatorId,
    pub contents: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListModulesRequest {
    pub request_id: RequestId,
    pub evaluator_id: EvaluatorId,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListModulesResponse {
    pub request_id: RequestId,
    pub evaluator_id: EvaluatorId,
    pub path_elements: Option<Vec<PathElement>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResourceRequest {
    pub request_id: RequestId,
    pub evaluator_id: EvaluatorId,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResourceResponse {
    pub request_id: RequestId,
    pub evaluator_id: EvaluatorId,
    pub contents: Option<Vec<u8>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ReadResourceRequest(ReadResourceRequest),
    ReadResourceResponse(ReadResourceResponse),
    ReadModuleRequest(ReadModuleRequest),
    ReadModuleResponse(ReadModuleResponse),
    ListModulesRequest(ListModulesRequest),
    ListModulesResponse(ListModulesResponse),
}

fn encode_body<T: Serialize>(code: u8, body: &T) -> Result<Vec<u8>, ProtocolError> {
    rmp_serde::to_vec_named(&(code, body)).map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (_, body): (u8, T) =
        rmp_serde::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    Ok(body)
}

impl Message {
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Self::ReadResourceRequest(_) => READ_RESOURCE_REQUEST,
            Self::ReadResourceResponse(_) => READ_RESOURCE_RESPONSE,
            Self::ReadModuleRequest(_) => READ_MODULE_REQUEST,
            Self::ReadModuleResponse(_) => READ_MODULE_RESPONSE,
            Self::ListModulesRequest(_) => LIST_MODULES_REQUEST,
            Self::ListModulesResponse(_) => LIST_MODULES_RESPONSE,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadResourceRequest(_) => "ReadResourceRequest",
            Self::ReadResourceResponse(_) => "ReadResourceResponse",
            Self::ReadModuleRequest(_) => "ReadModuleRequest",
            Self::ReadModuleResponse(_) => "ReadModuleResponse",
            Self::ListModulesRequest(_) => "ListModulesRequest",
            Self::ListModulesResponse(_) => "ListModulesResponse",
        }
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::ReadResourceRequest(m) => m.request_id,
            Self::ReadResourceResponse(m) => m.request_id,
            Self::ReadModuleRequest(m) => m.request_id,
            Self::ReadModuleResponse(m) => m.request_id,
            Self::ListModulesRequest(m) => m.request_id,
            Self::ListModulesResponse(m) => m.request_id,
        }
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let code = self.code();
        match self {
            Self::ReadResourceRequest(m) => encode_body(code, m),
            Self::ReadResourceResponse(m) => encode_body(code, m),
            Self::ReadModuleRequest(m) => encode_body(code, m),
            Self::ReadModuleResponse(m) => encode_body(code, m),
            Self::ListModulesRequest(m) => encode_body(code, m),
            Self::ListModulesResponse(m) => encode_body(code, m),
        }
    }

    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] for malformed payloads or unknown codes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (code, _): (u8, IgnoredAny) =
            rmp_serde::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(match code {
            READ_RESOURCE_REQUEST => Self::ReadResourceRequest(decode_body(bytes)?),
            READ_RESOURCE_RESPONSE => Self::ReadResourceResponse(decode_body(bytes)?),
            READ_MODULE_REQUEST => Self::ReadModuleRequest(decode_body(bytes)?),
            READ_MODULE_RESPONSE => Self::ReadModuleResponse(decode_body(bytes)?),
            LIST_MODULES_REQUEST => Self::ListModulesRequest(decode_body(bytes)?),
            LIST_MODULES_RESPONSE => Self::ListModulesResponse(decode_body(bytes)?),
            other => {
                return Err(ProtocolError::Decode(format!(
                    "unknown message code 0x{other:02x}"
                )))
            }
        })
    }
}

// ─── Framing ────────────────────────────────────────────────────────

/// Writes one length-prefixed frame and flushes.
///
/// # Errors
///
/// [`ProtocolError::Framing`] for oversized payloads,
/// [`ProtocolError::TransportClosed`] if the peer is gone.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, message: &Message) -> Result<(), ProtocolError> {
    let payload = message.encode()?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&l| l as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| ProtocolError::Framing(format!("payload of {} bytes is too large", payload.len())))?;
    let io = |e: std::io::Error| {
        tracing::debug!(error = %e, "external reader write failed");
        ProtocolError::TransportClosed
    };
    writer.write_all(&len.to_be_bytes()).map_err(io)?;
    writer.write_all(&payload).map_err(io)?;
    writer.flush().map_err(io)
}

/// Reads one frame. `Ok(None)` on a clean end of stream between frames.
///
/// # Errors
///
/// [`ProtocolError::Framing`] for truncated or oversized frames,
/// [`ProtocolError::Decode`] for bad payloads.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Message>, ProtocolError> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(ProtocolError::Framing("truncated frame header".into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::debug!(error = %e, "external reader read failed");
                return Err(ProtocolError::TransportClosed);
            }
        }
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::Framing(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ProtocolError::Framing("truncated frame payload".into()),
        _ => ProtocolError::TransportClosed,
    })?;
    Message::decode(&payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (RequestId, EvaluatorId) {
        (RequestId::from_raw(7), EvaluatorId::from_raw(11))
    }

    #[test]
    fn frame_has_big_endian_length_prefix() {
        let (request_id, evaluator_id) = ids();
        let msg = Message::ReadModuleRequest(ReadModuleRequest {
            request_id,
            evaluator_id,
            uri: "ext:/a.pkl".into(),
        });
        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).expect("should write");
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);
        let back = read_frame(&mut buf.as_slice())
            .expect("should read")
            .expect("should have a frame");
        assert_eq!(back, msg);
    }

    #[test]
    fn body_is_a_named_map() {
        let (request_id, evaluator_id) = ids();
        let bytes = Message::ListModulesResponse(ListModulesResponse {
            request_id,
            evaluator_id,
            path_elements: Some(vec![PathElement::directory("lib")]),
            error: None,
        })
        .encode()
        .expect("should encode");
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("pathElements"), "got: {text}");
        assert!(text.contains("isDirectory"), "got: {text}");
        assert!(text.contains("requestId"), "got: {text}");
    }

    #[test]
    fn clean_eof_is_none() {
        let empty: &[u8] = &[];
        assert!(read_frame(&mut &*empty).expect("should not error").is_none());
    }

    #[test]
    fn truncated_frames_are_framing_errors() {
        let short_header: &[u8] = &[0, 0];
        assert!(matches!(
            read_frame(&mut &*short_header),
            Err(ProtocolError::Framing(_))
        ));
        let short_body: &[u8] = &[0, 0, 0, 9, 1, 2];
        assert!(matches!(
            read_frame(&mut &*short_body),
            Err(ProtocolError::Framing(_))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected_before_allocation() {
        let header = (u32::MAX).to_be_bytes();
        assert!(matches!(
            read_frame(&mut &header[..]),
            Err(ProtocolError::Framing(_))
        ));
    }

    #[test]
    fn unknown_code_is_decode_error() {
        let bytes = rmp_serde::to_vec_named(&(0x7fu8, ())).expect("should encode");
        let err = Message::decode(&bytes).expect_err("should reject");
        assert!(err.to_string().contains("0x7f"), "got: {err}");
    }

    #[test]
    fn missing_optional_fields_decode_as_none() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Sparse {
            request_id: i64,
            evaluator_id: i64,
        }
        let bytes = rmp_serde::to_vec_named(&(
            READ_MODULE_RESPONSE,
            Sparse {
                request_id: 1,
                evaluator_id: 2,
            },
        ))
        .expect("should encode");
        let Message::ReadModuleResponse(r) = Message::decode(&bytes).expect("should decode") else {
            panic!("expected ReadModuleResponse");
        };
        assert!(r.contents.is_none() && r.error.is_none());
    }
}
