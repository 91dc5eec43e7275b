//! Bridge wire protocol.
//!
//! Both directions use the same framing: a 4-byte big-endian length prefix
//! followed by the payload.
//!
//! ```text
//! [u32 BE: len][payload bytes of len]
//! ```
//!
//! A request payload is the UTF-8 module identifier. A response payload is
//! JSON: the bare value under the silent error policy, or a [`Reply`]
//! envelope under the report policy.

use crate::error::{BridgeError, Result};
use crate::value::ModuleValue;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reply envelope written under the report policy.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply<'a> {
    Value(&'a ModuleValue),
    Error(ErrorPayload),
}

/// Reply envelope as decoded by a producer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodedReply {
    Value(serde_json::Value),
    Error(ErrorPayload),
}

/// Error details carried by a report-policy reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub identifier: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn from_error(identifier: &str, err: &BridgeError) -> Self {
        let message = match err {
            BridgeError::Resolution { message, .. }
            | BridgeError::Serialization { message, .. }
            | BridgeError::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind().to_string(),
            identifier: identifier.to_string(),
            message,
        }
    }

    /// Turn the payload back into the error it describes.
    pub fn into_error(self) -> BridgeError {
        match self.kind.as_str() {
            "resolution" => BridgeError::Resolution {
                identifier: self.identifier,
                message: self.message,
            },
            "serialization" => BridgeError::Serialization {
                identifier: self.identifier,
                message: self.message,
            },
            "validation" => BridgeError::Validation {
                field: "identifier".to_string(),
                message: self.message,
            },
            _ => BridgeError::Other(format!("{}: {}", self.kind, self.message)),
        }
    }
}

/// Decode a request payload into a module identifier.
pub fn decode_identifier(frame: &[u8]) -> Result<String> {
    let identifier = std::str::from_utf8(frame).map_err(|_| BridgeError::Validation {
        field: "identifier".to_string(),
        message: "Invalid UTF-8 in request frame".to_string(),
    })?;

    if identifier.is_empty() {
        return Err(BridgeError::Validation {
            field: "identifier".to_string(),
            message: "Empty module identifier".to_string(),
        });
    }

    Ok(identifier.to_string())
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection). A frame larger than
/// `max_size` is an error; the stream cannot be resynchronized after it.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(BridgeError::Frame {
            size: len,
            max: max_size,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| BridgeError::Frame {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
