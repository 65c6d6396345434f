//! Length-prefixed message framing.
//!
//! Each connection carries exactly one framed message:
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────────────────────────┐
//! │   Length     │   Checksum   │            Payload               │
//! │   (4 bytes)  │   (4 bytes)  │         (variable)               │
//! └──────────────┴──────────────┴──────────────────────────────────┘
//! ```
//!
//! - **Length**: Big-endian u32 of payload size (excludes header)
//! - **Checksum**: CRC32 of the payload for corruption detection
//! - **Payload**: bincode-serialized [`Message`]
//!
//! Because delivery is blocking and one-shot, the reader pulls the header
//! and payload with `read_exact` rather than keeping incremental decoder
//! state. Corrupt, oversized, or undecodable frames surface as errors and
//! the listener drops them without touching replica state.

use std::io::{self, Read, Write};

use crate::message::Message;

/// Size of the frame header in bytes (length + checksum).
pub const HEADER_SIZE: usize = 8;

/// Maximum accepted payload size (16 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while framing or unframing a message.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame length field exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Length declared by the frame header.
        size: u32,
        /// Configured maximum.
        max: u32,
    },

    /// Payload checksum doesn't match the header.
    #[error("checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum from the frame header.
        expected: u32,
        /// Checksum computed over the received payload.
        actual: u32,
    },

    /// Payload bytes did not decode to a known message.
    #[error("deserialization failed: {0}")]
    Deserialize(String),

    /// Message could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(String),
}

// ============================================================================
// Encode / Decode
// ============================================================================

/// Encodes a message into a framed byte buffer.
pub fn encode(message: &Message) -> Result<Vec<u8>, FramingError> {
    let payload =
        bincode::serialize(message).map_err(|e| FramingError::Serialize(e.to_string()))?;

    if payload.len() > MAX_MESSAGE_SIZE as usize {
        return Err(FramingError::MessageTooLarge {
            size: payload.len() as u32,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let checksum = crc32fast::hash(&payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&checksum.to_be_bytes());
    frame.extend_from_slice(&payload);

    Ok(frame)
}

/// Decodes a message from a complete frame.
pub fn decode(frame: &[u8]) -> Result<Message, FramingError> {
    if frame.len() < HEADER_SIZE {
        return Err(FramingError::Deserialize(format!(
            "frame truncated: {} bytes",
            frame.len()
        )));
    }

    let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let checksum = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);

    if length > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge {
            size: length,
            max: MAX_MESSAGE_SIZE,
        });
    }
    let payload = frame
        .get(HEADER_SIZE..HEADER_SIZE + length as usize)
        .ok_or_else(|| {
            FramingError::Deserialize(format!(
                "frame declares {length} payload bytes, have {}",
                frame.len() - HEADER_SIZE
            ))
        })?;

    verify_and_decode(payload, checksum)
}

/// Writes one framed message to a blocking writer.
pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<(), FramingError> {
    let frame = encode(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one framed message from a blocking reader.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Message, FramingError> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let checksum = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

    if length > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge {
            size: length,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;

    verify_and_decode(&payload, checksum)
}

fn verify_and_decode(payload: &[u8], expected: u32) -> Result<Message, FramingError> {
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(FramingError::ChecksumMismatch { expected, actual });
    }

    bincode::deserialize(payload).map_err(|e| FramingError::Deserialize(e.to_string()))
}
