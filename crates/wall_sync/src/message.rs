//! Master to wall messages
//!
//! The master publishes state changes as [`WallMessage`]s. On the wire every
//! message is a bincode body behind a fixed header carrying the protocol
//! version and the body length.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use wall_core::{DisplayGroup, Markers, Options, StreamFrames};

/// Protocol version for compatibility checks
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum message body size (64 MB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// A state change published by the master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WallMessage {
    /// New window layout
    DisplayGroup(DisplayGroup),
    /// New rendering options
    Options(Options),
    /// New touch markers
    Markers(Markers),
    /// New pixel stream frames to swap to
    StreamFrames(StreamFrames),
    /// Stop rendering
    Quit,
}

impl WallMessage {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DisplayGroup(_) => "display_group",
            Self::Options(_) => "options",
            Self::Markers(_) => "markers",
            Self::StreamFrames(_) => "stream_frames",
            Self::Quit => "quit",
        }
    }
}

/// Message header for framing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Protocol version
    pub version: u32,
    /// Body length in bytes (excluding header)
    pub length: u32,
}

impl MessageHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;
}

/// Serialize a message into a framed byte payload
pub fn encode_message(message: &WallMessage) -> SyncResult<Vec<u8>> {
    let body = bincode::serialize(message).map_err(|e| SyncError::Serialization(e.to_string()))?;

    if body.len() > MAX_MESSAGE_SIZE {
        return Err(SyncError::MessageTooLarge {
            size: body.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let header = MessageHeader {
        version: PROTOCOL_VERSION,
        length: body.len() as u32,
    };
    let mut bytes =
        bincode::serialize(&header).map_err(|e| SyncError::Serialization(e.to_string()))?;
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Deserialize a framed byte payload
pub fn decode_message(bytes: &[u8]) -> SyncResult<WallMessage> {
    if bytes.len() < MessageHeader::SIZE {
        return Err(SyncError::Deserialization(format!(
            "truncated header: {} bytes",
            bytes.len()
        )));
    }

    let (header_bytes, body) = bytes.split_at(MessageHeader::SIZE);
    let header: MessageHeader =
        bincode::deserialize(header_bytes).map_err(|e| SyncError::Deserialization(e.to_string()))?;

    if header.version != PROTOCOL_VERSION {
        return Err(SyncError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got: header.version,
        });
    }

    let length = header.length as usize;
    if length > MAX_MESSAGE_SIZE {
        return Err(SyncError::MessageTooLarge {
            size: length,
            max: MAX_MESSAGE_SIZE,
        });
    }
    if body.len() != length {
        return Err(SyncError::Deserialization(format!(
            "body length {} does not match header length {}",
            body.len(),
            length
        )));
    }

    bincode::deserialize(body).map_err(|e| SyncError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wall_core::{ContentWindow, RectF, Size};

    #[test]
    fn test_display_group_survives_framing() {
        let mut group = DisplayGroup::new(RectF::new(0.0, 0.0, 3840.0, 2160.0));
        group.add_window(ContentWindow::new(
            "poster.pyr",
            Size::new(8192, 4096),
            RectF::new(10.0, 20.0, 800.0, 400.0),
        ));
        let message = WallMessage::DisplayGroup(group);

        let bytes = encode_message(&message).unwrap();
        assert_eq!(decode_message(&bytes).unwrap(), message);
    }

    #[test]
    fn test_rejects_wrong_protocol_version() {
        let mut bytes = encode_message(&WallMessage::Quit).unwrap();
        bytes[0] = 99;
        assert!(matches!(
            decode_message(&bytes),
            Err(SyncError::VersionMismatch { got: 99, .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_body() {
        let bytes = encode_message(&WallMessage::Options(Options::default())).unwrap();
        let truncated = &bytes[..bytes.len() - 1];
        assert!(matches!(
            decode_message(truncated),
            Err(SyncError::Deserialization(_))
        ));
        assert!(decode_message(&bytes[..4]).is_err());
    }
}
