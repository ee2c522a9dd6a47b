//! Peer message vocabulary and line framing.
//!
//! Frames are ASCII tokens terminated by `\n`; a trailing `\r` is tolerated. The tokens
//! match the ones already deployed on the nodes:
//!
//! | Token      | Meaning                                          |
//! |------------|--------------------------------------------------|
//! | `PI1_DONE` | MAIN finished its engagement (start SECONDARY)   |
//! | `PI2_DONE` | SECONDARY finished its engagement                |
//! | `PI1_ACK`  | MAIN acknowledges (informational)                |
//! | `PI2_ACK`  | SECONDARY acknowledges the start signal          |

use std::fmt;
use tracing::{debug, warn};

use crate::types::NodeRole;

/// Longest frame accepted before the decoder gives up and resynchronises.
pub const MAX_FRAME_LEN: usize = 64;

/// Frame terminator.
pub const TERMINATOR: u8 = b'\n';

/// What a peer message says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// The origin node finished its phase successfully.
    Done,
    /// The origin node saw the other side's message.
    Ack,
}

/// A control message exchanged between the two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerMessage {
    pub kind: MessageKind,
    pub origin: NodeRole,
}

impl PeerMessage {
    pub fn done(origin: NodeRole) -> Self {
        Self {
            kind: MessageKind::Done,
            origin,
        }
    }

    pub fn ack(origin: NodeRole) -> Self {
        Self {
            kind: MessageKind::Ack,
            origin,
        }
    }

    /// Wire token for this message.
    pub fn token(&self) -> &'static str {
        match (self.kind, self.origin) {
            (MessageKind::Done, NodeRole::Main) => "PI1_DONE",
            (MessageKind::Done, NodeRole::Secondary) => "PI2_DONE",
            (MessageKind::Ack, NodeRole::Main) => "PI1_ACK",
            (MessageKind::Ack, NodeRole::Secondary) => "PI2_ACK",
        }
    }

    /// Parse a wire token (without terminator).
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "PI1_DONE" => Some(Self::done(NodeRole::Main)),
            "PI2_DONE" => Some(Self::done(NodeRole::Secondary)),
            "PI1_ACK" => Some(Self::ack(NodeRole::Main)),
            "PI2_ACK" => Some(Self::ack(NodeRole::Secondary)),
            _ => None,
        }
    }

    /// Encode as a terminated frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = self.token().as_bytes().to_vec();
        frame.push(TERMINATOR);
        frame
    }
}

impl fmt::Display for PeerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Incremental decoder that reassembles frames split across reads.
///
/// Never fails: malformed frames are logged and dropped, and an over-long frame discards
/// everything up to the next terminator.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    discarding: bool,
    dropped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every complete, well-formed message they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<PeerMessage> {
        let mut messages = Vec::new();

        for &byte in bytes {
            if byte == TERMINATOR {
                if self.discarding {
                    self.discarding = false;
                    self.buffer.clear();
                    continue;
                }
                let frame = std::mem::take(&mut self.buffer);
                if let Some(message) = self.decode_frame(&frame) {
                    messages.push(message);
                }
            } else if self.discarding {
                continue;
            } else if self.buffer.len() >= MAX_FRAME_LEN {
                warn!(
                    max_len = MAX_FRAME_LEN,
                    "Link frame overflow, discarding until next terminator"
                );
                self.buffer.clear();
                self.discarding = true;
                self.dropped += 1;
            } else {
                self.buffer.push(byte);
            }
        }

        messages
    }

    /// Number of frames dropped as malformed since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    fn decode_frame(&mut self, frame: &[u8]) -> Option<PeerMessage> {
        let text = match std::str::from_utf8(frame) {
            Ok(text) => text.trim(),
            Err(_) => {
                warn!(len = frame.len(), "Dropping non-UTF-8 link frame");
                self.dropped += 1;
                return None;
            }
        };

        if text.is_empty() {
            debug!("Ignoring empty link frame");
            return None;
        }

        match PeerMessage::from_token(text) {
            Some(message) => Some(message),
            None => {
                warn!(frame = %text.escape_debug(), "Dropping unrecognized link frame");
                self.dropped += 1;
                None
            }
        }
    }
}
