//! Peer link between the two nodes.
//!
//! ```text
//!   MAIN                                   SECONDARY
//!    │  engagement ends                        │
//!    │ ─────────────── PI1_DONE ─────────────► │ starts its engagement
//!    │ ◄────────────── PI2_ACK ─────────────── │
//!    │                    ...                  │
//!    │ ◄────────────── PI2_DONE ────────────── │ engagement ends
//!    │  reward                                 │
//! ```
//!
//! [`PeerLink`] wraps any [`LinkTransport`] with framing. It never blocks and never
//! surfaces malformed input as an error; transport failures are returned so the caller
//! can treat the link as down.

mod protocol;
mod transport;

pub use protocol::{FrameDecoder, MessageKind, PeerMessage, MAX_FRAME_LEN, TERMINATOR};
pub use transport::{LinkError, LinkTransport, MemoryLink};

use tracing::{debug, trace};

use crate::types::NodeRole;

/// Framed, role-aware endpoint of the inter-node link.
pub struct PeerLink<T: LinkTransport> {
    transport: T,
    decoder: FrameDecoder,
    role: NodeRole,
}

impl<T: LinkTransport> PeerLink<T> {
    pub fn new(role: NodeRole, transport: T) -> Self {
        Self {
            transport,
            decoder: FrameDecoder::new(),
            role,
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// Send a message originating from this node.
    pub fn send(&mut self, kind: MessageKind) -> Result<PeerMessage, LinkError> {
        let message = PeerMessage {
            kind,
            origin: self.role,
        };
        self.transport.write(&message.encode())?;
        debug!(message = %message, "Sent peer message");
        Ok(message)
    }

    /// Drain the transport and return every complete message from the peer.
    ///
    /// Messages that claim to originate from this node's own role are echoes and are
    /// dropped.
    ///
    /// A transport failure discards any partial frame, so a frame cut by a disconnect is
    /// never glued onto the first frame after the link comes back.
    pub fn poll(&mut self) -> Result<Vec<PeerMessage>, LinkError> {
        let bytes = match self.transport.read_available() {
            Ok(bytes) => bytes,
            Err(err) => {
                if self.decoder.pending() > 0 {
                    debug!(pending = self.decoder.pending(), "Discarding partial frame on link error");
                    self.decoder.clear();
                }
                return Err(err);
            }
        };
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        trace!(len = bytes.len(), "Link bytes received");

        let role = self.role;
        Ok(self
            .decoder
            .push(&bytes)
            .into_iter()
            .filter(|message| {
                let from_peer = message.origin != role;
                if !from_peer {
                    debug!(message = %message, "Dropping echoed peer message");
                }
                from_peer
            })
            .collect())
    }

    /// Frames dropped as malformed so far.
    pub fn dropped_frames(&self) -> u64 {
        self.decoder.dropped()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_between_roles() {
        let (a, b) = MemoryLink::pair();
        let mut main = PeerLink::new(NodeRole::Main, a);
        let mut secondary = PeerLink::new(NodeRole::Secondary, b);

        main.send(MessageKind::Done).unwrap();
        let received = secondary.poll().unwrap();
        assert_eq!(received, vec![PeerMessage::done(NodeRole::Main)]);

        secondary.send(MessageKind::Ack).unwrap();
        secondary.send(MessageKind::Done).unwrap();
        let received = main.poll().unwrap();
        assert_eq!(
            received,
            vec![
                PeerMessage::ack(NodeRole::Secondary),
                PeerMessage::done(NodeRole::Secondary)
            ]
        );
        assert!(main.poll().unwrap().is_empty());
    }

    #[test]
    fn test_echo_and_noise_dropped() {
        let (a, b) = MemoryLink::pair();
        let mut main = PeerLink::new(NodeRole::Main, a);

        b.inject(b"PI1_DONE\n\xff\xff\nPI2_DONE\n").unwrap();
        let received = main.poll().unwrap();
        assert_eq!(received, vec![PeerMessage::done(NodeRole::Secondary)]);
        assert_eq!(main.dropped_frames(), 1);
    }

    #[test]
    fn test_partial_frame_discarded_when_link_drops() {
        let (a, b) = MemoryLink::pair();
        let mut secondary = PeerLink::new(NodeRole::Secondary, a);

        b.inject(b"PI1_D").unwrap();
        assert!(secondary.poll().unwrap().is_empty());

        b.set_connected(false);
        assert_eq!(secondary.poll(), Err(LinkError::Unavailable));
        b.set_connected(true);

        b.inject(b"PI1_DONE\n").unwrap();
        assert_eq!(secondary.poll().unwrap(), vec![PeerMessage::done(NodeRole::Main)]);
        assert_eq!(secondary.dropped_frames(), 0);
    }

    #[test]
    fn test_transport_failure_surfaces() {
        let (a, b) = MemoryLink::pair();
        let mut main = PeerLink::new(NodeRole::Main, a);
        b.set_connected(false);

        assert_eq!(main.poll(), Err(LinkError::Unavailable));
        assert_eq!(main.send(MessageKind::Done), Err(LinkError::Unavailable));
    }
}
