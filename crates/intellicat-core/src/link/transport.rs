//! Byte-stream transport boundary.
//!
//! The transport is an already-established duplex byte stream. Reads are non-blocking and
//! writes are fire-and-forget; the orchestrator never waits on either.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Link transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The byte stream is not present (device missing, not yet connected).
    #[error("link unavailable")]
    Unavailable,

    /// The byte stream was closed by the other side.
    #[error("link closed")]
    Closed,

    #[error("link I/O error: {0}")]
    Io(String),
}

/// A duplex byte stream to the peer node.
pub trait LinkTransport: Send {
    /// Return every byte received since the last call; empty if nothing is ready.
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError>;

    /// Queue bytes for sending.
    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError>;
}

impl<T: LinkTransport + ?Sized> LinkTransport for Box<T> {
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        (**self).read_available()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        (**self).write(bytes)
    }
}

type Pipe = Arc<Mutex<VecDeque<u8>>>;

/// In-process transport; two ends created by [`MemoryLink::pair`] see each other's writes.
///
/// Both ends share one connected flag so tests can simulate the link dropping out.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    inbound: Pipe,
    outbound: Pipe,
    connected: Arc<AtomicBool>,
}

impl MemoryLink {
    /// Create two connected ends.
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let a_to_b: Pipe = Arc::default();
        let b_to_a: Pipe = Arc::default();
        let connected = Arc::new(AtomicBool::new(true));

        let a = MemoryLink {
            inbound: Arc::clone(&b_to_a),
            outbound: Arc::clone(&a_to_b),
            connected: Arc::clone(&connected),
        };
        let b = MemoryLink {
            inbound: a_to_b,
            outbound: b_to_a,
            connected,
        };
        (a, b)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Write raw bytes to the other end regardless of framing (noise injection).
    pub fn inject(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut pipe = self.outbound.lock().map_err(|_| LinkError::Closed)?;
        pipe.extend(bytes);
        Ok(())
    }
}

impl LinkTransport for MemoryLink {
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Unavailable);
        }
        let mut pipe = self.inbound.lock().map_err(|_| LinkError::Closed)?;
        Ok(pipe.drain(..).collect())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::Unavailable);
        }
        self.inject(bytes)
    }
}
