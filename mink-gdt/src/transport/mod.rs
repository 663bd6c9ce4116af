//! Record-oriented transport layer.
//!
//! A `Transport` delivers whole, reliably-ordered octet records to its peer — one record per
//! encoded GDT message (§6). The wire format itself (SCTP, PPID 49, association tuning) is
//! described in `spec.md` §6; Design Note §9 allows substituting a framed TCP stream on
//! platforms without native SCTP, which is what this crate does by default. `SctpTransport`
//! is feature-gated and only documents the wire constants, since SCTP sockets are not
//! portable test infrastructure.

pub mod chunk;
pub mod chunk_pool;
pub mod buffer;
pub mod framed;
#[cfg(feature = "sctp")]
pub mod sctp;

use std::io;
use std::net::SocketAddr;

/// The SCTP payload protocol id registered for GDT (§6).
pub const GDT_PPID: u32 = 49;

/// A reliable, ordered, record-oriented connection to exactly one peer.
///
/// Per §5 ("each transport connection owns two threads"), a `Transport` is split into an
/// independent reader half and writer half before being handed to a [`crate::client::Client`];
/// each half blocks on its own OS thread, so blocking here is the intended design, not an
/// oversight.
pub trait Transport: Send {
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Consume the transport into independently ownable read/write halves.
    fn split(self: Box<Self>) -> (Box<dyn RecordReader>, Box<dyn RecordWriter>);
}

/// Blocking inbound half of a [`Transport`]. Owned by a client's reader thread.
pub trait RecordReader: Send {
    /// Block until one full record has been read from the peer, or the connection closes.
    fn recv_record(&mut self) -> io::Result<Vec<u8>>;
}

/// Blocking outbound half of a [`Transport`]. Owned by a client's writer thread.
pub trait RecordWriter: Send {
    /// Block until `data` has been fully handed to the OS for transmission.
    fn send_record(&mut self, data: &[u8]) -> io::Result<()>;

    /// Best-effort half/full close; idempotent.
    fn shutdown(&mut self);
}
