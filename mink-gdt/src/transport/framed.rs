//! Length-prefixed framing over a blocking TCP stream.
//!
//! Substitutes for the SCTP association described in `spec.md` §6 per Design Note §9: one
//! whole GDT message per record, preceded by a 4-byte big-endian length prefix. TCP's byte
//! stream has no message boundaries of its own, so the prefix is what lets `recv_record`
//! reassemble exactly one encoded message per call, the same contract `SctpTransport` gets
//! for free from SCTP's native record boundaries.

use crate::transport::chunk_pool::ChunkPool;
use crate::transport::buffer::Buffer;
use crate::transport::{RecordReader, RecordWriter, Transport};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};

/// Records larger than this are rejected rather than trusted, so a corrupt or hostile length
/// prefix can't make a peer allocate unbounded memory.
pub const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

pub struct TcpFramedTransport {
    stream: TcpStream,
}

impl TcpFramedTransport {
    pub fn new(stream: TcpStream) -> io::Result<TcpFramedTransport> {
        stream.set_nodelay(true)?;
        Ok(TcpFramedTransport { stream })
    }

    pub fn connect(addr: SocketAddr) -> io::Result<TcpFramedTransport> {
        TcpFramedTransport::new(TcpStream::connect(addr)?)
    }
}

impl Transport for TcpFramedTransport {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    fn split(self: Box<Self>) -> (Box<dyn RecordReader>, Box<dyn RecordWriter>) {
        let read_half = self.stream.try_clone().expect("tcp stream clone for read half");
        let write_half = self.stream;

        let reader = FramedReader {
            stream: read_half,
            pool: ChunkPool::new(),
        };
        let writer = FramedWriter { stream: write_half };

        (Box::new(reader), Box::new(writer))
    }
}

struct FramedReader {
    stream: TcpStream,
    pool: ChunkPool,
}

impl RecordReader for FramedReader {
    fn recv_record(&mut self) -> io::Result<Vec<u8>> {
        let mut prefix = Buffer::new(&mut self.pool);
        fill_exact(&mut self.stream, &mut prefix, &mut self.pool, 4)?;
        let len = BigEndian::read_u32(&prefix.peek(4));

        if len > MAX_RECORD_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record length {} exceeds {} byte cap", len, MAX_RECORD_LEN),
            ));
        }

        let mut body = Buffer::new(&mut self.pool);
        fill_exact(&mut self.stream, &mut body, &mut self.pool, len as usize)?;
        Ok(body.peek(len as usize))
    }
}

/// Block until `buffer` holds at least `want` bytes, issuing one syscall at a time via
/// [`Buffer::fill_once`]. A `0`-byte read means the peer hung up mid-record.
fn fill_exact(stream: &mut TcpStream, buffer: &mut Buffer, pool: &mut ChunkPool, want: usize) -> io::Result<()> {
    while buffer.len() < want {
        let n = buffer.fill_once(stream, pool)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed mid-record"));
        }
    }
    Ok(())
}

struct FramedWriter {
    stream: TcpStream,
}

impl RecordWriter for FramedWriter {
    fn send_record(&mut self, data: &[u8]) -> io::Result<()> {
        if data.len() as u64 > MAX_RECORD_LEN as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record length {} exceeds {} byte cap", data.len(), MAX_RECORD_LEN),
            ));
        }

        let mut prefix = [0u8; 4];
        (&mut prefix[..]).write_u32::<BigEndian>(data.len() as u32)?;
        self.stream.write_all(&prefix)?;
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_roundtrip_single_record() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let transport: Box<dyn Transport> = Box::new(TcpFramedTransport::new(stream).unwrap());
            let (mut reader, _writer) = transport.split();
            reader.recv_record().unwrap()
        });

        let client = TcpFramedTransport::connect(addr).unwrap();
        let transport: Box<dyn Transport> = Box::new(client);
        let (_reader, mut writer) = transport.split();
        writer.send_record(b"hello gdt").unwrap();

        let received = server.join().unwrap();
        assert_eq!(received, b"hello gdt");
    }

    #[test]
    fn test_rejects_oversized_length_prefix() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let transport: Box<dyn Transport> = Box::new(TcpFramedTransport::new(stream).unwrap());
            let (mut reader, _writer) = transport.split();
            reader.recv_record()
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(&(MAX_RECORD_LEN + 1).to_be_bytes()).unwrap();

        let result = server.join().unwrap();
        assert!(result.is_err());
    }
}
