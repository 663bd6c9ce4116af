use crate::transport::chunk::Chunk;
use crate::transport::chunk_pool::ChunkPool;
use std::io;

/// A dynamically sized, buffered FIFO byte queue backed by pooled [`Chunk`]s. Data is
/// appended at the head and read from the tail, so a `Buffer` can grow arbitrarily large
/// while each individual `Chunk` stays fixed-size and pool-allocated.
pub struct Buffer {
    chunks: Vec<Chunk>,
}

impl Buffer {
    #[inline]
    pub fn new(pool: &mut ChunkPool) -> Buffer {
        Buffer {
            chunks: vec![pool.alloc()],
        }
    }

    /// Total number of bytes currently queued.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Chunk::remaining_data).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write as much queued data as possible to `writer`. Returns once all data has been
    /// written out, or the next write would block.
    pub fn egress<W: io::Write>(&mut self, writer: &mut W, pool: &mut ChunkPool) -> io::Result<()> {
        loop {
            match self.write_front(writer) {
                Ok(_) => {
                    if self.chunks.len() > 1 {
                        pool.reclaim(self.chunks.remove(0));
                    } else {
                        return Ok(());
                    }
                }
                Err(e) => {
                    return if e.kind() == io::ErrorKind::WouldBlock {
                        Ok(())
                    } else {
                        Err(e)
                    }
                }
            }
        }
    }

    /// Read as much data as `reader` will give up into the buffer. Returns once the reader
    /// would block or is exhausted.
    pub fn ingress<R: io::Read>(&mut self, reader: &mut R, pool: &mut ChunkPool) -> io::Result<usize> {
        let mut total = 0usize;
        loop {
            match self.read_back(reader) {
                Ok(count) => {
                    total += count;
                    self.chunks.push(pool.alloc());
                }
                Err(e) => {
                    return if e.kind() == io::ErrorKind::WouldBlock {
                        Ok(total)
                    } else {
                        Err(e)
                    }
                }
            }
        }
    }

    /// Copy the front `count` bytes out without consuming them. Panics if fewer than
    /// `count` bytes are queued; callers must check [`Buffer::len`] first.
    pub fn peek(&self, count: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(count);
        for chunk in &self.chunks {
            if out.len() == count {
                break;
            }
            let slice = chunk.readable_slice();
            let take = (count - out.len()).min(slice.len());
            out.extend_from_slice(&slice[..take]);
        }
        out
    }

    /// Drop the front `count` bytes, reclaiming any chunk that becomes fully drained.
    pub fn consume(&mut self, mut count: usize, pool: &mut ChunkPool) {
        while count > 0 {
            let remaining = self.chunks[0].remaining_data();
            if remaining > count {
                self.chunks[0].advance(count);
                count = 0;
            } else {
                self.chunks[0].advance(remaining);
                count -= remaining;
                if self.chunks.len() > 1 {
                    pool.reclaim(self.chunks.remove(0));
                }
            }
        }
    }

    /// Append `data` to the tail of the buffer, pulling fresh chunks from `pool` as needed.
    pub fn write_all(&mut self, mut data: &[u8], pool: &mut ChunkPool) {
        while !data.is_empty() {
            let chunk = self.chunks.last_mut().expect("buffer always has one chunk");
            let cap = chunk.capacity();
            if cap == 0 {
                self.chunks.push(pool.alloc());
                continue;
            }
            let take = cap.min(data.len());
            chunk.write(&data[..take]);
            data = &data[take..];
        }
    }

    /// Issue a single blocking `read` call into the tail of the buffer and report how many
    /// bytes it produced (`0` means the peer closed the connection). Unlike [`Buffer::ingress`],
    /// which loops until `WouldBlock`, this makes exactly one syscall per call — the shape a
    /// blocking `TcpStream` needs, since it never returns `WouldBlock` on its own.
    pub fn fill_once<R: io::Read>(&mut self, reader: &mut R, pool: &mut ChunkPool) -> io::Result<usize> {
        let chunk = self.chunks.last_mut().expect("buffer always has one chunk");
        if chunk.capacity() == 0 {
            self.chunks.push(pool.alloc());
        }
        let chunk = self.chunks.last_mut().expect("buffer always has one chunk");
        let read_count = reader.read(chunk.writeable_slice())?;
        chunk.expand(read_count);
        Ok(read_count)
    }

    #[inline]
    fn write_front<W: io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        let chunk = &mut self.chunks[0];

        loop {
            let write_count = writer.write(chunk.readable_slice())?;
            if write_count == 0 && chunk.remaining_data() > 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            chunk.advance(write_count);

            if chunk.remaining_data() == 0 {
                return Ok(());
            }
        }
    }

    #[inline]
    fn read_back<R: io::Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let chunk = self.chunks.last_mut().expect("buffer always has one chunk");
        let mut total = 0usize;

        loop {
            let read_count = reader.read(chunk.writeable_slice())?;
            if read_count == 0 && chunk.capacity() > 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            chunk.expand(read_count);
            total += read_count;

            if chunk.capacity() == 0 {
                return Ok(total);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_roundtrip_small() {
        let mut pool = ChunkPool::new();
        let mut buffer = Buffer::new(&mut pool);

        let mut cursor = Cursor::new(vec![1u8, 2, 3]);
        buffer.ingress(&mut cursor, &mut pool).unwrap();

        assert_eq!(buffer.len(), 3);

        let mut out = Cursor::new(Vec::new());
        buffer.egress(&mut out, &mut pool).unwrap();

        assert_eq!(out.get_ref().as_slice(), &[1u8, 2, 3]);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_write_all_and_peek_consume() {
        let mut pool = ChunkPool::new();
        let mut buffer = Buffer::new(&mut pool);

        let data: Vec<u8> = (0..20_000u32).map(|i| i as u8).collect();
        buffer.write_all(&data, &mut pool);

        assert_eq!(buffer.len(), data.len());
        assert_eq!(buffer.peek(5), &data[..5]);

        buffer.consume(10_000, &mut pool);
        assert_eq!(buffer.len(), data.len() - 10_000);
        assert_eq!(buffer.peek(4), &data[10_000..10_004]);
    }

    #[test]
    fn test_ingress_spans_multiple_chunks() {
        use crate::transport::chunk::CHUNK_SIZE;

        let mut pool = ChunkPool::new();
        let mut buffer = Buffer::new(&mut pool);

        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 5)).map(|i| i as u8).collect();
        let mut cursor = Cursor::new(data.clone());
        buffer.ingress(&mut cursor, &mut pool).unwrap();

        assert_eq!(buffer.len(), data.len());
        assert_eq!(buffer.peek(data.len()), data);
    }
}
