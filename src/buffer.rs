//! Growable FIFO byte buffer with partial read/write semantics.
//!
//! Mirrors a classic ring-free "compact or grow" network buffer: bytes
//! are appended at `write_index` and consumed from `read_index`, with
//! compaction preferred over reallocation whenever the prependable
//! space plus the writable tail is already large enough.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Initial capacity for every freshly created socket buffer.
pub const INIT_CAPACITY: usize = 1024;

/// A growable, prependable byte FIFO.
#[derive(Debug)]
pub struct Buffer {
    data: BytesMut,
    read_index: usize,
    write_index: usize,
}

impl Buffer {
    /// Create a buffer with the given initial capacity.
    pub fn create(capacity: usize) -> Self {
        let mut data = BytesMut::with_capacity(capacity);
        data.resize(capacity, 0);
        Buffer {
            data,
            read_index: 0,
            write_index: 0,
        }
    }

    /// Bytes available to consume.
    pub fn readable(&self) -> usize {
        self.write_index - self.read_index
    }

    fn writable(&self) -> usize {
        self.data.len() - self.write_index
    }

    fn prependable(&self) -> usize {
        self.read_index
    }

    fn cap(&self) -> usize {
        self.data.len()
    }

    /// The readable region, for inspection by sniffers.
    pub fn readable_slice(&self) -> &[u8] {
        &self.data[self.read_index..self.write_index]
    }

    fn grow(&mut self) {
        let newcap = (self.cap() * 2).max(1);
        self.data.resize(newcap, 0);
    }

    /// Make room for at least `needed` more bytes at the tail,
    /// compacting before growing per the spec's policy.
    fn reserve(&mut self, needed: usize) {
        loop {
            if self.writable() >= needed {
                return;
            }
            if self.prependable() + self.writable() >= needed {
                let readable = self.readable();
                self.data.copy_within(self.read_index..self.write_index, 0);
                self.read_index = 0;
                self.write_index = readable;
                return;
            }
            self.grow();
        }
    }

    /// Copy `n` bytes out and advance `read_index`.
    ///
    /// # Panics
    /// Panics if `n > readable()`.
    pub fn consume(&mut self, dst: &mut [u8], n: usize) {
        assert!(n <= self.readable());
        dst[..n].copy_from_slice(&self.data[self.read_index..self.read_index + n]);
        self.read_index += n;
    }

    /// Advance `read_index` by `n` without copying.
    ///
    /// # Panics
    /// Panics if `n > readable()`.
    pub fn skip(&mut self, n: usize) {
        assert!(n <= self.readable());
        self.read_index += n;
    }

    /// Append `src` to the tail, compacting or growing as needed.
    pub fn append(&mut self, src: &[u8]) {
        self.reserve(src.len());
        let start = self.write_index;
        self.data[start..start + src.len()].copy_from_slice(src);
        self.write_index += src.len();
    }

    /// Append all of `src`'s readable bytes to `self`. Does not clear
    /// `src` — callers must do so after a successful concat.
    pub fn concat(&mut self, src: &Buffer) {
        self.append(src.readable_slice());
    }

    /// Reset both indices to zero without shrinking the allocation.
    pub fn clear(&mut self) {
        self.read_index = 0;
        self.write_index = 0;
    }

    /// Fill the tail from an async reader made ready by the caller.
    ///
    /// Returns `Ok(n)` with `n > 0` on a successful read, `Ok(0)` on
    /// EOF, or the underlying I/O error otherwise (including
    /// `WouldBlock`/`Interrupted`, which callers treat as transient).
    pub async fn fill_from<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> std::io::Result<usize> {
        if self.writable() == 0 {
            self.grow();
        }
        let start = self.write_index;
        let end = self.data.len();
        let n = reader.read(&mut self.data[start..end]).await?;
        self.write_index += n;
        Ok(n)
    }

    /// Drain the head to an async writer made ready by the caller.
    pub async fn drain_to<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> std::io::Result<usize> {
        let n = writer.write(self.readable_slice()).await?;
        self.read_index += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariants_hold_after_construction() {
        let b = Buffer::create(INIT_CAPACITY);
        assert_eq!(b.readable(), 0);
        assert_eq!(b.readable() + b.prependable() + b.writable(), b.cap());
    }

    #[test]
    fn append_then_consume_round_trips() {
        let mut b = Buffer::create(8);
        b.append(b"hello");
        assert_eq!(b.readable(), 5);
        let mut out = [0u8; 5];
        b.consume(&mut out, 5);
        assert_eq!(&out, b"hello");
        assert_eq!(b.readable(), 0);
    }

    #[test]
    fn append_grows_by_doubling_when_no_room() {
        let mut b = Buffer::create(4);
        b.append(b"abcd");
        assert_eq!(b.cap(), 4);
        b.append(b"e");
        // prependable(0) + writable(0) < 1, must double to 8
        assert_eq!(b.cap(), 8);
    }

    #[test]
    fn append_compacts_before_growing_when_possible() {
        let mut b = Buffer::create(8);
        b.append(b"abcdefgh");
        let mut out = [0u8; 6];
        b.consume(&mut out, 6); // read_index=6, write_index=8, prependable=6, writable=0
        b.append(b"xx"); // needed=2; writable(0)+prependable(6)=6 >= 2 -> compact, no growth
        assert_eq!(b.cap(), 8);
        assert_eq!(b.readable(), 4); // "gh" + "xx"
    }

    #[test]
    fn concat_then_clear_preserves_sequence() {
        let mut dst = Buffer::create(8);
        let mut src = Buffer::create(8);
        dst.append(b"ab");
        src.append(b"cd");
        dst.concat(&src);
        src.clear();
        assert_eq!(dst.readable_slice(), b"abcd");
        assert_eq!(src.readable(), 0);
    }

    #[test]
    fn repeated_chunked_append_consume_is_byte_identical() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let mut b = Buffer::create(16);
        let mut consumed = Vec::new();
        for chunk in payload.chunks(7) {
            b.append(chunk);
            let mut out = vec![0u8; chunk.len()];
            b.consume(&mut out, chunk.len());
            consumed.extend_from_slice(&out);
        }
        assert_eq!(consumed, payload);
    }

    #[test]
    fn skip_advances_without_copying() {
        let mut b = Buffer::create(8);
        b.append(b"abcdef");
        b.skip(3);
        assert_eq!(b.readable_slice(), b"def");
    }
}
