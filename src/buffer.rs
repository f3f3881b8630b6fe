use memmap2::Mmap;
use std::fs::File;
use std::io;

/// Capacity of every connection I/O buffer.
pub const BUFSZ: usize = 8192;

/// Fixed-capacity byte buffer with a write frontier (`size`) and a consume
/// cursor (`pos`). The cursor partitions `[0, size)` into a consumed prefix
/// and an unread suffix, so the same buffer serves both as parser input
/// (cursor = parsed-up-to-here) and as send staging (cursor = sent-up-to-here).
#[derive(Debug)]
pub struct Buffer {
    data: Box<[u8]>,
    size: usize,
    pos: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(BUFSZ)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Buffer {
            data: vec![0u8; cap].into_boxed_slice(),
            size: 0,
            pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The write frontier.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Free room behind the frontier.
    pub fn spare(&self) -> usize {
        self.data.len() - self.size
    }

    /// Bytes still to consume from the cursor.
    pub fn remaining(&self) -> usize {
        self.size - self.pos
    }

    pub fn is_full(&self) -> bool {
        self.size == self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// The unread suffix `[pos, size)`.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.pos..self.size]
    }

    /// Writable tail `[size, capacity)`.
    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.size..]
    }

    /// Extend the frontier after bytes were written into `tail_mut`.
    pub fn grow(&mut self, n: usize) {
        debug_assert!(self.size + n <= self.data.len());
        self.size += n;
    }

    /// Move the cursor past `n` consumed bytes.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.size);
        self.pos += n;
    }

    /// Drop everything at and past `new_size`.
    pub fn truncate(&mut self, new_size: usize) {
        debug_assert!(new_size <= self.size);
        self.size = new_size;
        if self.pos > self.size {
            self.pos = self.size;
        }
    }

    pub fn reset(&mut self) {
        self.size = 0;
        self.pos = 0;
    }

    /// Copy as much of `src` as fits into the tail; returns bytes copied.
    pub fn fill(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.spare());
        let start = self.size;
        self.data[start..start + n].copy_from_slice(&src[..n]);
        self.size += n;
        n
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only, file-backed buffer with a send cursor. A zero-length file maps
/// to no region at all (mmap rejects empty mappings).
#[derive(Debug)]
pub struct MapBuffer {
    map: Option<Mmap>,
    pos: usize,
}

impl MapBuffer {
    pub fn map(file: &File, len: usize) -> io::Result<Self> {
        let map = if len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(file)? })
        };
        Ok(MapBuffer { map, pos: 0 })
    }

    pub fn len(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> usize {
        self.len() - self.pos
    }

    pub fn exhausted(&self) -> bool {
        self.pos >= self.len()
    }

    pub fn unread(&self) -> &[u8] {
        match &self.map {
            Some(m) => &m[self.pos..],
            None => &[],
        }
    }

    /// At most `cap` unread bytes, for chunked sends.
    pub fn chunk(&self, cap: usize) -> &[u8] {
        let unread = self.unread();
        &unread[..unread.len().min(cap)]
    }

    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.len());
        self.pos += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cursor_partitions_the_region() {
        let mut buf = Buffer::new();
        assert_eq!(buf.capacity(), BUFSZ);
        assert_eq!(buf.fill(b"hello world"), 11);
        assert_eq!(buf.size(), 11);
        assert_eq!(buf.remaining(), 11);
        buf.advance(6);
        assert_eq!(buf.unread(), b"world");
        assert_eq!(buf.remaining(), 5);
        buf.reset();
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn fill_is_bounded_by_capacity() {
        let mut buf = Buffer::with_capacity(4);
        assert_eq!(buf.fill(b"abcdef"), 4);
        assert!(buf.is_full());
        assert_eq!(buf.spare(), 0);
        assert_eq!(buf.as_slice(), b"abcd");
    }

    #[test]
    fn truncate_pulls_back_the_frontier() {
        let mut buf = Buffer::new();
        buf.fill(b"0123456789");
        buf.advance(2);
        buf.truncate(6);
        assert_eq!(buf.unread(), b"2345");
    }

    #[test]
    fn grow_tracks_external_writes() {
        let mut buf = Buffer::new();
        buf.tail_mut()[..3].copy_from_slice(b"abc");
        buf.grow(3);
        assert_eq!(buf.as_slice(), b"abc");
    }

    #[test]
    fn maps_a_file_read_only() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"static body").unwrap();
        tmp.flush().unwrap();
        let file = File::open(tmp.path()).unwrap();
        let mut map = MapBuffer::map(&file, 11).unwrap();
        assert_eq!(map.len(), 11);
        assert_eq!(map.chunk(6), b"static");
        map.advance(7);
        assert_eq!(map.unread(), b"body");
        map.advance(4);
        assert!(map.exhausted());
    }

    #[test]
    fn empty_file_maps_to_empty_buffer() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = File::open(tmp.path()).unwrap();
        let map = MapBuffer::map(&file, 0).unwrap();
        assert!(map.is_empty());
        assert!(map.exhausted());
        assert_eq!(map.unread(), b"");
    }
}
