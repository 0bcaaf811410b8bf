//! Helper module to count the bytes going through a reader or writer

use std::io;
use std::io::prelude::*;

/// Reader or writer that counts the bytes passed through it.
///
/// As a writer around [`io::sink()`], it stands in for an output file
/// when all we want is the size of the output.
pub struct ByteCounter<T> {
    inner: T,
    count: u64,
}

impl<T> ByteCounter<T> {
    pub fn new(inner: T) -> ByteCounter<T> {
        ByteCounter { inner, count: 0 }
    }

    /// Returns the number of bytes read or written so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<R: Read> Read for ByteCounter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

impl<W: Write> Write for ByteCounter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
