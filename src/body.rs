//! Byte sources and sinks a transfer streams through.
//!
//! A [`BodySource`] feeds request bodies (uploads, POST payloads) and may
//! support seeking so the engine can rewind on redirects or retries. A
//! [`BodySink`] receives response bodies or headers. In-memory buffers,
//! files, arbitrary readers/writers and plain closures are all adapted to
//! the same two traits.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

/// Produces request body bytes.
pub trait BodySource: Send {
    /// Fill `buf`; `Ok(0)` means end of body.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether [`seek`](Self::seek) is supported. Non-seekable sources report
    /// "can't seek" to the engine, which then falls back to other strategies.
    fn seekable(&self) -> bool {
        false
    }

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::ErrorKind::Unsupported.into())
    }

    /// Total length, found by seeking to the end and back to the start.
    fn length(&mut self) -> io::Result<Option<u64>> {
        if !self.seekable() {
            return Ok(None);
        }
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(0))?;
        Ok(Some(end))
    }
}

/// Consumes response bytes. Accepting fewer bytes than offered aborts the
/// transfer with a write error.
pub trait BodySink: Send {
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;
}

// ─── Sources ─────────────────────────────────────────────────────────────────

impl<T: AsRef<[u8]> + Send> BodySource for io::Cursor<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }
}

/// Any reader, exposed without seek support.
pub struct Reader<R>(pub R);

impl<R: Read + Send> BodySource for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// Any seekable reader (files, cursors over borrowed data, ...).
pub struct Seekable<R>(pub R);

impl<R: Read + Seek + Send> BodySource for Seekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

/// A closure producing body bytes.
pub struct FnSource<F>(F);

pub fn source_fn<F>(f: F) -> FnSource<F>
where
    F: FnMut(&mut [u8]) -> io::Result<usize> + Send,
{
    FnSource(f)
}

impl<F> BodySource for FnSource<F>
where
    F: FnMut(&mut [u8]) -> io::Result<usize> + Send,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (self.0)(buf)
    }
}

// ─── Sinks ───────────────────────────────────────────────────────────────────

impl BodySink for Vec<u8> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(data);
        Ok(data.len())
    }
}

impl BodySink for std::fs::File {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_all(data)?;
        Ok(data.len())
    }
}

/// Any writer. Each delivery is written in full.
pub struct Writer<W>(pub W);

impl<W: Write + Send> BodySink for Writer<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.write_all(data)?;
        Ok(data.len())
    }
}

/// A closure receiving body bytes; returns how many it accepted.
pub struct FnSink<F>(F);

pub fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: FnMut(&[u8]) -> usize + Send,
{
    FnSink(f)
}

impl<F> BodySink for FnSink<F>
where
    F: FnMut(&[u8]) -> usize + Send,
{
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        Ok((self.0)(data))
    }
}

/// Cloneable in-memory sink. Attach one clone to a transfer and read the
/// other after completion, including from another thread.
#[derive(Debug, Clone, Default)]
pub struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Copy of everything received so far.
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    /// Move the received bytes out, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl BodySink for Buffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(data);
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_cursor_length_rewinds() {
        let mut src = Cursor::new(b"hello world".to_vec());
        let mut first = [0u8; 5];
        BodySource::read(&mut src, &mut first).unwrap();
        assert_eq!(src.length().unwrap(), Some(11));
        let mut again = [0u8; 5];
        BodySource::read(&mut src, &mut again).unwrap();
        assert_eq!(&again, b"hello");
    }

    #[test]
    fn test_reader_is_not_seekable() {
        let mut src = Reader(&b"abc"[..]);
        assert!(!src.seekable());
        assert_eq!(src.length().unwrap(), None);
        assert_eq!(
            src.seek(SeekFrom::Start(0)).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_file_source_length() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[7u8; 300]).unwrap();
        let mut src = Seekable(file);
        assert_eq!(src.length().unwrap(), Some(300));
        let mut buf = [0u8; 512];
        assert_eq!(src.read(&mut buf).unwrap(), 300);
    }

    #[test]
    fn test_fn_source_and_sink() {
        let mut left = 3;
        let mut src = source_fn(move |buf: &mut [u8]| {
            if left == 0 {
                return Ok(0);
            }
            left -= 1;
            buf[0] = b'x';
            Ok(1)
        });
        let mut out = Vec::new();
        let mut buf = [0u8; 8];
        loop {
            let n = src.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            BodySink::write(&mut out, &buf[..n]).unwrap();
        }
        assert_eq!(out, b"xxx");

        let mut seen = 0;
        let mut sink = sink_fn(|data: &[u8]| {
            seen += data.len();
            data.len() / 2
        });
        assert_eq!(sink.write(b"abcd").unwrap(), 2);
        drop(sink);
        assert_eq!(seen, 4);
    }

    #[test]
    fn test_buffer_shares_contents() {
        let buffer = Buffer::new();
        let mut attached = buffer.clone();
        attached.write(b"abc").unwrap();
        attached.write(b"def").unwrap();
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.take(), b"abcdef");
        assert!(buffer.is_empty());
    }
}
