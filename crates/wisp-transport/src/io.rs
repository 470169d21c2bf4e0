//! Adapters from tokio `AsyncRead`/`AsyncWrite` to sources and sinks.

use crate::buffer::Buffer;
use crate::endpoint::{Closer, Endpoint, Headroom, Sink, Source};
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Boxed read half.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;
/// Boxed write half.
pub type BoxWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Source over any async reader.
pub struct IoSource<R> {
    reader: R,
}

impl<R> IoSource<R> {
    /// Wrap `reader`.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Unwrap.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Source for IoSource<R> {
    async fn read_buffer(&mut self, buffer: &mut Buffer) -> io::Result<usize> {
        let n = self.reader.read(buffer.writable()).await?;
        buffer.commit(n).map_err(io::Error::other)?;
        Ok(n)
    }

    fn as_async_read(&mut self) -> Option<&mut (dyn AsyncRead + Unpin + Send)> {
        Some(&mut self.reader)
    }
}

/// Sink over any async writer. Half-closes with `shutdown`.
pub struct IoSink<W> {
    writer: W,
}

impl<W> IoSink<W> {
    /// Wrap `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwrap.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> Headroom for IoSink<W> {}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Sink for IoSink<W> {
    async fn write_buffer(&mut self, buffer: &mut Buffer) -> io::Result<()> {
        self.writer.write_all(buffer.bytes()).await?;
        self.writer.flush().await
    }

    fn can_half_close(&self) -> bool {
        true
    }

    async fn close_write(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Both halves of a byte stream plus its whole-stream close.
pub struct StreamParts {
    /// Read half
    pub reader: BoxReader,
    /// Write half
    pub writer: BoxWriter,
    /// Close action for the whole stream
    pub closer: Closer,
}

impl StreamParts {
    /// Assemble from halves.
    pub fn new(reader: BoxReader, writer: BoxWriter, closer: Closer) -> Self {
        Self {
            reader,
            writer,
            closer,
        }
    }

    /// Split a duplex stream. The closer only records the close; dropping
    /// both halves is what releases the stream.
    pub fn from_io<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(Box::new(reader), Box::new(writer), Closer::noop())
    }

    /// Replace the close action.
    #[must_use]
    pub fn with_closer(mut self, closer: Closer) -> Self {
        self.closer = closer;
        self
    }

    /// View as a relay endpoint.
    pub fn into_endpoint(self) -> Endpoint {
        Endpoint::new(
            Box::new(IoSource::new(self.reader)),
            Box::new(IoSink::new(self.writer)),
            self.closer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copy::copy;

    #[tokio::test]
    async fn test_io_source_fills_writable() {
        let mut source = IoSource::new(&b"abcdef"[..]);
        let mut buffer = Buffer::new(8);
        buffer.reserve_rear(2).unwrap();
        buffer.reset(2).unwrap();
        assert_eq!(source.read_buffer(&mut buffer).await.unwrap(), 4);
        assert_eq!(buffer.bytes(), b"abcd");
    }

    #[tokio::test]
    async fn test_copy_between_io_adapters() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| i as u8).collect();
        let mut source = IoSource::new(payload.as_slice());
        let mut sink = IoSink::new(Vec::new());
        let n = copy(&mut sink, &mut source).await.unwrap();
        assert_eq!(n, payload.len() as u64);
        assert_eq!(sink.into_inner(), payload);
    }
}
