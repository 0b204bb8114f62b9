use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::io::Codec;
use crate::net::Socket;
use crate::Error;

/// Default chunk size used both when growing the read buffer and as the
/// backpressure watermark on the write buffer.
pub const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// Accumulates bytes destined for the socket until [`BufferedSocket::poll_flush`] drains them.
///
/// `bytes_written` is the logical end of valid data in `buf`; `bytes_flushed`
/// is how much of that prefix has actually made it onto the wire. The two
/// only coincide once a flush fully drains the buffer, at which point both
/// reset to zero and `buf` is cleared.
#[derive(Default)]
pub struct WriteBuffer {
    buf: Vec<u8>,
    bytes_written: usize,
    bytes_flushed: usize,
}

impl WriteBuffer {
    /// Direct access to the underlying buffer. Callers that write through
    /// this handle must not shrink `buf` below `bytes_written`; `encode`
    /// re-syncs the written-high-water-mark after every call.
    pub fn buf_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    /// Re-synchronize the written high-water-mark after writing through
    /// [`Self::buf_mut`] directly (bypassing [`BufferedSocket::encode`]).
    pub fn note_written(&mut self) {
        self.bytes_written = self.buf.len();
    }

    pub fn is_empty(&self) -> bool {
        self.bytes_flushed >= self.bytes_written
    }

    pub fn pending_len(&self) -> usize {
        self.bytes_written.saturating_sub(self.bytes_flushed)
    }

    fn sanity_check(&self) {
        debug_assert!(self.bytes_flushed <= self.bytes_written);
        debug_assert!(self.bytes_written <= self.buf.len());
    }

    fn reclaim(&mut self) {
        if self.bytes_flushed > 0 && self.bytes_flushed >= self.bytes_written {
            self.buf.clear();
            self.bytes_written = 0;
            self.bytes_flushed = 0;
        }
    }
}

/// Wraps a raw socket with a write buffer (coalesces small writes) and a read
/// buffer (lets a [`Codec`] see a growable byte window instead of driving the
/// socket directly).
pub struct BufferedSocket<S> {
    socket: S,
    write_buf: WriteBuffer,
    read_buf: BytesMut,
}

impl<S> BufferedSocket<S>
where
    S: Socket,
{
    pub fn new(socket: S) -> Self {
        BufferedSocket {
            socket,
            write_buf: WriteBuffer::default(),
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_SIZE),
        }
    }

    pub fn write_buffer_mut(&mut self) -> &mut WriteBuffer {
        &mut self.write_buf
    }

    pub fn write_buffer_is_empty(&self) -> bool {
        self.write_buf.is_empty()
    }

    pub fn encode<C: Codec>(&mut self, codec: &mut C, request: C::Request) -> crate::Result<()> {
        codec.encode(&mut self.write_buf.buf, request)?;
        self.write_buf.bytes_written = self.write_buf.buf.len();
        Ok(())
    }

    pub fn decode<C: Codec>(&mut self, codec: &mut C) -> crate::Result<Option<C::Response>> {
        codec.decode(&mut self.read_buf)
    }

    /// Drive writes until the buffer is fully flushed.
    pub fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        self.write_buf.sanity_check();

        while self.write_buf.bytes_flushed < self.write_buf.bytes_written {
            let chunk = &self.write_buf.buf
                [self.write_buf.bytes_flushed..self.write_buf.bytes_written];
            let n = ready!(Pin::new(&mut self.socket).poll_write(cx, chunk))?;
            if n == 0 {
                return Poll::Ready(Err(Error::ConnectionClosed));
            }
            self.write_buf.bytes_flushed += n;
        }

        ready!(Pin::new(&mut self.socket).poll_flush(cx))?;
        self.write_buf.reclaim();

        Poll::Ready(Ok(()))
    }

    /// Pull more bytes off the socket into the read buffer. Returns the
    /// number of bytes read; `0` means the peer closed the connection.
    pub fn poll_read(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<usize>> {
        self.read_buf.reserve(DEFAULT_BUF_SIZE);

        let mut dst = self.read_buf.split_off(self.read_buf.len());
        dst.resize(dst.capacity(), 0);

        let mut read_buf = ReadBuf::new(&mut dst);
        let before = read_buf.filled().len();
        ready!(Pin::new(&mut self.socket).poll_read(cx, &mut read_buf))?;
        let n = read_buf.filled().len() - before;

        dst.truncate(n);
        self.read_buf.unsplit(dst);

        Poll::Ready(Ok(n))
    }

    pub fn poll_shutdown(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        Pin::new(&mut self.socket)
            .poll_shutdown(cx)
            .map_err(Error::from)
    }

    pub fn shrink_buffers(&mut self) {
        if self.read_buf.is_empty() {
            self.read_buf = BytesMut::with_capacity(DEFAULT_BUF_SIZE);
        }
        if self.write_buf.is_empty() {
            self.write_buf.buf.shrink_to(DEFAULT_BUF_SIZE);
        }
    }
}
