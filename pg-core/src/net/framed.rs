use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_core::Stream;
use futures_util::Sink;

use crate::io::{BufferedSocket, Codec, DEFAULT_BUF_SIZE};
use crate::net::Socket;

const BACKPRESSURE_LIMIT: usize = DEFAULT_BUF_SIZE;

/// Turns a [`BufferedSocket`] plus a [`Codec`] into a `Sink`/`Stream` pair:
/// `start_send` encodes a request into the write buffer; `poll_next` decodes
/// as many complete responses as are already buffered before going back to
/// the socket for more.
pub struct Framed<S, C> {
    socket: BufferedSocket<S>,
    codec: C,
    is_readable: bool,
}

impl<S, C> Framed<S, C>
where
    S: Socket,
    C: Codec,
{
    pub fn new(socket: S, codec: C) -> Self {
        Framed {
            socket: BufferedSocket::new(socket),
            codec,
            is_readable: false,
        }
    }

    pub fn socket_mut(&mut self) -> &mut BufferedSocket<S> {
        &mut self.socket
    }

    pub fn shrink_buffers(&mut self) {
        self.socket.shrink_buffers();
    }
}

impl<S, C> Sink<C::Request> for Framed<S, C>
where
    S: Socket,
    C: Codec + Unpin,
{
    type Error = crate::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        if self.socket.write_buffer_mut().pending_len() >= BACKPRESSURE_LIMIT {
            ready!(self.socket.poll_flush(cx))?;
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(mut self: Pin<&mut Self>, item: C::Request) -> crate::Result<()> {
        let codec = &mut self.codec;
        self.socket.encode(codec, item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        self.socket.poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        ready!(self.socket.poll_flush(cx))?;
        self.socket.poll_shutdown(cx)
    }
}

impl<S, C> Stream for Framed<S, C>
where
    S: Socket,
    C: Codec + Unpin,
{
    type Item = crate::Result<C::Response>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.is_readable {
                let codec = &mut self.codec;
                match self.socket.decode(codec) {
                    Ok(Some(frame)) => return Poll::Ready(Some(Ok(frame))),
                    Ok(None) => self.is_readable = false,
                    Err(e) => return Poll::Ready(Some(Err(e))),
                }
            }

            debug_assert!(!self.is_readable);

            let n = ready!(self.socket.poll_read(cx))?;
            if n == 0 {
                return Poll::Ready(None);
            }
            self.is_readable = true;
        }
    }
}
