use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A byte-stream endpoint a [`BufferedSocket`][crate::io::BufferedSocket] can
/// drive. Implemented for plain TCP streams and, behind the `tls-rustls`
/// feature, TLS-wrapped streams.
pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static {}

impl<T> Socket for T where T: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static {}

pub async fn connect_tcp(host: &str, port: u16) -> crate::Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
