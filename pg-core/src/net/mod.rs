mod framed;
mod socket;
#[cfg(feature = "tls-rustls")]
mod tls;

pub use framed::Framed;
pub use socket::{connect_tcp, Socket};
#[cfg(feature = "tls-rustls")]
pub use tls::{upgrade, SslMode, TlsConfig};
