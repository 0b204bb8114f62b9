mod buffered;
mod codec;

pub use buffered::{BufferedSocket, WriteBuffer, DEFAULT_BUF_SIZE};
pub use codec::Codec;
