use bytes::BytesMut;

/// A length-prefixed frame codec over a byte stream.
///
/// `encode` appends a wire-ready representation of a request onto the write
/// buffer; `decode` attempts to carve one complete response out of the
/// accumulated read buffer, returning `Ok(None)` when more bytes are needed.
pub trait Codec {
    type Request;
    type Response;

    fn encode(&mut self, buf: &mut Vec<u8>, request: Self::Request) -> crate::Result<()>;

    fn decode(&mut self, buf: &mut BytesMut) -> crate::Result<Option<Self::Response>>;
}
