use bytes::{Buf, Bytes, BytesMut};
use pg_core::io::Codec;

use super::format::BackendMessageFormat;
use super::ReceivedMessage;

/// Frames the wire protocol's `[type:u8][len:be32][payload]` layout.
///
/// `encode` is trivial: the caller (see [`crate::connection::PgStream`]) has
/// already serialized a complete frame (or a run of frames, for batched
/// extended-query messages) into a flat byte buffer; the codec just appends
/// it. `decode` does the real work of carving exactly one frame out of
/// whatever has accumulated in the read buffer so far.
#[derive(Default)]
pub struct PostgresCodec;

impl Codec for PostgresCodec {
    type Request = Vec<u8>;
    type Response = ReceivedMessage;

    fn encode(&mut self, buf: &mut Vec<u8>, request: Vec<u8>) -> pg_core::Result<()> {
        buf.extend_from_slice(&request);
        Ok(())
    }

    fn decode(&mut self, buf: &mut BytesMut) -> pg_core::Result<Option<ReceivedMessage>> {
        // format byte + 4-byte big-endian length (length includes itself, not the format byte)
        if buf.len() < 5 {
            return Ok(None);
        }

        let format = buf[0];
        let message_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;

        if message_len < 4 {
            return Err(pg_core::err_protocol!(
                "invalid message length {message_len}: must be at least 4"
            ));
        }

        let total_len = 1 + message_len;
        if buf.len() < total_len {
            buf.reserve(total_len - buf.len());
            return Ok(None);
        }

        buf.advance(5);
        let contents = buf.split_to(message_len - 4).freeze();

        Ok(Some(ReceivedMessage {
            format: BackendMessageFormat::from_u8(format)?,
            contents,
        }))
    }
}

/// Append the standard `[type][be32 len]` header around an already-written
/// body, patching the length back in once the body size is known.
pub fn write_framed(buf: &mut Vec<u8>, format: u8, body: impl FnOnce(&mut Vec<u8>) -> pg_core::Result<()>) -> pg_core::Result<()> {
    buf.push(format);
    let len_pos = buf.len();
    buf.extend_from_slice(&[0u8; 4]);
    body(buf)?;
    let len = u32::try_from(buf.len() - len_pos)
        .map_err(|_| pg_core::err_protocol!("message body too large to frame"))?;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Same as [`write_framed`] but for the one message with no leading format
/// byte (`StartupMessage`).
pub fn write_framed_untyped(buf: &mut Vec<u8>, body: impl FnOnce(&mut Vec<u8>) -> pg_core::Result<()>) -> pg_core::Result<()> {
    let len_pos = buf.len();
    buf.extend_from_slice(&[0u8; 4]);
    body(buf)?;
    let len = u32::try_from(buf.len() - len_pos)
        .map_err(|_| pg_core::err_protocol!("message body too large to frame"))?;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

pub(crate) fn get_bytes(buf: &mut Bytes, n: usize) -> pg_core::Result<Bytes> {
    if buf.remaining() < n {
        return Err(pg_core::err_protocol!(
            "expected {n} more bytes, have {}",
            buf.remaining()
        ));
    }
    Ok(buf.split_to(n))
}

pub(crate) fn get_cstr(buf: &mut Bytes) -> pg_core::Result<String> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| pg_core::err_protocol!("expected NUL-terminated string"))?;
    let s = String::from_utf8_lossy(&buf[..nul]).into_owned();
    buf.advance(nul + 1);
    Ok(s)
}
