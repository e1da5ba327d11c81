//! Length-prefixed framing for DNS over TCP

use std::io::{self, ErrorKind, Read, Result, Write};

pub fn write_packet_length<W: Write>(stream: &mut W, len: usize) -> Result<()> {
    if len > u16::MAX as usize {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("message of {} bytes is too large to frame", len),
        ));
    }

    let mut len_buffer = [0; 2];
    len_buffer[0] = (len >> 8) as u8;
    len_buffer[1] = (len & 0xFF) as u8;
    stream.write_all(&len_buffer)?;

    Ok(())
}

/// Reads one framed message
///
/// Returns `None` if the peer closed the connection between messages. A
/// connection closed inside a frame is an `UnexpectedEof` error.
pub fn read_frame<R: Read>(stream: &mut R) -> Result<Option<Vec<u8>>> {
    let mut first = [0; 1];
    loop {
        match stream.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let mut second = [0; 1];
    stream.read_exact(&mut second)?;
    let len = ((first[0] as usize) << 8) | (second[0] as usize);

    let mut payload = vec![0; len];
    stream.read_exact(&mut payload)?;

    Ok(Some(payload))
}

/// Writes `payload` with its length prefix
pub fn write_frame<W: Write>(stream: &mut W, payload: &[u8]) -> Result<()> {
    stream.write_all(&frame(payload)?)
}

/// Prefixes `payload` with its length
pub fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    let mut framed = Vec::with_capacity(payload.len() + 2);
    write_packet_length(&mut framed, payload.len())?;
    framed.extend_from_slice(payload);

    Ok(framed)
}
