//! Low-level buffers for reading and writing DNS packets

use derive_more::{Display, Error, From};

use crate::dns::names::{self, NameError};

/// Maximum number of compression pointers followed while decoding one name
const MAX_JUMPS: usize = 32;

#[derive(Debug, Display, From, Error)]
pub enum BufferError {
    #[from(ignore)]
    EndOfBuffer,
    #[from(ignore)]
    ReadOnly,
    #[from(ignore)]
    TooManyJumps,
    #[from(ignore)]
    BadLabelType,
    #[from(ignore)]
    NameTooLong,
    Name(NameError),
}

type Result<T> = std::result::Result<T, BufferError>;

pub trait PacketBuffer {
    fn read(&mut self) -> Result<u8>;
    fn get(&self, pos: usize) -> Result<u8>;
    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]>;
    fn write(&mut self, val: u8) -> Result<()>;
    fn set(&mut self, pos: usize, val: u8) -> Result<()>;
    fn pos(&self) -> usize;
    fn seek(&mut self, pos: usize) -> Result<()>;
    fn step(&mut self, steps: usize) -> Result<()>;

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write(val)
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        self.write((val >> 8) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        self.write(((val >> 24) & 0xFF) as u8)?;
        self.write(((val >> 16) & 0xFF) as u8)?;
        self.write(((val >> 8) & 0xFF) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        for b in data {
            self.write(*b)?;
        }

        Ok(())
    }

    fn set_u16(&mut self, pos: usize, val: u16) -> Result<()> {
        self.set(pos, (val >> 8) as u8)?;
        self.set(pos + 1, (val & 0xFF) as u8)?;

        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16> {
        let res = ((self.read()? as u16) << 8) | (self.read()? as u16);

        Ok(res)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let res = ((self.read()? as u32) << 24)
            | ((self.read()? as u32) << 16)
            | ((self.read()? as u32) << 8)
            | (self.read()? as u32);

        Ok(res)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let data = self.get_range(self.pos(), len)?.to_vec();
        self.step(len)?;

        Ok(data)
    }

    /// Writes a name without compression
    fn write_qname(&mut self, qname: &str) -> Result<()> {
        for label in names::split_labels(qname)? {
            self.write_u8(label.len() as u8)?;
            self.write_bytes(&label)?;
        }

        self.write_u8(0)?;

        Ok(())
    }

    /// Writes a name in the lowercase, uncompressed form used for digests
    fn write_canonical_qname(&mut self, qname: &str) -> Result<()> {
        for label in names::split_labels(qname)? {
            self.write_u8(label.len() as u8)?;
            self.write_bytes(&label.to_ascii_lowercase())?;
        }

        self.write_u8(0)?;

        Ok(())
    }

    /// Reads a possibly compressed name, appending its presentation form
    fn read_qname(&mut self, outstr: &mut String) -> Result<()> {
        let mut pos = self.pos();
        let mut jumped = false;
        let mut jumps = 0;
        let mut wire_len = 1;
        let mut labels = Vec::new();

        loop {
            let len = self.get(pos)?;

            if (len & 0xC0) == 0xC0 {
                if !jumped {
                    self.seek(pos + 2)?;
                }

                jumps += 1;
                if jumps > MAX_JUMPS {
                    return Err(BufferError::TooManyJumps);
                }

                let b2 = self.get(pos + 1)? as usize;
                pos = (((len as usize) ^ 0xC0) << 8) | b2;
                jumped = true;
                continue;
            } else if (len & 0xC0) != 0 {
                return Err(BufferError::BadLabelType);
            }

            pos += 1;
            if len == 0 {
                break;
            }

            let len = len as usize;
            wire_len += len + 1;
            if wire_len > names::MAX_NAME_LEN {
                return Err(BufferError::NameTooLong);
            }

            labels.push(self.get_range(pos, len)?.to_vec());
            pos += len;
        }

        if !jumped {
            self.seek(pos)?;
        }

        outstr.push_str(&names::from_labels(&labels));

        Ok(())
    }
}

/// Read-only view over a received message
pub struct BytePacketBuffer<'a> {
    pub buf: &'a [u8],
    pub pos: usize,
}

impl<'a> BytePacketBuffer<'a> {
    pub fn new(buf: &'a [u8]) -> BytePacketBuffer<'a> {
        BytePacketBuffer { buf, pos: 0 }
    }
}

impl<'a> PacketBuffer for BytePacketBuffer<'a> {
    fn read(&mut self) -> Result<u8> {
        let res = self.get(self.pos)?;
        self.pos += 1;

        Ok(res)
    }

    fn get(&self, pos: usize) -> Result<u8> {
        self.buf.get(pos).copied().ok_or(BufferError::EndOfBuffer)
    }

    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]> {
        let end = start.checked_add(len).ok_or(BufferError::EndOfBuffer)?;
        self.buf.get(start..end).ok_or(BufferError::EndOfBuffer)
    }

    fn write(&mut self, _: u8) -> Result<()> {
        Err(BufferError::ReadOnly)
    }

    fn set(&mut self, _: usize, _: u8) -> Result<()> {
        Err(BufferError::ReadOnly)
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.seek(self.pos + steps)
    }
}

/// Growable buffer used for composing messages
#[derive(Default, Clone, Debug)]
pub struct VectorPacketBuffer {
    pub buffer: Vec<u8>,
    pub pos: usize,
}

impl VectorPacketBuffer {
    pub fn new() -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: Vec::new(),
            pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drops everything from `len` on, used to roll back a partial write
    pub fn truncate(&mut self, len: usize) {
        self.buffer.truncate(len);
        if self.pos > len {
            self.pos = len;
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl PacketBuffer for VectorPacketBuffer {
    fn read(&mut self) -> Result<u8> {
        let res = self.get(self.pos)?;
        self.pos += 1;

        Ok(res)
    }

    fn get(&self, pos: usize) -> Result<u8> {
        self.buffer.get(pos).copied().ok_or(BufferError::EndOfBuffer)
    }

    fn get_range(&self, start: usize, len: usize) -> Result<&[u8]> {
        let end = start.checked_add(len).ok_or(BufferError::EndOfBuffer)?;
        self.buffer.get(start..end).ok_or(BufferError::EndOfBuffer)
    }

    fn write(&mut self, val: u8) -> Result<()> {
        if self.pos < self.buffer.len() {
            self.buffer[self.pos] = val;
        } else {
            self.buffer.push(val);
        }
        self.pos += 1;

        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        match self.buffer.get_mut(pos) {
            Some(b) => {
                *b = val;
                Ok(())
            }
            None => Err(BufferError::EndOfBuffer),
        }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        self.seek(self.pos + steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_compression_pointer() {
        // "example.com" at offset 0, then "www" + pointer to offset 0
        let data = [
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0, 3, b'w', b'w',
            b'w', 0xC0, 0x00, 0xAB,
        ];
        let mut buffer = BytePacketBuffer::new(&data);
        buffer.seek(13).unwrap();

        let mut name = String::new();
        buffer.read_qname(&mut name).unwrap();

        assert_eq!(name, "www.example.com");
        assert_eq!(buffer.pos(), 19);
        assert_eq!(buffer.read().unwrap(), 0xAB);
    }

    #[test]
    fn test_pointer_loop_is_rejected() {
        let data = [0xC0, 0x00];
        let mut buffer = BytePacketBuffer::new(&data);
        let mut name = String::new();

        assert!(matches!(
            buffer.read_qname(&mut name),
            Err(BufferError::TooManyJumps)
        ));
    }

    #[test]
    fn test_canonical_qname_is_lowercase() {
        let mut buffer = VectorPacketBuffer::new();
        buffer.write_canonical_qname("XFR-Key.Example").unwrap();

        assert_eq!(
            buffer.as_slice(),
            b"\x07xfr-key\x07example\x00".as_ref()
        );
    }

    #[test]
    fn test_truncate_rolls_back() {
        let mut buffer = VectorPacketBuffer::new();
        buffer.write_u32(0xDEADBEEF).unwrap();
        let mark = buffer.pos();
        buffer.write_u16(7).unwrap();
        buffer.truncate(mark);

        assert_eq!(buffer.len(), 4);
        buffer.write_u8(1).unwrap();
        assert_eq!(buffer.as_slice(), &[0xDE, 0xAD, 0xBE, 0xEF, 1]);
    }

    #[test]
    fn test_read_only_buffer_rejects_writes() {
        let data = [0u8; 4];
        let mut buffer = BytePacketBuffer::new(&data);
        assert!(matches!(buffer.write_u8(1), Err(BufferError::ReadOnly)));
        assert!(matches!(buffer.get_range(2, 4), Err(BufferError::EndOfBuffer)));
    }
}
