//! buffers for use when writing and reading dns packets

use derive_more::{Display, Error, From};

#[derive(Debug, Display, From, Error)]
pub enum BufferError {
    Io(std::io::Error),
    EndOfBuffer,
    LabelTooLong,
    EmptyLabel,
    TooManyJumps,
}

type Result<T> = std::result::Result<T, BufferError>;

/// Upper bound on compression pointers followed while reading a single name.
/// A crafted packet could otherwise make `read_qname` loop forever.
const MAX_JUMPS: usize = 5;

/// Longest label allowed on the wire (RFC 1035 section 2.3.4)
const MAX_LABEL_LEN: usize = 0x3F;

pub trait PacketBuffer {
    fn read(&mut self) -> Result<u8>;
    fn get(&mut self, pos: usize) -> Result<u8>;
    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]>;
    fn write(&mut self, val: u8) -> Result<()>;
    fn set(&mut self, pos: usize, val: u8) -> Result<()>;
    fn pos(&self) -> usize;
    fn seek(&mut self, pos: usize) -> Result<()>;

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

    /// Write a domain name as a sequence of length prefixed labels.
    ///
    /// The name is always terminated by exactly one root label, so `example.com`
    /// and `example.com.` produce identical output. An empty label anywhere
    /// else (`a..example.com`, `.example.com`) is rejected. Names are never
    /// compressed on write.
    fn write_qname(&mut self, qname: &str) -> Result<()> {
        let name = qname.strip_suffix('.').unwrap_or(qname);
        let labels: Vec<&str> = if name.is_empty() {
            Vec::new()
        } else {
            name.split('.').collect()
        };

        for label in &labels {
            if label.is_empty() {
                return Err(BufferError::EmptyLabel);
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(BufferError::LabelTooLong);
            }
        }

        for label in labels {
            self.write_u8(label.len() as u8)?;
            for b in label.as_bytes() {
                self.write_u8(*b)?;
            }
        }

        self.write_u8(0)?;

        Ok(())
    }

    /// Read a domain name, following compression pointers.
    ///
    /// Labels are lowercased and joined with dots, without a trailing dot. After
    /// the call the buffer position sits right after the name as it appears at
    /// the original position, regardless of any jumps taken.
    fn read_qname(&mut self, outstr: &mut String) -> Result<()> {
        let mut pos = self.pos();
        let mut jumped = false;
        let mut jumps = 0;

        let mut delim = "";
        loop {
            let len = self.get(pos)?;

            // A length byte with the two high bits set is a pointer to another
            // offset in the packet
            if (len & 0xC0) == 0xC0 {
                if jumps >= MAX_JUMPS {
                    return Err(BufferError::TooManyJumps);
                }

                if !jumped {
                    self.seek(pos + 2)?;
                }

                let b2 = self.get(pos + 1)? as u16;
                let offset = (((len as u16) ^ 0xC0) << 8) | b2;
                pos = offset as usize;
                jumped = true;
                jumps += 1;
                continue;
            }

            pos += 1;

            if len == 0 {
                break;
            }

            outstr.push_str(delim);

            let str_buffer = self.get_range(pos, len as usize)?;
            outstr.push_str(&String::from_utf8_lossy(str_buffer).to_lowercase());

            delim = ".";

            pos += len as usize;
        }

        if !jumped {
            self.seek(pos)?;
        }

        Ok(())
    }
}

/// Growable buffer, used when building packets and when decoding TCP responses
#[derive(Default)]
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

    pub fn from_bytes(data: Vec<u8>) -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: data,
            pos: 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }
}

impl PacketBuffer for VectorPacketBuffer {
    fn read(&mut self) -> Result<u8> {
        let res = self.get(self.pos)?;
        self.pos += 1;

        Ok(res)
    }

    fn get(&mut self, pos: usize) -> Result<u8> {
        self.buffer.get(pos).copied().ok_or(BufferError::EndOfBuffer)
    }

    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]> {
        self.buffer
            .get(start..start + len)
            .ok_or(BufferError::EndOfBuffer)
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
            Some(slot) => {
                *slot = val;
                Ok(())
            }
            None => Err(BufferError::EndOfBuffer),
        }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        self.pos = pos;

        Ok(())
    }
}

/// Fixed size buffer matching the classic 512 byte UDP message limit
pub struct BytePacketBuffer {
    pub buf: [u8; 512],
    pub pos: usize,
}

impl Default for BytePacketBuffer {
    fn default() -> Self {
        BytePacketBuffer::new()
    }
}

impl BytePacketBuffer {
    /// This gives us a fresh buffer for holding the packet contents, and a field for
    /// keeping track of where we are.
    pub fn new() -> BytePacketBuffer {
        BytePacketBuffer {
            buf: [0; 512],
            pos: 0,
        }
    }
}

impl PacketBuffer for BytePacketBuffer {
    fn read(&mut self) -> Result<u8> {
        if self.pos >= 512 {
            return Err(BufferError::EndOfBuffer);
        }
        let res = self.buf[self.pos];
        self.pos += 1;

        Ok(res)
    }

    fn get(&mut self, pos: usize) -> Result<u8> {
        if pos >= 512 {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(self.buf[pos])
    }

    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]> {
        if start + len > 512 {
            return Err(BufferError::EndOfBuffer);
        }
        Ok(&self.buf[start..start + len])
    }

    fn write(&mut self, val: u8) -> Result<()> {
        if self.pos >= 512 {
            return Err(BufferError::EndOfBuffer);
        }
        self.buf[self.pos] = val;
        self.pos += 1;
        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        if pos >= 512 {
            return Err(BufferError::EndOfBuffer);
        }
        self.buf[pos] = val;

        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        self.pos = pos;

        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_qname_ends_with_single_root_label() {
        let mut plain = VectorPacketBuffer::new();
        plain.write_qname("www.example.com").unwrap();

        let mut rooted = VectorPacketBuffer::new();
        rooted.write_qname("www.example.com.").unwrap();

        assert_eq!(plain.as_slice(), rooted.as_slice());
        assert_eq!(
            plain.as_slice(),
            &b"\x03www\x07example\x03com\x00"[..]
        );
    }

    #[test]
    fn test_qname_roundtrip_is_lowercased() {
        let mut buffer = VectorPacketBuffer::new();
        buffer.write_qname("Mail.Example.COM").unwrap();
        buffer.seek(0).unwrap();

        let mut name = String::new();
        buffer.read_qname(&mut name).unwrap();

        assert_eq!("mail.example.com", name);
        assert_eq!(buffer.as_slice().len(), buffer.pos());
    }

    #[test]
    fn test_qname_follows_compression_pointer() {
        let mut buffer = VectorPacketBuffer::new();
        buffer.write_qname("example.com").unwrap();

        // "www" followed by a pointer back to offset 0
        let start = buffer.pos();
        buffer.write_u8(3).unwrap();
        for b in b"www" {
            buffer.write_u8(*b).unwrap();
        }
        buffer.write_u16(0xC000).unwrap();
        let end = buffer.pos();

        buffer.seek(start).unwrap();
        let mut name = String::new();
        buffer.read_qname(&mut name).unwrap();

        assert_eq!("www.example.com", name);
        assert_eq!(end, buffer.pos());
    }

    #[test]
    fn test_qname_pointer_loop_is_rejected() {
        // A pointer that points at itself
        let mut buffer = VectorPacketBuffer::from_bytes(vec![0xC0, 0x00]);

        let mut name = String::new();
        match buffer.read_qname(&mut name) {
            Err(BufferError::TooManyJumps) => {}
            other => panic!("expected TooManyJumps, got {:?}", other),
        }
    }

    #[test]
    fn test_qname_root() {
        for name in &["", "."] {
            let mut buffer = VectorPacketBuffer::new();
            buffer.write_qname(name).unwrap();
            assert_eq!(buffer.as_slice(), &b"\x00"[..]);
        }
    }

    #[test]
    fn test_qname_empty_label_is_rejected() {
        for name in &["a..example.com", ".a.example.com", "a.example.com..", ".."] {
            let mut buffer = VectorPacketBuffer::new();
            match buffer.write_qname(name) {
                Err(BufferError::EmptyLabel) => {}
                other => panic!("expected empty label error for {:?}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_label_too_long() {
        let label = "a".repeat(64);
        let mut buffer = VectorPacketBuffer::new();

        assert!(buffer.write_qname(&format!("{}.com", label)).is_err());
    }

    #[test]
    fn test_truncated_name_is_end_of_buffer() {
        let mut buffer = BytePacketBuffer::new();
        buffer.seek(510).unwrap();
        buffer.write_u8(10).unwrap();
        buffer.seek(510).unwrap();

        let mut name = String::new();
        assert!(buffer.read_qname(&mut name).is_err());
    }
}
