use std::io::{Read, Result, Write};

/// Read the two byte length prefix that precedes every DNS message on a TCP stream
pub fn read_packet_length<R: Read>(stream: &mut R) -> Result<u16> {
    let mut len_buffer = [0; 2];
    stream.read_exact(&mut len_buffer)?;

    Ok(((len_buffer[0] as u16) << 8) | (len_buffer[1] as u16))
}

pub fn write_packet_length<W: Write>(stream: &mut W, len: usize) -> Result<()> {
    let mut len_buffer = [0; 2];
    len_buffer[0] = (len >> 8) as u8;
    len_buffer[1] = (len & 0xFF) as u8;

    stream.write_all(&len_buffer)?;

    Ok(())
}

/// Read one length prefixed DNS message from a TCP stream
pub fn read_packet<R: Read>(stream: &mut R) -> Result<Vec<u8>> {
    let len = read_packet_length(stream)?;

    let mut data = vec![0; len as usize];
    stream.read_exact(&mut data)?;

    Ok(data)
}
