//! Little-endian record helpers shared by the metadata streams.
//!
//! All multi-byte integers in tracestore files are little-endian regardless
//! of the host byte order.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Upper bound for a persisted string, to reject garbage lengths early.
pub const MAX_STRING_LEN: u32 = 1 << 20;

/// Write a length-prefixed UTF-8 string.
pub fn write_string<W: Write + ?Sized>(out: &mut W, s: &str) -> io::Result<()> {
    out.write_u32::<LittleEndian>(s.len() as u32)?;
    out.write_all(s.as_bytes())
}

/// Read a length-prefixed UTF-8 string.
pub fn read_string<R: Read + ?Sized>(input: &mut R) -> Result<String> {
    let len = input
        .read_u32::<LittleEndian>()
        .map_err(truncated("string length"))?;
    if len > MAX_STRING_LEN {
        return Err(Error::corrupt(format!("string length {} too large", len)));
    }
    let mut buf = vec![0u8; len as usize];
    input.read_exact(&mut buf).map_err(truncated("string"))?;
    String::from_utf8(buf).map_err(|e| Error::corrupt(format!("invalid UTF-8 string: {}", e)))
}

/// Read one byte, or `None` on a clean end of stream.
///
/// Record streams have no count prefix; readers loop until this returns
/// `None`.
pub fn read_u8_or_eof<R: Read + ?Sized>(input: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match input.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Map an unexpected EOF inside a record to a format error.
pub fn truncated(context: &str) -> impl FnOnce(io::Error) -> Error + '_ {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::corrupt(format!("truncated {}", context))
        } else {
            Error::IoError(e)
        }
    }
}
