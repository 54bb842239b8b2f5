//! Primitive wire encoders/decoders shared by every [`crate::Message`]
//! variant's payload, grounded on the teacher's `TagStructReader`/
//! `TagStructWriter` (`protocol::serde`) but simplified: milter payloads
//! carry no per-value type tag, only a fixed per-command schema, so a
//! plain cursor over the already-framed payload slice is enough.

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use crate::error::MilterError;

/// Appends a NUL-terminated string.
pub fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Appends a raw byte buffer with no terminator.
pub fn write_buf(buf: &mut Vec<u8>, b: &[u8]) {
    buf.extend_from_slice(b);
}

/// Appends a big-endian `u32`.
pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.write_u32::<NetworkEndian>(v)
        .expect("writes to a Vec<u8> never fail");
}

/// Appends a big-endian `u16`.
pub fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.write_u16::<NetworkEndian>(v)
        .expect("writes to a Vec<u8> never fail");
}

/// Appends a single byte.
pub fn write_char(buf: &mut Vec<u8>, c: u8) {
    buf.push(c);
}

/// Appends exactly 3 bytes, failing if `s` isn't exactly that long.
pub fn write_3chars(buf: &mut Vec<u8>, s: &[u8]) -> Result<(), MilterError> {
    if s.len() != 3 {
        return Err(MilterError::Codec(format!(
            "expected a 3-byte smtp code, got {} bytes",
            s.len()
        )));
    }

    buf.extend_from_slice(s);
    Ok(())
}

/// Appends each item as a NUL-terminated string; fails if `items` is empty.
pub fn write_strs(buf: &mut Vec<u8>, items: &[String]) -> Result<(), MilterError> {
    if items.is_empty() {
        return Err(MilterError::Codec(
            "cannot encode an empty string list".to_string(),
        ));
    }

    for item in items {
        write_str(buf, item);
    }

    Ok(())
}

/// A cursor over a single already-framed payload, used to decode the
/// command-specific fields within it.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Wraps a payload slice for decoding.
    pub fn new(buf: &'a [u8]) -> Self {
        PayloadReader { buf, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Reads a NUL-terminated string.
    pub fn read_str(&mut self) -> Result<String, MilterError> {
        let rest = self.remaining();
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| MilterError::Codec("missing NUL terminator".to_string()))?;

        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|e| MilterError::Codec(format!("invalid utf-8 in string: {e}")))?
            .to_string();

        self.pos += nul + 1;
        Ok(s)
    }

    /// Consumes and returns the remaining bytes as a raw buffer.
    pub fn read_buf_rest(&mut self) -> Vec<u8> {
        let rest = self.remaining().to_vec();
        self.pos = self.buf.len();
        rest
    }

    /// Reads a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, MilterError> {
        let mut rest = self.remaining();
        let v = rest
            .read_u32::<NetworkEndian>()
            .map_err(|_| MilterError::Codec("not enough data for u32".to_string()))?;
        self.pos += 4;
        Ok(v)
    }

    /// Reads a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, MilterError> {
        let mut rest = self.remaining();
        let v = rest
            .read_u16::<NetworkEndian>()
            .map_err(|_| MilterError::Codec("not enough data for u16".to_string()))?;
        self.pos += 2;
        Ok(v)
    }

    /// Reads a single byte.
    pub fn read_char(&mut self) -> Result<u8, MilterError> {
        let rest = self.remaining();
        let b = *rest
            .first()
            .ok_or_else(|| MilterError::Codec("not enough data for a single byte".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads exactly 3 bytes.
    pub fn read_3chars(&mut self) -> Result<[u8; 3], MilterError> {
        let rest = self.remaining();
        if rest.len() < 3 {
            return Err(MilterError::Codec(
                "not enough data for a 3-byte smtp code".to_string(),
            ));
        }

        let mut out = [0u8; 3];
        out.copy_from_slice(&rest[..3]);
        self.pos += 3;
        Ok(out)
    }

    /// Reads every remaining NUL-terminated string, failing if there are
    /// none.
    pub fn read_strs_rest(&mut self) -> Result<Vec<String>, MilterError> {
        let mut out = Vec::new();
        while !self.remaining().is_empty() {
            out.push(self.read_str()?);
        }

        if out.is_empty() {
            return Err(MilterError::Codec(
                "expected at least one string, got none".to_string(),
            ));
        }

        Ok(out)
    }

    /// Whether any unconsumed bytes remain.
    pub fn has_data_left(&self) -> bool {
        !self.remaining().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn str_round_trips() {
        let mut buf = Vec::new();
        write_str(&mut buf, "hello");
        assert_eq!(buf, b"hello\0");

        let mut r = PayloadReader::new(&buf);
        assert_eq!(r.read_str().unwrap(), "hello");
        assert!(!r.has_data_left());
    }

    #[test]
    fn strs_rejects_empty_list() {
        let mut buf = Vec::new();
        assert!(write_strs(&mut buf, &[]).is_err());
    }

    #[test]
    fn missing_terminator_is_a_codec_error() {
        let mut r = PayloadReader::new(b"no-terminator");
        assert!(r.read_str().is_err());
    }
}
