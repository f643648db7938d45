//! `PkgLength` decoding (ACPI §20.2.4). A `PkgLength` covers the length-prefixed byte, so callers
//! usually want the absolute stream offset at which the enclosed structure ends, which is what
//! [`PkgLength::end_offset`] tracks.

use crate::{stream::Stream, AmlError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PkgLength {
    /// Absolute offset (from the start of the table) at which the package ends.
    pub end_offset: usize,
}

impl PkgLength {
    /// Reads a `PkgLength` at the stream's current position, advancing past the length bytes.
    pub fn parse(stream: &mut Stream) -> Result<PkgLength, AmlError> {
        let start_offset = stream.offset();
        let lead_byte = stream.read_byte()?;
        let follow_count = lead_byte >> 6;

        let length = if follow_count == 0 {
            (lead_byte & 0x3F) as u32
        } else {
            if lead_byte & 0x30 != 0 {
                return Err(AmlError::InvalidPkgLength);
            }
            let mut length = (lead_byte & 0x0F) as u32;
            for i in 0..follow_count {
                let byte = stream.read_byte()?;
                length |= (byte as u32) << (4 + 8 * i as u32);
            }
            length
        };

        if length > 0x0FFF_FFFF {
            return Err(AmlError::InvalidPkgLength);
        }

        let header_len = stream.offset() - start_offset;
        let length = length as usize;
        if length < header_len {
            return Err(AmlError::InvalidPkgLength);
        }

        let end_offset = start_offset + length;

        Ok(PkgLength { end_offset })
    }

    /// Builds a `PkgLength` that covers the entire remaining table - used to kick off parsing a
    /// `DefinitionBlock`'s top-level `TermList`, which has no length prefix of its own.
    pub fn from_table_length(table_len: usize) -> PkgLength {
        PkgLength { end_offset: table_len }
    }

    pub fn bytes_remaining(&self, stream: &Stream) -> usize {
        self.end_offset.saturating_sub(stream.offset())
    }

    pub fn is_at_end(&self, stream: &Stream) -> bool {
        stream.offset() >= self.end_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_len(bytes: &[u8]) -> usize {
        let mut s = Stream::new(bytes);
        PkgLength::parse(&mut s).unwrap().end_offset
    }

    #[test]
    fn boundary_values() {
        // length 0: impossible (header itself is 1 byte, so minimum encodable is 1), but the
        // smallest 1-byte form encodes lengths 0..=0x3F in the low six bits.
        assert_eq!(parse_len(&[0x01]), 1);
        assert_eq!(parse_len(&[0x3F]), 0x3F);

        // 64 requires a follow byte: lead byte top two bits = 01 (one follow byte), low nibble
        // holds bits 0-3 of the length (0), the follow byte holds bits 4-11 (64 >> 4 = 4).
        assert_eq!(parse_len(&[0x40, 0x04]), 64);

        // 2^28 - 1, maximum representable length, 4 follow bytes.
        let max_len: u32 = 0x0FFF_FFFF;
        let lead = 0xC0 | ((max_len & 0xF) as u8);
        let b1 = ((max_len >> 4) & 0xFF) as u8;
        let b2 = ((max_len >> 12) & 0xFF) as u8;
        let b3 = ((max_len >> 20) & 0xFF) as u8;
        let buf = alloc::vec![lead, b1, b2, b3];
        assert_eq!(parse_len(&buf), max_len as usize);
    }

    #[test]
    fn rejects_overflow() {
        // follow count 3, reserved bits 4-5 of lead byte set: invalid.
        let mut s = Stream::new(&[0xFF, 0, 0, 0]);
        assert_eq!(PkgLength::parse(&mut s).unwrap_err(), AmlError::InvalidPkgLength);
    }
}
