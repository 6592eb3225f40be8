use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

use super::{ContentType, ProtocolVersion};
use crate::buffer::Buf;
use crate::util::{be_u48, put_u48};

/// One record inside a datagram, borrowing its fragment.
#[derive(Debug, PartialEq, Eq)]
pub struct Record<'a> {
    pub content_type: ContentType,
    pub epoch: u16,
    /// Per-epoch sequence number (48 bits on the wire).
    pub sequence: u64,
    pub fragment: &'a [u8],
}

impl<'a> Record<'a> {
    /// content_type(1) + version(2) + epoch(2) + seq(6) + length(2)
    pub const HEADER_LEN: usize = 13;

    pub const MAX_SEQUENCE: u64 = (1 << 48) - 1;

    /// Largest fragment the 16-bit length field can carry.
    pub const MAX_FRAGMENT_LEN: usize = u16::MAX as usize;

    /// Largest plaintext a protected record may carry (2^14).
    pub const MAX_PLAINTEXT_LEN: usize = 1 << 14;

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Record<'a>> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, _) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        let (rest, fragment) = take(length as usize)(input)?;

        Ok((
            rest,
            Record {
                content_type,
                epoch,
                sequence,
                fragment,
            },
        ))
    }

    /// Callers keep fragments within [`Record::MAX_FRAGMENT_LEN`].
    pub fn serialize(&self, output: &mut Buf) {
        debug_assert!(self.fragment.len() <= Self::MAX_FRAGMENT_LEN);
        output.push(self.content_type.as_u8());
        ProtocolVersion.serialize(output);
        output.extend_from_slice(&self.epoch.to_be_bytes());
        put_u48(self.sequence, output);
        output.extend_from_slice(&(self.fragment.len() as u16).to_be_bytes());
        output.extend_from_slice(self.fragment);
    }

    /// Size of this record on the wire.
    pub fn wire_len(&self) -> usize {
        Self::HEADER_LEN + self.fragment.len()
    }
}

/// Split a datagram into records.
///
/// `None` if any record is truncated or malformed. A datagram is taken or
/// dropped as a whole.
pub fn parse_datagram(mut datagram: &[u8]) -> Option<Vec<Record<'_>>> {
    let mut records = Vec::with_capacity(4);

    while !datagram.is_empty() {
        let (rest, record) = Record::parse(datagram).ok()?;
        records.push(record);
        datagram = rest;
    }

    if records.is_empty() {
        return None;
    }

    Some(records)
}
