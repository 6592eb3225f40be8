use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use super::{EPOCH_HANDSHAKE, EPOCH_INITIAL};
use crate::buffer::Buf;

/// A handshake message as carried in one record, borrowing its body.
///
/// Messages are never fragmented across records. The record layer keeps
/// handshake bodies below the MTU.
#[derive(Debug, PartialEq, Eq)]
pub struct Handshake<'a> {
    pub msg_type: MessageType,
    pub message_seq: u16,
    pub body: &'a [u8],
}

impl<'a> Handshake<'a> {
    /// msg_type(1) + message_seq(2) + length(3)
    pub const HEADER_LEN: usize = 6;

    /// Largest body the 24-bit length field can carry.
    pub const MAX_BODY_LEN: usize = (1 << 24) - 1;

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Handshake<'a>> {
        let (input, msg_type) = MessageType::parse(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, length) = be_u24(input)?;
        let (input, body) = take(length as usize)(input)?;

        Ok((
            input,
            Handshake {
                msg_type,
                message_seq,
                body,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        debug_assert!(self.body.len() <= Self::MAX_BODY_LEN);
        output.push(self.msg_type.as_u8());
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        output.extend_from_slice(&(self.body.len() as u32).to_be_bytes()[1..]);
        output.extend_from_slice(self.body);
    }

    pub fn to_message(&self) -> Message {
        Message {
            msg_type: self.msg_type,
            body: Buf::from_slice(self.body),
        }
    }
}

/// Owned handshake message exchanged with the record layer.
///
/// Sequence numbers are assigned by the coordinator when a flight is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub body: Buf,
}

impl Message {
    pub fn new(msg_type: MessageType, body: &[u8]) -> Self {
        Message {
            msg_type,
            body: Buf::from_slice(body),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    NewSessionTicket,
    EndOfEarlyData,
    EncryptedExtensions,
    Certificate,
    CertificateRequest,
    CertificateVerify,
    Finished,
    Unknown(u8),
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            3 => MessageType::HelloVerifyRequest,
            4 => MessageType::NewSessionTicket,
            5 => MessageType::EndOfEarlyData,
            8 => MessageType::EncryptedExtensions,
            11 => MessageType::Certificate,
            13 => MessageType::CertificateRequest,
            15 => MessageType::CertificateVerify,
            20 => MessageType::Finished,
            _ => MessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::HelloVerifyRequest => 3,
            MessageType::NewSessionTicket => 4,
            MessageType::EndOfEarlyData => 5,
            MessageType::EncryptedExtensions => 8,
            MessageType::Certificate => 11,
            MessageType::CertificateRequest => 13,
            MessageType::CertificateVerify => 15,
            MessageType::Finished => 20,
            MessageType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], MessageType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }

    /// Whether this message is the last one of a flight.
    pub fn ends_flight(&self) -> bool {
        matches!(
            self,
            MessageType::ClientHello | MessageType::HelloVerifyRequest | MessageType::Finished
        )
    }

    /// The epoch this message travels in.
    pub fn epoch(&self) -> u16 {
        match self {
            MessageType::ClientHello
            | MessageType::ServerHello
            | MessageType::HelloVerifyRequest => EPOCH_INITIAL,
            _ => EPOCH_HANDSHAKE,
        }
    }
}
