//! Datagram framing.
//!
//! Only as much of the DTLS wire format as the coordinator needs to classify
//! traffic: record headers, handshake headers, the ClientHello cookie field,
//! HelloVerifyRequest and alerts. Handshake bodies are opaque to us and are
//! produced and consumed by the [`RecordLayer`](crate::RecordLayer).

mod alert;
mod client_hello;
mod handshake;
mod hello_verify;
mod record;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use client_hello::ClientHello;
pub use handshake::{Handshake, Message, MessageType};
pub use hello_verify::HelloVerifyRequest;
pub use record::{parse_datagram, Record};

use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::buffer::Buf;

/// Plaintext handshake (ClientHello, ServerHello, HelloVerifyRequest, alerts).
pub const EPOCH_INITIAL: u16 = 0;
/// 0-RTT early data.
pub const EPOCH_EARLY_DATA: u16 = 1;
/// Protected handshake messages.
pub const EPOCH_HANDSHAKE: u16 = 2;
/// Application data after (or, server side, during) the handshake.
pub const EPOCH_APPLICATION: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    Alert,
    Handshake,
    ApplicationData,
    #[default]
    Unknown,
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown => 0,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

/// The only record version we emit or accept: DTLS 1.2 (0xFEFD).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion;

impl ProtocolVersion {
    pub const WIRE: u16 = 0xFEFD;

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (rest, v) = be_u16(input)?;
        if v != Self::WIRE {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }
        Ok((rest, ProtocolVersion))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&Self::WIRE.to_be_bytes());
    }
}

/// Where the first record of a datagram is a plaintext ClientHello, the
/// fields needed to answer it without keeping state.
#[derive(Debug)]
pub struct ClientHelloPeek {
    pub record_seq: u64,
    pub message_seq: u16,
    pub cookie: crate::cookie::Cookie,
}

pub fn peek_client_hello(datagram: &[u8]) -> Option<ClientHelloPeek> {
    let (_, record) = Record::parse(datagram).ok()?;
    if record.content_type != ContentType::Handshake || record.epoch != EPOCH_INITIAL {
        return None;
    }

    let (_, handshake) = Handshake::parse(record.fragment).ok()?;
    if handshake.msg_type != MessageType::ClientHello {
        return None;
    }

    let (_, client_hello) = ClientHello::parse(handshake.body).ok()?;

    Some(ClientHelloPeek {
        record_seq: record.sequence,
        message_seq: handshake.message_seq,
        cookie: client_hello.cookie,
    })
}
