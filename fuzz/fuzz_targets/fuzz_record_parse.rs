#![no_main]

//! Fuzz target for record and handshake parsing.
//!
//! Record format:
//! - ContentType: 1 byte
//! - ProtocolVersion: 2 bytes (0xFEFD)
//! - Epoch: 2 bytes
//! - Sequence Number: 6 bytes (u48)
//! - Length: 2 bytes
//! - Fragment: variable

use libfuzzer_sys::fuzz_target;

use dtls_flight::message::{
    parse_datagram, peek_client_hello, Alert, ClientHello, Handshake, HelloVerifyRequest,
};

/// Record header length
const HEADER_LEN: usize = 13;
/// Largest fragment a record length can carry
const MAX_FRAGMENT_SIZE: usize = u16::MAX as usize;

fuzz_target!(|data: &[u8]| {
    let _ = parse_datagram(data);
    let _ = peek_client_hello(data);
    let _ = Handshake::parse(data);
    let _ = ClientHello::parse(data);
    let _ = HelloVerifyRequest::parse(data);
    let _ = Alert::parse(data);

    if data.is_empty() {
        return;
    }

    // Same bytes behind a plausible handshake record header.
    let frag_len = data.len().min(MAX_FRAGMENT_SIZE);
    let mut record = Vec::with_capacity(HEADER_LEN + frag_len);
    record.push(22u8); // handshake
    record.extend_from_slice(&[0xFE, 0xFD]);
    record.extend_from_slice(&[0, 0]); // epoch 0
    record.extend_from_slice(&[0, 0, 0, 0, 0, 1]); // sequence 1
    record.extend_from_slice(&(frag_len as u16).to_be_bytes());
    record.extend_from_slice(&data[..frag_len]);

    if let Some(records) = parse_datagram(&record) {
        for r in records {
            if let Ok((_, handshake)) = Handshake::parse(r.fragment) {
                let _ = ClientHello::parse(handshake.body);
            }
        }
    }
    let _ = peek_client_hello(&record);
});
