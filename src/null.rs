//! A record layer without cryptography.
//!
//! Runs the message exchange of a PSK-resumed handshake (with optional
//! 0-RTT) or a full handshake, but protects nothing. Records carry a
//! one-byte check so tampering in tests is caught by `open`.

use crate::buffer::Buf;
use crate::message::{Message, MessageType};
use crate::record_layer::{Advance, RecordError, RecordLayer};
use crate::state::Role;
use crate::State;

const OFFER_EARLY_DATA: u8 = 1;
const FULL_HANDSHAKE: u8 = 0;

/// Alert description sent for out-of-order handshake input.
const UNEXPECTED_MESSAGE: u8 = 10;

#[derive(Debug)]
pub struct NullRecordLayer {
    role: Role,
    psk: bool,
    fail_with: Option<u8>,
    early_keys: bool,
    app_keys: bool,
}

impl NullRecordLayer {
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    fn new(role: Role) -> Self {
        NullRecordLayer {
            role,
            psk: false,
            fail_with: None,
            early_keys: false,
            app_keys: false,
        }
    }

    /// Resume with a pre-shared key: the client offers 0-RTT and the server
    /// accepts it.
    pub fn with_psk(mut self, psk: bool) -> Self {
        self.psk = psk;
        self
    }

    /// Fail the next handshake step with alert `code`.
    pub fn failing(mut self, code: u8) -> Self {
        self.fail_with = Some(code);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn client_advance(
        &mut self,
        state: State,
        inbound: Option<&[Message]>,
    ) -> Result<Advance, RecordError> {
        match (state, inbound) {
            (State::Idle, None) => {
                let offer = if self.psk {
                    OFFER_EARLY_DATA
                } else {
                    FULL_HANDSHAKE
                };
                self.early_keys = self.psk;

                let after_cookie = if self.psk {
                    State::AcceptingEarlyData
                } else {
                    State::CompletingHandshake
                };

                Ok(Advance::to(after_cookie)
                    .with_flight(vec![Message::new(MessageType::ClientHello, &[offer])]))
            }

            (State::AcceptingEarlyData | State::CompletingHandshake, Some(flight)) => {
                let server_hello = flight
                    .iter()
                    .find(|m| m.msg_type == MessageType::ServerHello)
                    .ok_or(RecordError::Fatal {
                        code: UNEXPECTED_MESSAGE,
                    })?;

                let early_accepted = server_hello.body.first() == Some(&OFFER_EARLY_DATA);

                let mut ours = Vec::with_capacity(2);
                if state == State::AcceptingEarlyData && early_accepted {
                    ours.push(Message::new(MessageType::EndOfEarlyData, &[]));
                }
                ours.push(Message::new(MessageType::Finished, b"client finished"));

                self.early_keys = false;
                self.app_keys = true;

                Ok(Advance::to(State::Established).with_flight(ours))
            }

            _ => Err(RecordError::Fatal {
                code: UNEXPECTED_MESSAGE,
            }),
        }
    }

    fn server_advance(
        &mut self,
        state: State,
        inbound: Option<&[Message]>,
    ) -> Result<Advance, RecordError> {
        let Some(flight) = inbound else {
            return Err(RecordError::WantRead);
        };

        match state {
            State::Idle | State::AwaitingCookieEcho => {
                let client_hello = flight
                    .iter()
                    .find(|m| m.msg_type == MessageType::ClientHello)
                    .ok_or(RecordError::Fatal {
                        code: UNEXPECTED_MESSAGE,
                    })?;

                let offered = client_hello.body.first() == Some(&OFFER_EARLY_DATA);
                let accept_early = offered && self.psk;

                self.early_keys = accept_early;
                self.app_keys = true;

                if accept_early {
                    Ok(Advance::to(State::AcceptingEarlyData).with_flight(vec![
                        Message::new(MessageType::ServerHello, &[OFFER_EARLY_DATA]),
                        Message::new(MessageType::EncryptedExtensions, &[]),
                        Message::new(MessageType::Finished, b"server finished"),
                    ]))
                } else {
                    Ok(Advance::to(State::CompletingHandshake).with_flight(vec![
                        Message::new(MessageType::ServerHello, &[FULL_HANDSHAKE]),
                        Message::new(MessageType::EncryptedExtensions, &[]),
                        Message::new(MessageType::Certificate, &[0; 64]),
                        Message::new(MessageType::CertificateVerify, &[0; 64]),
                        Message::new(MessageType::Finished, b"server finished"),
                    ]))
                }
            }

            State::AcceptingEarlyData | State::CompletingHandshake => {
                let finished = flight
                    .last()
                    .map(|m| m.msg_type == MessageType::Finished)
                    .unwrap_or(false);

                if !finished {
                    return Err(RecordError::Fatal {
                        code: UNEXPECTED_MESSAGE,
                    });
                }

                self.early_keys = false;
                Ok(Advance::to(State::Established))
            }

            _ => Err(RecordError::Fatal {
                code: UNEXPECTED_MESSAGE,
            }),
        }
    }

    fn has_keys(&self, epoch: u16) -> bool {
        match epoch {
            crate::message::EPOCH_EARLY_DATA => self.early_keys,
            crate::message::EPOCH_APPLICATION => self.app_keys,
            _ => false,
        }
    }
}

fn check_byte(epoch: u16, seq: u64, data: &[u8]) -> u8 {
    data.iter()
        .fold((epoch as u8) ^ (seq as u8), |acc, b| acc.wrapping_add(*b))
}

impl RecordLayer for NullRecordLayer {
    fn advance_handshake(
        &mut self,
        state: State,
        inbound: Option<&[Message]>,
    ) -> Result<Advance, RecordError> {
        if let Some(code) = self.fail_with.take() {
            return Err(RecordError::Fatal { code });
        }

        match self.role {
            Role::Client => self.client_advance(state, inbound),
            Role::Server => self.server_advance(state, inbound),
        }
    }

    fn seal(
        &mut self,
        epoch: u16,
        seq: u64,
        plaintext: &[u8],
        out: &mut Buf,
    ) -> Result<(), RecordError> {
        if !self.has_keys(epoch) {
            return Err(RecordError::WantRead);
        }
        out.extend_from_slice(plaintext);
        out.push(check_byte(epoch, seq, plaintext));
        Ok(())
    }

    fn open(
        &mut self,
        epoch: u16,
        seq: u64,
        ciphertext: &[u8],
        out: &mut Buf,
    ) -> Result<(), RecordError> {
        if !self.has_keys(epoch) {
            return Err(RecordError::WantRead);
        }
        let Some((check, plaintext)) = ciphertext.split_last() else {
            return Err(RecordError::BadRecord);
        };
        if *check != check_byte(epoch, seq, plaintext) {
            return Err(RecordError::BadRecord);
        }
        out.extend_from_slice(plaintext);
        Ok(())
    }
}
