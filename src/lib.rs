//! dtls-flight
//!
//! A sans-IO DTLS handshake coordinator. It owns the parts of a DTLS
//! handshake that are about an unreliable network rather than about
//! cryptography:
//!
//! * Stateless cookie exchange (HelloVerifyRequest) so that a server
//!   commits nothing to a peer until it has proven its address.
//! * Flight retransmission with exponential backoff and a retry ceiling.
//! * 0-RTT early data, bounded and replay-protected, and the server's
//!   provisional 0.5-RTT reply.
//!
//! Everything cryptographic is delegated to a [`RecordLayer`].
//! [`NullRecordLayer`] runs the message exchange without protecting
//! anything and is what the tests and demo binaries use.
//!
//! # Driving a session
//!
//! The caller owns the socket and the clock:
//!
//! 1. Feed datagrams to [`HandshakeCoordinator::on_datagram`].
//! 2. Call [`HandshakeCoordinator::on_timer`] when the deadline from the
//!    last [`Output::Timeout`] passes.
//! 3. Drain [`HandshakeCoordinator::poll_output`] until it returns
//!    [`Output::Timeout`].
//!
//! A server with many peers on one socket uses a [`Listener`].
//!
//! # Configuration
//!
//! [`Config`] is built once, validated, and shared as `Arc<Config>`. The
//! [`CookieStore`] is shared as `Arc<CookieStore>` and is the only state
//! shared between sessions; sessions themselves can live on different
//! threads.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

use std::net::SocketAddr;
use std::time::Instant;

mod buffer;
mod config;
mod cookie;
mod coordinator;
mod early;
mod error;
mod flight;
mod listener;
pub mod message;
mod null;
mod queue;
mod record_layer;
mod rng;
mod state;
mod time_tricks;
mod timer;
mod transport;
mod util;
mod window;

pub use buffer::Buf;
pub use config::{Config, ConfigBuilder};
pub use cookie::{Cookie, CookieStore, COOKIE_LEN};
pub use coordinator::HandshakeCoordinator;
pub use early::{CapacityExceeded, EarlyDataBuffer, EarlyDataRecord};
pub use error::{Error, Failure, FailureKind};
pub use listener::{Listener, ListenerOutput};
pub use null::NullRecordLayer;
pub use record_layer::{Advance, RecordError, RecordLayer};
pub use state::{Role, State};
pub use timer::{Poll, Timer};
pub use transport::{Transport, UdpTransport};
pub use window::{ReplayWindow, Verdict};

/// Output from [`HandshakeCoordinator::poll_output`].
#[derive(Debug)]
pub enum Output<'a> {
    /// A datagram to send to the given peer.
    Packet(SocketAddr, &'a [u8]),
    /// The handshake completed.
    Connected,
    /// Application data received from the peer.
    ApplicationData(&'a [u8]),
    /// The session ended. See [`HandshakeCoordinator::failure`] for why.
    Closed,
    /// Nothing more to do until this instant.
    Timeout(Instant),
}
