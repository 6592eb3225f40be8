//! Non-blocking DTLS client.
//!
//! Drives the handshake from a polling loop, optionally sending 0-RTT
//! data, then sends one message and waits for the reply.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;

use dtls_flight::{
    Config, HandshakeCoordinator, NullRecordLayer, Output, State, Transport, UdpTransport,
};

#[derive(Parser)]
#[command(name = "client-dtls-nonblocking", version, about = "Non-blocking DTLS client demo")]
struct Cli {
    // Server address, e.g. 127.0.0.1:11111
    #[arg(long, default_value = "127.0.0.1:11111")]
    connect: String,

    // Message sent once the handshake completes
    #[arg(long, default_value = "Hello from DTLS client")]
    msg: String,

    // Resume with a pre-shared key and send this as 0-RTT early data
    #[arg(long)]
    early_data: Option<String>,

    // Give up after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let server: SocketAddr = cli
        .connect
        .to_socket_addrs()
        .with_context(|| format!("invalid address {}", cli.connect))?
        .next()
        .ok_or_else(|| anyhow!("no address for {}", cli.connect))?;

    let bind = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let mut transport = UdpTransport::bind(bind).context("cannot create a socket")?;

    let config = Arc::new(Config::builder().build()?);
    let record_layer = NullRecordLayer::client().with_psk(cli.early_data.is_some());
    let mut client = HandshakeCoordinator::connect(config, server, record_layer);

    let start = Instant::now();
    let give_up = start + Duration::from_secs(cli.timeout_secs);

    client.start(start)?;

    if let Some(early) = &cli.early_data {
        client.write_early_data(early.as_bytes())?;
        println!("Queued early data: \"{}\"", early);
    }

    let mut buf = vec![0u8; 65_535];
    let mut next_timeout = start;
    let mut sent_msg = false;

    loop {
        let now = Instant::now();
        if now >= give_up {
            bail!("gave up after {}s in {}", cli.timeout_secs, client.state());
        }

        let mut idle = true;
        while let Some((datagram, from)) = transport.recv_nonblocking()? {
            idle = false;
            client.on_datagram(&datagram, from, now)?;
        }

        if now >= next_timeout {
            client.on_timer(now)?;
        }

        loop {
            match client.poll_output(&mut buf) {
                Output::Packet(to, p) => {
                    transport.send(p, to)?;
                }
                Output::Connected => {
                    println!("Handshake complete with {}", server);
                    if !sent_msg {
                        client.send_application_data(cli.msg.as_bytes())?;
                        sent_msg = true;
                    }
                }
                Output::ApplicationData(data) => {
                    let text = String::from_utf8_lossy(data).into_owned();
                    println!("Received: \"{}\"", text);

                    // The 0.5-RTT reply may arrive first; wait for the
                    // answer to our post-handshake message.
                    if sent_msg && client.state() == State::Established && !text.starts_with("0.5") {
                        client.close(Instant::now())?;
                    }
                }
                Output::Closed => {
                    if let Some(failure) = client.failure() {
                        bail!("handshake failed: {}", failure);
                    }
                    // Flush close_notify.
                    while let Output::Packet(to, p) = client.poll_output(&mut buf) {
                        transport.send(p, to)?;
                    }
                    return Ok(());
                }
                Output::Timeout(t) => {
                    next_timeout = t;
                    break;
                }
            }
        }

        if idle {
            thread::sleep(Duration::from_millis(1));
        }
    }
}
