//! Early data server.
//!
//! Accepts DTLS sessions on one UDP socket, prints any 0-RTT data and
//! answers it with a provisional (0.5-RTT) reply before the handshake
//! completes, then answers post-handshake data with a normal reply.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use dtls_flight::{
    Config, CookieStore, Listener, ListenerOutput, NullRecordLayer, Transport, UdpTransport,
};

const EARLY_DATA_QUICK_REPLY: &[u8] = b"0.5-RTT data hello from early data DTLS server!";
const EARLY_DATA_REPLY: &[u8] = b"Normal data hello from early data DTLS server!";

#[derive(Parser)]
#[command(name = "server-dtls13-earlydata", version, about = "DTLS early data server demo")]
struct Cli {
    // Bind address
    #[arg(long, default_value = "0.0.0.0:11111")]
    bind: String,

    // Refuse 0-RTT and always run the full handshake
    #[arg(long, default_value_t = false)]
    no_early_data: bool,

    // Exit after the first session ends
    #[arg(long, default_value_t = false)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Arc::new(
        Config::builder()
            .early_data_enabled(!cli.no_early_data)
            .build()?,
    );

    let now = Instant::now();
    let cookies = Arc::new(CookieStore::new(&config, now));

    let mut transport = UdpTransport::bind(&cli.bind)
        .with_context(|| format!("failed to bind {}", cli.bind))?;

    println!("Listening on {}", transport.local_addr()?);

    let mut listener = Listener::new(config, cookies, |_peer| {
        NullRecordLayer::server().with_psk(true)
    });

    let mut buf = vec![0u8; 65_535];
    let mut next_timeout = now;

    loop {
        let now = Instant::now();

        let mut idle = true;
        while let Some((datagram, peer)) = transport.recv_nonblocking()? {
            idle = false;
            listener.handle_datagram(&datagram, peer, now);
            answer_early_data(&mut listener, peer);
        }

        if now >= next_timeout {
            listener.handle_timeout(now);
        }

        loop {
            match listener.poll_output(&mut buf) {
                ListenerOutput::Packet(to, p) => {
                    transport.send(p, to)?;
                }
                ListenerOutput::Connected(peer) => {
                    println!("Handshake complete with {}", peer);
                    answer_early_data(&mut listener, peer);
                }
                ListenerOutput::ApplicationData(peer, data) => {
                    println!(
                        "Received post-handshake data: \"{}\"",
                        String::from_utf8_lossy(data)
                    );
                    if let Err(e) = listener.send_application_data(peer, EARLY_DATA_REPLY) {
                        eprintln!("Reply to {} failed: {}", peer, e);
                    } else {
                        println!("Sent reply to client.");
                    }
                }
                ListenerOutput::Closed(peer, failure) => {
                    match failure {
                        Some(f) => println!("Session {} failed: {}", peer, f),
                        None => println!("Session {} closed", peer),
                    }
                    if cli.once {
                        // Flush whatever the close produced.
                        while let ListenerOutput::Packet(to, p) = listener.poll_output(&mut buf) {
                            transport.send(p, to)?;
                        }
                        return Ok(());
                    }
                }
                ListenerOutput::Timeout(t) => {
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

fn answer_early_data<F>(listener: &mut Listener<NullRecordLayer, F>, peer: SocketAddr)
where
    F: FnMut(SocketAddr) -> NullRecordLayer,
{
    let Some(session) = listener.session_mut(peer) else {
        return;
    };

    while let (Some(data), _) = session.read_early_data() {
        println!("Received early data: \"{}\"", String::from_utf8_lossy(&data));

        match session.send_application_data(EARLY_DATA_QUICK_REPLY) {
            Ok(()) => println!("Sent 0.5 data reply to client."),
            Err(e) => eprintln!("0.5-RTT reply failed: {}", e),
        }
    }
}
