mod handshake;
mod listener;
mod retransmit;
