// P2P networking

mod mempool;
mod message;
mod node;
mod peer_book;

pub use mempool::Mempool;
pub use message::{
    BlockPayload, DataKind, DataRequest, InvKind, InvPayload, Message, NodeRecord, TxPayload,
    COMMAND_LENGTH, NODE_VERSION,
};
pub use node::{
    broadcast_transaction, client_record, send_message, start_server, NodeContext, LISTEN_PORT,
};
pub use peer_book::{Peer, Peers, PEER_FILE};

/// Best-effort discovery of this machine's LAN address: the local
/// address of a UDP socket "connected" to a public host (no packet is
/// sent). Falls back to loopback.
pub fn internal_ip() -> String {
    let probe = || -> std::io::Result<std::net::IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) => ip.to_string(),
        Err(_) => "127.0.0.1".to_string(),
    }
}
