// Persisted peer list

use crate::core::serialize::{
    get_bool, get_format_version, get_string, get_varint, put_bool, put_format_version,
    put_string, put_varint, Serializable,
};
use crate::error::{Error, Result};
use std::io::Cursor;
use std::path::Path;

/// File name of the persisted peer list, relative to the data directory.
pub const PEER_FILE: &str = "peer";

/// Bootstrap peers written on first run.
const SEED_PEERS: &[(&str, &str, bool)] = &[
    ("172.31.36.40:8099", "full", true),
    ("172.31.36.29:8099", "full", true),
    ("172.31.36.31:8099", "full", false),
    ("172.31.36.30:8099", "full", false),
];

/// A known peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub address: String,
    pub node_type: String,
    pub mining: bool,
}

/// The peer book: seeded bootstrap peers plus peers learned from
/// inbound node announcements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peers {
    list: Vec<Peer>,
}

impl Peers {
    /// Load the peer book; on first run, seed it and write it out.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let peers = Self::seed();
            peers.save(path)?;
            return Ok(peers);
        }

        let content = std::fs::read(path)?;
        let peers = Self::deserialize(&content)
            .map_err(|e| Error::CorruptStore(format!("peer file {}: {}", path.display(), e)))?;
        log::info!("loaded {} peer(s)", peers.list.len());
        Ok(peers)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.serialize())?;
        Ok(())
    }

    fn seed() -> Self {
        let list = SEED_PEERS
            .iter()
            .map(|(address, node_type, mining)| Peer {
                address: address.to_string(),
                node_type: node_type.to_string(),
                mining: *mining,
            })
            .collect();
        Self { list }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.list.iter().any(|peer| peer.address == address)
    }

    pub fn add(&mut self, peer: Peer) {
        if !self.contains(&peer.address) {
            self.list.push(peer);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.list.iter()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.list.iter().map(|peer| peer.address.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl Serializable for Peers {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_format_version(&mut buf);
        put_varint(&mut buf, self.list.len() as u64);
        for peer in &self.list {
            put_string(&mut buf, &peer.address);
            put_string(&mut buf, &peer.node_type);
            put_bool(&mut buf, peer.mining);
        }
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        get_format_version(&mut cursor)?;

        let count = get_varint(&mut cursor)? as usize;
        let mut list = Vec::with_capacity(count);
        for _ in 0..count {
            list.push(Peer {
                address: get_string(&mut cursor)?,
                node_type: get_string(&mut cursor)?,
                mining: get_bool(&mut cursor)?,
            });
        }

        Ok(Self { list })
    }
}
