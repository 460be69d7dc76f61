// Wire protocol messages
//
// Every frame is a command name padded with NUL bytes to a fixed length,
// immediately followed by the encoded payload. A connection carries
// exactly one frame; the receiver reads to EOF and splits the prefix.

use crate::core::serialize::{
    get_array, get_bool, get_bytes, get_format_version, get_string, get_u64, get_varint, put_bool,
    put_bytes, put_format_version, put_string, put_u64, put_varint,
};
use crate::core::Hash256;
use crate::error::{Error, Result};
use std::io::{Cursor, Read};

/// Fixed size of the command prefix. `getHigherBlockHashes` fills it
/// exactly.
pub const COMMAND_LENGTH: usize = 20;

/// Protocol version; nodes ignore handshakes from other versions.
pub const NODE_VERSION: &str = "0.0.1";

const CMD_NODE: &str = "node";
const CMD_GET_HIGHER_BLOCK_HASHES: &str = "getHigherBlockHashes";
const CMD_INV: &str = "Inv";
const CMD_GET_DATA: &str = "getData";
const CMD_BLOCK_DATA: &str = "blockData";
const CMD_TX_DATA: &str = "txData";

/// A node's self-description, sent with every message so the receiver
/// knows where to reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub version: String,
    pub node_type: String,
    pub mining: bool,
    pub best_height: u64,
    pub address: String,
}

/// What an `Inv` advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvKind {
    HigherBlockHashes,
    Tx,
}

impl InvKind {
    fn tag(self) -> &'static str {
        match self {
            InvKind::HigherBlockHashes => "higherBlockHashes",
            InvKind::Tx => "tx",
        }
    }

    fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "higherBlockHashes" => Ok(InvKind::HigherBlockHashes),
            "tx" => Ok(InvKind::Tx),
            other => Err(Error::Decode(format!("unknown inventory kind: {}", other))),
        }
    }
}

/// What a `getData` requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Block,
    Tx,
}

impl DataKind {
    fn tag(self) -> &'static str {
        match self {
            DataKind::Block => "block",
            DataKind::Tx => "tx",
        }
    }

    fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "block" => Ok(DataKind::Block),
            "tx" => Ok(DataKind::Tx),
            other => Err(Error::Decode(format!("unknown data kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvPayload {
    pub node: NodeRecord,
    pub kind: InvKind,
    pub items: Vec<Hash256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub node: NodeRecord,
    pub kind: DataKind,
    pub hash: Hash256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPayload {
    pub node: NodeRecord,
    /// Serialized block
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPayload {
    pub node: NodeRecord,
    /// Serialized transaction
    pub transaction: Vec<u8>,
}

/// The six protocol messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake / height comparison
    Node(NodeRecord),
    /// "Send me the hashes above my best height"
    GetHigherBlockHashes(NodeRecord),
    /// Inventory advertisement
    Inv(InvPayload),
    /// Request for one object by hash
    GetData(DataRequest),
    /// One serialized block
    BlockData(BlockPayload),
    /// One serialized transaction
    TxData(TxPayload),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Node(_) => CMD_NODE,
            Message::GetHigherBlockHashes(_) => CMD_GET_HIGHER_BLOCK_HASHES,
            Message::Inv(_) => CMD_INV,
            Message::GetData(_) => CMD_GET_DATA,
            Message::BlockData(_) => CMD_BLOCK_DATA,
            Message::TxData(_) => CMD_TX_DATA,
        }
    }

    /// Full frame: NUL-padded command followed by the payload bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = command_to_bytes(self.command()).to_vec();

        let mut payload = Vec::new();
        put_format_version(&mut payload);
        match self {
            Message::Node(node) | Message::GetHigherBlockHashes(node) => {
                put_node(&mut payload, node);
            }
            Message::Inv(inv) => {
                put_node(&mut payload, &inv.node);
                put_string(&mut payload, inv.kind.tag());
                put_varint(&mut payload, inv.items.len() as u64);
                for item in &inv.items {
                    payload.extend_from_slice(item.as_bytes());
                }
            }
            Message::GetData(request) => {
                put_node(&mut payload, &request.node);
                put_string(&mut payload, request.kind.tag());
                payload.extend_from_slice(request.hash.as_bytes());
            }
            Message::BlockData(data) => {
                put_node(&mut payload, &data.node);
                put_bytes(&mut payload, &data.block);
            }
            Message::TxData(data) => {
                put_node(&mut payload, &data.node);
                put_bytes(&mut payload, &data.transaction);
            }
        }

        frame.extend_from_slice(&payload);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Message> {
        if frame.len() < COMMAND_LENGTH {
            return Err(Error::Decode(format!("frame too short: {} bytes", frame.len())));
        }
        let command = bytes_to_command(&frame[..COMMAND_LENGTH])?;

        let mut reader = Cursor::new(&frame[COMMAND_LENGTH..]);
        get_format_version(&mut reader)?;

        match command.as_str() {
            CMD_NODE => Ok(Message::Node(get_node(&mut reader)?)),
            CMD_GET_HIGHER_BLOCK_HASHES => {
                Ok(Message::GetHigherBlockHashes(get_node(&mut reader)?))
            }
            CMD_INV => {
                let node = get_node(&mut reader)?;
                let kind = InvKind::from_tag(&get_string(&mut reader)?)?;
                let count = get_varint(&mut reader)? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(Hash256::new(get_array(&mut reader)?));
                }
                Ok(Message::Inv(InvPayload { node, kind, items }))
            }
            CMD_GET_DATA => {
                let node = get_node(&mut reader)?;
                let kind = DataKind::from_tag(&get_string(&mut reader)?)?;
                let hash = Hash256::new(get_array(&mut reader)?);
                Ok(Message::GetData(DataRequest { node, kind, hash }))
            }
            CMD_BLOCK_DATA => {
                let node = get_node(&mut reader)?;
                let block = get_bytes(&mut reader)?;
                Ok(Message::BlockData(BlockPayload { node, block }))
            }
            CMD_TX_DATA => {
                let node = get_node(&mut reader)?;
                let transaction = get_bytes(&mut reader)?;
                Ok(Message::TxData(TxPayload { node, transaction }))
            }
            other => Err(Error::Decode(format!("unknown command: {}", other))),
        }
    }
}

fn put_node(buf: &mut Vec<u8>, node: &NodeRecord) {
    put_string(buf, &node.version);
    put_string(buf, &node.node_type);
    put_bool(buf, node.mining);
    put_u64(buf, node.best_height);
    put_string(buf, &node.address);
}

fn get_node<R: Read + ?Sized>(reader: &mut R) -> Result<NodeRecord> {
    Ok(NodeRecord {
        version: get_string(reader)?,
        node_type: get_string(reader)?,
        mining: get_bool(reader)?,
        best_height: get_u64(reader)?,
        address: get_string(reader)?,
    })
}

fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    bytes[..command.len()].copy_from_slice(command.as_bytes());
    bytes
}

fn bytes_to_command(bytes: &[u8]) -> Result<String> {
    let trimmed: Vec<u8> = bytes.iter().copied().take_while(|b| *b != 0).collect();
    String::from_utf8(trimmed).map_err(|e| Error::Decode(format!("invalid command: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> NodeRecord {
        NodeRecord {
            version: NODE_VERSION.to_string(),
            node_type: "full".to_string(),
            mining: true,
            best_height: 42,
            address: "127.0.0.1:8099".to_string(),
        }
    }

    #[test]
    fn test_command_padding_round_trip() {
        let bytes = command_to_bytes("node");
        assert_eq!(bytes.len(), COMMAND_LENGTH);
        assert_eq!(bytes_to_command(&bytes).unwrap(), "node");

        // the longest command fills the prefix exactly
        assert_eq!(CMD_GET_HIGHER_BLOCK_HASHES.len(), COMMAND_LENGTH);
        let full = command_to_bytes(CMD_GET_HIGHER_BLOCK_HASHES);
        assert_eq!(bytes_to_command(&full).unwrap(), CMD_GET_HIGHER_BLOCK_HASHES);
    }

    #[test]
    fn test_node_message_round_trip() {
        let message = Message::Node(sample_node());
        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(message, decoded);
    }

    #[test]
    fn test_inv_round_trip() {
        let message = Message::Inv(InvPayload {
            node: sample_node(),
            kind: InvKind::HigherBlockHashes,
            items: vec![Hash256::new([1u8; 32]), Hash256::new([2u8; 32])],
        });
        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(message, decoded);
    }

    #[test]
    fn test_get_data_round_trip() {
        let message = Message::GetData(DataRequest {
            node: sample_node(),
            kind: DataKind::Block,
            hash: Hash256::new([7u8; 32]),
        });
        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(message, decoded);
    }

    #[test]
    fn test_payload_messages_round_trip() {
        let block = Message::BlockData(BlockPayload {
            node: sample_node(),
            block: vec![1, 2, 3, 4],
        });
        assert_eq!(Message::decode(&block.encode()).unwrap(), block);

        let tx = Message::TxData(TxPayload {
            node: sample_node(),
            transaction: vec![9, 8, 7],
        });
        assert_eq!(Message::decode(&tx.encode()).unwrap(), tx);
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut frame = vec![0u8; COMMAND_LENGTH];
        frame[..4].copy_from_slice(b"ping");
        frame.push(1);
        assert!(Message::decode(&frame).is_err());
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(Message::decode(b"node").is_err());
    }
}
