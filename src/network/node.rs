// Node orchestration: listener, message handlers, sync state and miner

use crate::core::{Block, Hash256, Serializable, Transaction};
use crate::error::{Error, Result};
use crate::network::mempool::Mempool;
use crate::network::message::{
    BlockPayload, DataKind, DataRequest, InvKind, InvPayload, Message, NodeRecord, TxPayload,
    NODE_VERSION,
};
use crate::network::peer_book::{Peer, Peers};
use crate::storage::{Blockchain, UtxoSet};
use crate::wallet::{pubkey_hash_from_address, Wallets};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::timeout;

/// Fixed TCP port every node listens on.
pub const LISTEN_PORT: u16 = 8099;

const NODE_TYPE: &str = "full";
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_PARALLEL_DIALS: usize = 4;

/// Process-wide node state, shared by every handler task. The chain
/// mutex is the chain-wide lock: applying a block (existence check,
/// append, UTXO update) and mining both run under its guard.
pub struct NodeContext {
    chain: Mutex<Blockchain>,
    mempool: Mutex<Mempool>,
    /// Block hashes queued for download during sync. Mutated while the
    /// chain lock is held in the block handler.
    blocks_in_transit: Mutex<Vec<Hash256>>,
    peers: Mutex<Peers>,
    peer_file: PathBuf,
    wallet_file: PathBuf,
    /// This node's reachable "ip:port"
    address: String,
    mining: bool,
    miner_address: Option<String>,
}

impl NodeContext {
    pub fn new(
        chain: Blockchain,
        peers: Peers,
        peer_file: PathBuf,
        wallet_file: PathBuf,
        address: String,
        mining: bool,
        miner_address: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            chain: Mutex::new(chain),
            mempool: Mutex::new(Mempool::new()),
            blocks_in_transit: Mutex::new(Vec::new()),
            peers: Mutex::new(peers),
            peer_file,
            wallet_file,
            address,
            mining,
            miner_address,
        })
    }

    fn record_for(&self, chain: &Blockchain) -> Result<NodeRecord> {
        Ok(NodeRecord {
            version: NODE_VERSION.to_string(),
            node_type: NODE_TYPE.to_string(),
            mining: self.mining,
            best_height: chain.get_best_height()?,
            address: self.address.clone(),
        })
    }

    async fn self_record(&self) -> Result<NodeRecord> {
        let chain = self.chain.lock().await;
        self.record_for(&chain)
    }
}

/// Build a node record for a one-shot sender (the CLI) that is not
/// running a listener of its own.
pub fn client_record(chain: &Blockchain, address: String) -> Result<NodeRecord> {
    Ok(NodeRecord {
        version: NODE_VERSION.to_string(),
        node_type: NODE_TYPE.to_string(),
        mining: false,
        best_height: chain.get_best_height()?,
        address,
    })
}

/// Dial `addr`, write one frame and close. Dial failures become
/// `PeerUnreachable`.
pub async fn send_message(addr: &str, message: &Message) -> Result<()> {
    let mut stream = timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::PeerUnreachable(format!("{}: dial timed out", addr)))?
        .map_err(|e| Error::PeerUnreachable(format!("{}: {}", addr, e)))?;

    stream.write_all(&message.encode()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Push a signed transaction to every known peer. Used by `send`
/// without local mining. Fails only if no peer accepted it.
pub async fn broadcast_transaction(
    peers: &Peers,
    record: &NodeRecord,
    tx: &Transaction,
) -> Result<()> {
    let payload = Message::TxData(TxPayload {
        node: record.clone(),
        transaction: tx.serialize(),
    });

    let mut sent = 0;
    for peer in peers.iter() {
        if peer.address == record.address {
            continue;
        }
        match send_message(&peer.address, &payload).await {
            Ok(()) => sent += 1,
            Err(e) => log::warn!("{}", e),
        }
    }

    if sent == 0 {
        return Err(Error::PeerUnreachable(
            "no peer accepted the transaction".to_string(),
        ));
    }
    log::info!("broadcast transaction {} to {} peer(s)", tx.id, sent);
    Ok(())
}

/// Run the node: announce to peers, accept connections, dispatch each
/// to a handler task, and mine if enabled. Returns after Ctrl-C.
pub async fn start_server(ctx: Arc<NodeContext>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    if ctx.mining {
        let miner_ctx = ctx.clone();
        let miner_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            miner_loop(miner_ctx, miner_shutdown).await;
        });
    }

    let listener = TcpListener::bind(("0.0.0.0", LISTEN_PORT)).await?;
    log::info!("listening on 0.0.0.0:{}", LISTEN_PORT);

    announce_to_peers(ctx.clone()).await?;

    let mut shutdown = shutdown_rx;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(ctx, stream).await {
                                log::warn!("connection from {}: {}", remote, e);
                            }
                        });
                    }
                    Err(e) => log::error!("accept failed: {}", e),
                }
            }
        }
    }

    Ok(())
}

/// Send our node record to every known peer, a bounded number of dials
/// at a time.
async fn announce_to_peers(ctx: Arc<NodeContext>) -> Result<()> {
    let record = ctx.self_record().await?;
    let addresses = ctx.peers.lock().await.addresses();
    let semaphore = Arc::new(Semaphore::new(MAX_PARALLEL_DIALS));

    for address in addresses {
        if address == ctx.address {
            continue;
        }
        let semaphore = semaphore.clone();
        let message = Message::Node(record.clone());
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            match send_message(&address, &message).await {
                Ok(()) => log::info!("announced to {}", address),
                Err(e) => log::warn!("{}", e),
            }
        });
    }

    Ok(())
}

/// One connection carries one message: read to EOF under a deadline,
/// decode, dispatch.
async fn handle_connection(ctx: Arc<NodeContext>, mut stream: TcpStream) -> Result<()> {
    let mut frame = Vec::new();
    timeout(READ_TIMEOUT, stream.read_to_end(&mut frame))
        .await
        .map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "read deadline exceeded",
            ))
        })??;
    drop(stream);

    let message = Message::decode(&frame)?;
    log::debug!("received {} command", message.command());

    match message {
        Message::Node(record) => handle_node(ctx, record).await,
        Message::GetHigherBlockHashes(record) => handle_get_higher_block_hashes(ctx, record).await,
        Message::Inv(inv) => handle_inv(ctx, inv).await,
        Message::GetData(request) => handle_get_data(ctx, request).await,
        Message::BlockData(payload) => handle_block_data(ctx, payload).await,
        Message::TxData(payload) => handle_tx_data(ctx, payload).await,
    }
}

/// Handshake: learn the sender, then converge heights. A taller node
/// offers the hashes its peer is missing; a shorter one asks for them.
async fn handle_node(ctx: Arc<NodeContext>, record: NodeRecord) -> Result<()> {
    if record.version != NODE_VERSION {
        log::warn!(
            "ignoring node {} with version {}",
            record.address,
            record.version
        );
        return Ok(());
    }

    {
        let mut peers = ctx.peers.lock().await;
        if !peers.contains(&record.address) {
            peers.add(Peer {
                address: record.address.clone(),
                node_type: record.node_type.clone(),
                mining: record.mining,
            });
            peers.save(&ctx.peer_file)?;
            log::info!("learned new peer {}", record.address);
        }
    }

    let (my_record, hashes) = {
        let chain = ctx.chain.lock().await;
        let my_record = ctx.record_for(&chain)?;
        let hashes = if my_record.best_height > record.best_height {
            chain.get_block_hashes(record.best_height)?
        } else {
            Vec::new()
        };
        (my_record, hashes)
    };

    if my_record.best_height > record.best_height {
        send_message(
            &record.address,
            &Message::Inv(InvPayload {
                node: my_record,
                kind: InvKind::HigherBlockHashes,
                items: hashes,
            }),
        )
        .await
    } else if my_record.best_height < record.best_height {
        send_message(&record.address, &Message::GetHigherBlockHashes(my_record)).await
    } else {
        Ok(())
    }
}

async fn handle_get_higher_block_hashes(ctx: Arc<NodeContext>, record: NodeRecord) -> Result<()> {
    let (my_record, hashes) = {
        let chain = ctx.chain.lock().await;
        (
            ctx.record_for(&chain)?,
            chain.get_block_hashes(record.best_height)?,
        )
    };

    send_message(
        &record.address,
        &Message::Inv(InvPayload {
            node: my_record,
            kind: InvKind::HigherBlockHashes,
            items: hashes,
        }),
    )
    .await
}

async fn handle_inv(ctx: Arc<NodeContext>, inv: InvPayload) -> Result<()> {
    log::debug!("received inventory: {} item(s)", inv.items.len());
    let Some(first) = inv.items.first().copied() else {
        return Ok(());
    };

    match inv.kind {
        InvKind::HigherBlockHashes => {
            {
                let mut transit = ctx.blocks_in_transit.lock().await;
                *transit = inv.items[1..].to_vec();
            }
            let my_record = ctx.self_record().await?;
            send_message(
                &inv.node.address,
                &Message::GetData(DataRequest {
                    node: my_record,
                    kind: DataKind::Block,
                    hash: first,
                }),
            )
            .await
        }
        InvKind::Tx => {
            if ctx.mempool.lock().await.contains(&first.to_hex()) {
                return Ok(());
            }
            let my_record = ctx.self_record().await?;
            send_message(
                &inv.node.address,
                &Message::GetData(DataRequest {
                    node: my_record,
                    kind: DataKind::Tx,
                    hash: first,
                }),
            )
            .await
        }
    }
}

/// Serve a block or mempool transaction by hash; a missing target is
/// silently dropped.
async fn handle_get_data(ctx: Arc<NodeContext>, request: DataRequest) -> Result<()> {
    match request.kind {
        DataKind::Block => {
            let (my_record, block) = {
                let chain = ctx.chain.lock().await;
                match chain.get_block(&request.hash) {
                    Ok(block) => (ctx.record_for(&chain)?, block),
                    Err(Error::BlockNotFound(_)) => {
                        log::debug!("block {} not found, dropping request", request.hash);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            };
            send_message(
                &request.node.address,
                &Message::BlockData(BlockPayload {
                    node: my_record,
                    block: block.serialize(),
                }),
            )
            .await
        }
        DataKind::Tx => {
            let tx_bytes = ctx
                .mempool
                .lock()
                .await
                .get(&request.hash.to_hex())
                .map(|tx| tx.serialize());
            let Some(transaction) = tx_bytes else {
                log::debug!("transaction {} not in mempool, dropping request", request.hash);
                return Ok(());
            };
            let my_record = ctx.self_record().await?;
            send_message(
                &request.node.address,
                &Message::TxData(TxPayload {
                    node: my_record,
                    transaction,
                }),
            )
            .await
        }
    }
}

/// Apply one downloaded block under the chain lock, then either pull
/// the next queued hash or, when the queue drains, rebuild the UTXO
/// index.
async fn handle_block_data(ctx: Arc<NodeContext>, payload: BlockPayload) -> Result<()> {
    let block = Block::deserialize(&payload.block)?;

    let request_next = {
        let chain = ctx.chain.lock().await;
        if chain.has_block(&block.hash)? {
            log::debug!("block {} already exists, dropping", block.hash);
            return Ok(());
        }
        chain.add_block(&block)?;
        log::info!("added block {}", block.hash);

        let mut transit = ctx.blocks_in_transit.lock().await;
        if transit.is_empty() {
            UtxoSet::new(&chain).reindex()?;
            None
        } else {
            let next = transit.remove(0);
            Some((ctx.record_for(&chain)?, next))
        }
    };

    if let Some((my_record, next)) = request_next {
        send_message(
            &payload.node.address,
            &Message::GetData(DataRequest {
                node: my_record,
                kind: DataKind::Block,
                hash: next,
            }),
        )
        .await?;
    }
    Ok(())
}

/// Admit a gossiped transaction to the mempool after verifying it
/// against the chain.
async fn handle_tx_data(ctx: Arc<NodeContext>, payload: TxPayload) -> Result<()> {
    let tx = Transaction::deserialize(&payload.transaction)?;

    {
        let chain = ctx.chain.lock().await;
        if let Err(e) = chain.verify_transaction(&tx) {
            log::warn!("rejecting transaction {}: {}", tx.id, e);
            return Ok(());
        }
    }

    let mut mempool = ctx.mempool.lock().await;
    mempool.insert(tx);
    log::debug!("mempool now holds {} transaction(s)", mempool.len());
    Ok(())
}

/// Tight mining loop: drain the mempool into a candidate block behind a
/// fresh coinbase, seal it, update the UTXO index and gossip. An empty
/// mempool still produces a coinbase-only block.
async fn miner_loop(ctx: Arc<NodeContext>, shutdown: watch::Receiver<bool>) {
    log::info!("mining enabled");
    while !*shutdown.borrow() {
        if let Err(e) = mine_once(&ctx).await {
            log::error!("miner stopped: {}", e);
            break;
        }
    }
}

async fn mine_once(ctx: &Arc<NodeContext>) -> Result<()> {
    let reward_address = match &ctx.miner_address {
        Some(address) => address.clone(),
        None => {
            let mut wallets = Wallets::load(&ctx.wallet_file)?;
            let address = wallets.create_wallet();
            wallets.save(&ctx.wallet_file)?;
            address
        }
    };
    let reward_pubkey_hash = pubkey_hash_from_address(&reward_address)?;

    {
        let chain = ctx.chain.lock().await;

        let mut txs = vec![Transaction::coinbase(reward_pubkey_hash, Vec::new())];
        for tx in ctx.mempool.lock().await.drain() {
            match chain.verify_transaction(&tx) {
                Ok(()) => txs.push(tx),
                Err(e) => log::warn!("dropping invalid transaction {}: {}", tx.id, e),
            }
        }

        let block = chain.mine_block(txs)?;
        UtxoSet::new(&chain).update(&block)?;
    }

    let gossip_ctx = ctx.clone();
    tokio::spawn(async move {
        gossip_new_block(gossip_ctx).await;
    });
    Ok(())
}

/// After sealing a block, send our node record to every peer; the
/// standard handshake makes them pull the new block.
async fn gossip_new_block(ctx: Arc<NodeContext>) {
    let record = match ctx.self_record().await {
        Ok(record) => record,
        Err(e) => {
            log::error!("gossip failed: {}", e);
            return;
        }
    };

    let addresses = ctx.peers.lock().await.addresses();
    for address in addresses {
        if address == ctx.address {
            continue;
        }
        if let Err(e) = send_message(&address, &Message::Node(record.clone())).await {
            log::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ProofOfWork;
    use crate::wallet::{new_utxo_transaction, Wallet};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}", name, std::process::id()))
    }

    fn test_context(name: &str, wallet: &Wallet) -> Arc<NodeContext> {
        let chain = Blockchain::create_temporary(&wallet.address()).unwrap();
        UtxoSet::new(&chain).reindex().unwrap();
        let peer_file = temp_path(&format!("{}-peers", name));
        let _ = std::fs::remove_file(&peer_file);
        let peers = Peers::load(&peer_file).unwrap();
        NodeContext::new(
            chain,
            peers,
            peer_file,
            temp_path(&format!("{}-wallets", name)),
            "127.0.0.1:8099".to_string(),
            false,
            None,
        )
    }

    /// Mine a block extending the context's chain, without storing it.
    async fn external_block(ctx: &Arc<NodeContext>, wallet: &Wallet) -> Block {
        let chain = ctx.chain.lock().await;
        let coinbase = Transaction::coinbase(wallet.pubkey_hash(), Vec::new());
        let mut block = Block::new(1700000000, vec![coinbase], chain.tip().unwrap());
        let (nonce, hash) = ProofOfWork::new(&block).run().unwrap();
        block.nonce = nonce;
        block.hash = hash;
        block
    }

    fn record(address: &str, best_height: u64) -> NodeRecord {
        NodeRecord {
            version: NODE_VERSION.to_string(),
            node_type: NODE_TYPE.to_string(),
            mining: false,
            best_height,
            address: address.to_string(),
        }
    }

    #[tokio::test]
    async fn test_handle_node_learns_new_peer() {
        let wallet = Wallet::new();
        let ctx = test_context("learn-peer", &wallet);

        // equal heights: no reply is attempted
        let incoming = record("10.1.2.3:8099", 0);
        handle_node(ctx.clone(), incoming).await.unwrap();

        assert!(ctx.peers.lock().await.contains("10.1.2.3:8099"));
        let _ = std::fs::remove_file(&ctx.peer_file);
    }

    #[tokio::test]
    async fn test_handle_node_ignores_version_mismatch() {
        let wallet = Wallet::new();
        let ctx = test_context("version-mismatch", &wallet);

        let mut incoming = record("10.9.9.9:8099", 0);
        incoming.version = "9.9.9".to_string();
        handle_node(ctx.clone(), incoming).await.unwrap();

        assert!(!ctx.peers.lock().await.contains("10.9.9.9:8099"));
        let _ = std::fs::remove_file(&ctx.peer_file);
    }

    #[tokio::test]
    async fn test_handle_block_data_applies_and_duplicates_are_dropped() {
        let wallet = Wallet::new();
        let ctx = test_context("block-apply", &wallet);
        let block = external_block(&ctx, &wallet).await;
        let payload = BlockPayload {
            node: record("10.0.0.1:8099", 1),
            block: block.serialize(),
        };

        handle_block_data(ctx.clone(), payload.clone()).await.unwrap();
        {
            let chain = ctx.chain.lock().await;
            assert_eq!(chain.get_best_height().unwrap(), 1);
            assert!(chain.has_block(&block.hash).unwrap());
        }

        // second delivery is a no-op
        handle_block_data(ctx.clone(), payload).await.unwrap();
        assert_eq!(ctx.chain.lock().await.get_best_height().unwrap(), 1);
        let _ = std::fs::remove_file(&ctx.peer_file);
    }

    #[tokio::test]
    async fn test_handle_block_data_reindexes_when_queue_empty() {
        let wallet = Wallet::new();
        let ctx = test_context("block-reindex", &wallet);
        let block = external_block(&ctx, &wallet).await;
        let payload = BlockPayload {
            node: record("10.0.0.1:8099", 1),
            block: block.serialize(),
        };

        handle_block_data(ctx.clone(), payload).await.unwrap();

        // the new coinbase is visible to balance queries
        let chain = ctx.chain.lock().await;
        let total: u64 = UtxoSet::new(&chain)
            .find_utxo(&wallet.pubkey_hash())
            .unwrap()
            .iter()
            .map(|r| r.value)
            .sum();
        assert_eq!(total, 20);
        drop(chain);
        let _ = std::fs::remove_file(&ctx.peer_file);
    }

    #[tokio::test]
    async fn test_handle_tx_data_admits_valid_and_rejects_invalid() {
        let alice = Wallet::new();
        let bob = Wallet::new();
        let ctx = test_context("tx-admit", &alice);

        let tx = {
            let chain = ctx.chain.lock().await;
            new_utxo_transaction(&chain, &alice, &bob.address(), 3).unwrap()
        };
        let id = tx.id.to_hex();

        let payload = TxPayload {
            node: record("10.0.0.1:8099", 0),
            transaction: tx.serialize(),
        };
        handle_tx_data(ctx.clone(), payload).await.unwrap();
        assert!(ctx.mempool.lock().await.contains(&id));

        // a tampered transaction never reaches the mempool
        let mut bad = tx.clone();
        bad.outputs[0].value = 9;
        bad.id = bad.hash();
        let bad_id = bad.id.to_hex();
        let payload = TxPayload {
            node: record("10.0.0.1:8099", 0),
            transaction: bad.serialize(),
        };
        handle_tx_data(ctx.clone(), payload).await.unwrap();
        assert!(!ctx.mempool.lock().await.contains(&bad_id));
        let _ = std::fs::remove_file(&ctx.peer_file);
    }

    #[tokio::test]
    async fn test_handle_inv_with_known_tx_sends_nothing() {
        let wallet = Wallet::new();
        let ctx = test_context("inv-known-tx", &wallet);

        let tx = Transaction::coinbase(wallet.pubkey_hash(), Vec::new());
        let id = tx.id;
        ctx.mempool.lock().await.insert(tx);

        // already in the mempool: handled without dialing anyone
        let inv = InvPayload {
            node: record("10.0.0.1:8099", 0),
            kind: InvKind::Tx,
            items: vec![id],
        };
        handle_inv(ctx.clone(), inv).await.unwrap();
        let _ = std::fs::remove_file(&ctx.peer_file);
    }

    #[tokio::test]
    async fn test_handle_inv_empty_is_noop() {
        let wallet = Wallet::new();
        let ctx = test_context("inv-empty", &wallet);
        let inv = InvPayload {
            node: record("10.0.0.1:8099", 0),
            kind: InvKind::HigherBlockHashes,
            items: Vec::new(),
        };
        handle_inv(ctx.clone(), inv).await.unwrap();
        assert!(ctx.blocks_in_transit.lock().await.is_empty());
        let _ = std::fs::remove_file(&ctx.peer_file);
    }
}
