// CLI commands

use crate::consensus::ProofOfWork;
use crate::core::Transaction;
use crate::error::{Error, Result};
use crate::network::{
    broadcast_transaction, client_record, internal_ip, start_server, NodeContext, Peers,
    LISTEN_PORT, PEER_FILE,
};
use crate::storage::{Blockchain, UtxoSet};
use crate::wallet::{
    new_utxo_transaction, pubkey_hash_from_address, validate_address, Wallets, WALLET_FILE,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minicoin")]
#[command(about = "Educational peer-to-peer cryptocurrency node", long_about = None)]
pub struct Cli {
    /// Directory holding the chain store, wallet file and peer file
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "lower")]
pub enum Commands {
    /// Generate a new wallet and print its address
    CreateWallet,

    /// Print every known address, one per line
    ListAddresses,

    /// Print the balance of an address
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Initialise the chain with a genesis coinbase to an address
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Build, sign and submit a payment
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the transaction locally instead of gossiping it
        #[arg(long)]
        mine: bool,
    },

    /// Walk the chain from tip to genesis and print every block
    PrintChain,

    /// Rebuild the UTXO index from the chain
    ReindexUtxo,

    /// Start the P2P node
    StartNode {
        /// Enable mining and direct rewards to this address
        #[arg(long)]
        miner: Option<String>,
    },
}

/// Executes CLI commands against the files under the data directory.
pub struct CliHandler {
    data_dir: PathBuf,
}

impl CliHandler {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn chain_dir(&self) -> PathBuf {
        self.data_dir.join("chain")
    }

    fn wallet_file(&self) -> PathBuf {
        self.data_dir.join(WALLET_FILE)
    }

    fn peer_file(&self) -> PathBuf {
        self.data_dir.join(PEER_FILE)
    }

    pub fn handle(&self, command: Commands) -> Result<()> {
        match command {
            Commands::CreateWallet => self.create_wallet(),
            Commands::ListAddresses => self.list_addresses(),
            Commands::GetBalance { address } => self.get_balance(&address),
            Commands::CreateBlockchain { address } => self.create_blockchain(&address),
            Commands::Send {
                from,
                to,
                amount,
                mine,
            } => self.send(&from, &to, amount, mine),
            Commands::PrintChain => self.print_chain(),
            Commands::ReindexUtxo => self.reindex_utxo(),
            Commands::StartNode { miner } => self.start_node(miner),
        }
    }

    fn create_wallet(&self) -> Result<()> {
        let mut wallets = Wallets::load(&self.wallet_file())?;
        let address = wallets.create_wallet();
        wallets.save(&self.wallet_file())?;
        println!("{}", address);
        Ok(())
    }

    fn list_addresses(&self) -> Result<()> {
        let wallets = Wallets::load(&self.wallet_file())?;
        if wallets.is_empty() {
            return Err(Error::WalletNotFound(
                "no wallets yet, create one first".to_string(),
            ));
        }
        for address in wallets.addresses() {
            println!("{}", address);
        }
        Ok(())
    }

    fn get_balance(&self, address: &str) -> Result<()> {
        let pubkey_hash = pubkey_hash_from_address(address)?;
        let chain = Blockchain::open(self.chain_dir())?;

        let balance: u64 = UtxoSet::new(&chain)
            .find_utxo(&pubkey_hash)?
            .iter()
            .map(|record| record.value)
            .sum();

        println!("Balance of '{}': {}", address, balance);
        Ok(())
    }

    fn create_blockchain(&self, address: &str) -> Result<()> {
        if !validate_address(address) {
            return Err(Error::InvalidAddress(address.to_string()));
        }

        let chain = Blockchain::create(self.chain_dir(), address)?;
        UtxoSet::new(&chain).reindex()?;
        println!("Done!");
        Ok(())
    }

    fn send(&self, from: &str, to: &str, amount: u64, mine: bool) -> Result<()> {
        if !validate_address(from) {
            return Err(Error::InvalidAddress(from.to_string()));
        }
        if !validate_address(to) {
            return Err(Error::InvalidAddress(to.to_string()));
        }

        let chain = Blockchain::open(self.chain_dir())?;
        let wallets = Wallets::load(&self.wallet_file())?;
        let wallet = wallets
            .get_wallet(from)
            .ok_or_else(|| Error::WalletNotFound(from.to_string()))?;

        let tx = new_utxo_transaction(&chain, wallet, to, amount)?;

        if mine {
            let coinbase = Transaction::coinbase(wallet.pubkey_hash(), Vec::new());
            let block = chain.mine_block(vec![coinbase, tx])?;
            UtxoSet::new(&chain).update(&block)?;
        } else {
            let peers = Peers::load(&self.peer_file())?;
            let record = client_record(&chain, format!("{}:{}", internal_ip(), LISTEN_PORT))?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(broadcast_transaction(&peers, &record, &tx))?;
        }

        println!("Success!");
        Ok(())
    }

    fn print_chain(&self) -> Result<()> {
        let chain = Blockchain::open(self.chain_dir())?;
        for block in chain.iter()? {
            let block = block?;
            println!("============ Block {} ============", block.hash);
            println!("Prev. block: {}", block.prev_block_hash);
            println!("PoW: {}", ProofOfWork::new(&block).validate());
            for tx in &block.transactions {
                println!("{}", tx);
            }
            println!();
        }
        Ok(())
    }

    fn reindex_utxo(&self) -> Result<()> {
        let chain = Blockchain::open(self.chain_dir())?;
        let utxo_set = UtxoSet::new(&chain);
        utxo_set.reindex()?;

        let count = utxo_set.count_transactions()?;
        println!("Done! There are {} transactions in the UTXO set.", count);
        Ok(())
    }

    fn start_node(&self, miner: Option<String>) -> Result<()> {
        if let Some(address) = &miner {
            if !validate_address(address) {
                return Err(Error::InvalidAddress(address.clone()));
            }
            println!("Mining is on. Address to receive rewards: {}", address);
        }

        // Bootstrap a chain on first start when a reward address is
        // configured; otherwise an existing chain is required.
        let chain = match Blockchain::open(self.chain_dir()) {
            Ok(chain) => chain,
            Err(Error::ChainNotFound) => {
                let Some(address) = &miner else {
                    return Err(Error::ChainNotFound);
                };
                let chain = Blockchain::create(self.chain_dir(), address)?;
                UtxoSet::new(&chain).reindex()?;
                chain
            }
            Err(e) => return Err(e),
        };

        let peers = Peers::load(&self.peer_file())?;
        let address = format!("{}:{}", internal_ip(), LISTEN_PORT);
        println!("Starting node at {}", address);

        let mining = miner.is_some();
        let ctx = NodeContext::new(
            chain,
            peers,
            self.peer_file(),
            self.wallet_file(),
            address,
            mining,
            miner,
        );

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(start_server(ctx))
    }
}
