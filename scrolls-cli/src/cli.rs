use clap::{Parser, Subcommand};
use std::path::PathBuf;

use scrolls_engine::scroll::DEFAULT_MAX_SCAN_BLOCKS;

/// Public registry head maintained by the BEACN pool
pub const PUBLIC_REGISTRY_HEAD: &str =
    "ce86a174e1b35c37dea6898ef16352d447d11833549b1f382db22c5bb6358cab#0";

pub const DEFAULT_RELAY: &str = "relays-new.cardano-mainnet.iohk.io:3001";

pub const DEFAULT_CATALOG: &str = "scrolls.json";

pub const NETWORK_MAGIC_VAR: &str = "CARDANO_NETWORK_MAGIC";

#[derive(Parser, Debug)]
#[command(name = "ledger-scrolls", version, about = "Reconstructs on-chain scrolls straight from relay nodes", long_about = None)]
pub struct Args {
    /// Relay endpoint as host:port
    #[arg(long, global = true)]
    pub relay: Option<String>,

    /// Topology JSON with relay endpoints to rotate through
    #[arg(long, global = true)]
    pub topology: Option<PathBuf>,

    /// Catalog JSON listing known scrolls
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Network magic; defaults to CARDANO_NETWORK_MAGIC or mainnet
    #[arg(long, global = true)]
    pub network_magic: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List catalog entries
    ListScrolls,

    /// Query the relay's current chain tip
    Tip,

    /// Fetch one raw block body by point
    FetchBlock {
        #[arg(long)]
        slot: u64,

        /// Block header hash, 64 hex chars
        #[arg(long)]
        hash: String,

        /// Write the raw cbor here instead of printing a summary
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Reconstruct a scroll held in a transaction output's inline datum
    ReconstructUtxo {
        /// Scroll id from the catalog
        #[arg(long, conflicts_with = "tx_hash")]
        scroll: Option<String>,

        #[arg(long, requires = "tx_ix")]
        tx_hash: Option<String>,

        #[arg(long)]
        tx_ix: Option<u64>,

        #[arg(long, requires = "block_hash")]
        block_slot: Option<u64>,

        #[arg(long)]
        block_hash: Option<String>,

        /// Use the HTTP indexer fallback instead of P2P
        #[arg(long)]
        indexer: bool,

        #[arg(long)]
        out: PathBuf,
    },

    /// Reconstruct a scroll spread over CIP-25 page assets
    ReconstructCip25 {
        /// Scroll id from the catalog
        #[arg(long, conflicts_with = "policy")]
        scroll: Option<String>,

        #[arg(long)]
        policy: Option<String>,

        #[arg(long)]
        manifest_asset: Option<String>,

        #[arg(long, requires = "start_hash")]
        start_slot: Option<u64>,

        #[arg(long)]
        start_hash: Option<String>,

        #[arg(long, default_value_t = DEFAULT_MAX_SCAN_BLOCKS)]
        max_blocks: usize,

        /// Use the HTTP indexer fallback instead of P2P
        #[arg(long)]
        indexer: bool,

        #[arg(long)]
        out: PathBuf,
    },

    /// Fetch the registry head and list, merging optional private heads
    RegistryDump {
        /// Head txin as <txHash>#<txIx>
        #[arg(long, default_value = PUBLIC_REGISTRY_HEAD)]
        head: String,

        /// Additional head txin(s); later heads override earlier entries
        #[arg(long = "private-head")]
        private_heads: Vec<String>,

        /// Write the merged registry JSON here
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

impl Args {
    pub fn network_magic(&self) -> u64 {
        self.network_magic
            .or_else(|| {
                std::env::var(NETWORK_MAGIC_VAR)
                    .ok()
                    .and_then(|value| value.parse().ok())
            })
            .unwrap_or(scrolls_network::miniprotocols::MAINNET_MAGIC)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG))
    }
}
