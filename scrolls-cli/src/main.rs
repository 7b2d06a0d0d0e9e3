mod cli;

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Args, Command};
use scrolls_crypto::hash::Hash;
use scrolls_engine::catalog::{load_catalog, TYPE_CIP25_PAGES, TYPE_UTXO_DATUM};
use scrolls_engine::indexer::{
    reconstruct_cip25_indexed, reconstruct_inline_indexed, Indexer,
};
use scrolls_engine::reconstruct::{reconstruct, ReconstructedScroll};
use scrolls_engine::registry::{resolve_head, merge_registry_lists, TxIn};
use scrolls_engine::scroll::ScrollDescriptor;
use scrolls_engine::topology::load_topology;
use scrolls_engine::Error;
use scrolls_network::facade::PeerClient;
use scrolls_network::miniprotocols::Point;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::NotFound { what }) => {
            eprintln!("{what}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<(), Error> {
    match &args.command {
        Command::ListScrolls => cmd_list_scrolls(args),
        Command::Tip => cmd_tip(args).await,
        Command::FetchBlock { slot, hash, out } => {
            cmd_fetch_block(args, *slot, hash, out.as_deref()).await
        }
        Command::ReconstructUtxo {
            scroll,
            tx_hash,
            tx_ix,
            block_slot,
            block_hash,
            indexer,
            out,
        } => {
            cmd_reconstruct_utxo(
                args,
                scroll.as_deref(),
                tx_hash.as_deref(),
                *tx_ix,
                *block_slot,
                block_hash.as_deref(),
                *indexer,
                out,
            )
            .await
        }
        Command::ReconstructCip25 {
            scroll,
            policy,
            manifest_asset,
            start_slot,
            start_hash,
            max_blocks,
            indexer,
            out,
        } => {
            cmd_reconstruct_cip25(
                args,
                scroll.as_deref(),
                policy.as_deref(),
                manifest_asset.as_deref(),
                *start_slot,
                start_hash.as_deref(),
                *max_blocks,
                *indexer,
                out,
            )
            .await
        }
        Command::RegistryDump {
            head,
            private_heads,
            out,
        } => cmd_registry_dump(head, private_heads, out.as_deref()).await,
    }
}

async fn connect(args: &Args) -> Result<PeerClient, Error> {
    let magic = args.network_magic();

    if let Some(topology) = &args.topology {
        let endpoints = load_topology(topology)?;
        info!(endpoints = endpoints.len(), "walking topology");
        return PeerClient::connect_any(&endpoints, magic)
            .await
            .map_err(Error::from);
    }

    let relay = args.relay.as_deref().unwrap_or(cli::DEFAULT_RELAY);
    info!(relay, magic, "connecting");

    PeerClient::connect(relay, magic).await.map_err(Error::from)
}

fn parse_point(slot: u64, hash_hex: &str) -> Result<Point, Error> {
    let hash =
        hex::decode(hash_hex).map_err(|_| Error::malformed("point", "hash is not hex"))?;

    if hash.len() != 32 {
        return Err(Error::malformed("point", "hash must be 32 bytes"));
    }

    Ok(Point::Specific(slot, hash))
}

fn cmd_list_scrolls(args: &Args) -> Result<(), Error> {
    let catalog = load_catalog(args.catalog_path())?;

    for entry in &catalog.scrolls {
        println!("{} ({})", entry.id, entry.entry_type);
    }

    Ok(())
}

async fn cmd_tip(args: &Args) -> Result<(), Error> {
    let mut peer = connect(args).await?;

    let (_, tip) = peer.chainsync().find_intersect(vec![]).await?;

    println!(
        "Tip: slot={} hash={} block={}",
        tip.0.slot_or_default(),
        hex::encode(tip.0.hash_or_default()),
        tip.1
    );

    peer.abort().await;

    Ok(())
}

async fn cmd_fetch_block(
    args: &Args,
    slot: u64,
    hash: &str,
    out: Option<&Path>,
) -> Result<(), Error> {
    let point = parse_point(slot, hash)?;

    let mut peer = connect(args).await?;

    let result = peer.blockfetch().fetch_single(point).await;
    peer.abort().await;

    let body = result.map_err(|err| match Error::from(err) {
        Error::NotFound { .. } => Error::not_found("Block not found on relay for this point."),
        other => other,
    })?;

    match out {
        Some(path) => {
            std::fs::write(path, &body)?;
            println!("Wrote {} bytes: {}", body.len(), path.display());
        }
        None => println!("Fetched block: {} bytes", body.len()),
    }

    Ok(())
}

fn report(scroll: &ReconstructedScroll, out: &Path) -> Result<(), Error> {
    std::fs::write(out, &scroll.bytes)?;

    println!("Reconstructed: {}", out.display());
    println!("Content-Type: {}", scroll.content_type);
    println!("Bytes: {}", scroll.bytes.len());
    println!("SHA-256: {}", scroll.sha256);

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_reconstruct_utxo(
    args: &Args,
    scroll: Option<&str>,
    tx_hash: Option<&str>,
    tx_ix: Option<u64>,
    block_slot: Option<u64>,
    block_hash: Option<&str>,
    use_indexer: bool,
    out: &PathBuf,
) -> Result<(), Error> {
    let descriptor = match scroll {
        Some(id) => {
            let catalog = load_catalog(args.catalog_path())?;
            let entry = catalog
                .get(id)
                .ok_or_else(|| Error::not_found(format!("scroll id `{id}` in catalog")))?;

            if entry.entry_type != TYPE_UTXO_DATUM {
                return Err(Error::malformed(
                    "catalog entry",
                    "selected scroll is not an inline-datum scroll",
                ));
            }

            entry.to_descriptor()?
        }
        None => {
            let tx_hash = tx_hash
                .ok_or_else(|| Error::malformed("arguments", "--tx-hash or --scroll required"))?;
            let tx_id = Hash::from_str(tx_hash)
                .map_err(|_| Error::malformed("arguments", "tx hash is not a 32-byte hex hash"))?;

            let point = match (block_slot, block_hash) {
                (Some(slot), Some(hash)) => Some(parse_point(slot, hash)?),
                _ => None,
            };

            ScrollDescriptor::InlineDatum {
                tx_id: Some(tx_id),
                tx_ix: tx_ix.unwrap_or(0),
                point,
                expected_sha256: None,
                content_type: None,
            }
        }
    };

    let (tx_id, tx_ix, mut point, expected_sha256, content_type) = match descriptor {
        ScrollDescriptor::InlineDatum {
            tx_id,
            tx_ix,
            point,
            expected_sha256,
            content_type,
        } => (tx_id, tx_ix, point, expected_sha256, content_type),
        _ => unreachable!("utxo command builds inline descriptors"),
    };

    if use_indexer {
        let tx_hash = tx_id
            .ok_or_else(|| Error::malformed("arguments", "indexer path needs a tx hash"))?
            .to_string();

        let scroll = reconstruct_inline_indexed(
            &Indexer::from_env(),
            &tx_hash,
            tx_ix,
            expected_sha256.as_ref(),
            content_type.as_deref(),
        )
        .await?;

        return report(&scroll, out);
    }

    // the wire protocols cannot look a tx hash up; fill a missing block
    // point through the indexer before going to the relay
    if point.is_none() {
        let tx_hash = tx_id
            .ok_or_else(|| Error::not_found("block point for the transaction"))?
            .to_string();

        info!(%tx_hash, "resolving block point through indexer");
        point = Some(Indexer::from_env().resolve_tx_point(&tx_hash).await?);
    }

    let descriptor = ScrollDescriptor::InlineDatum {
        tx_id,
        tx_ix,
        point,
        expected_sha256,
        content_type,
    };

    let mut peer = connect(args).await?;
    let result = reconstruct(&mut peer, &descriptor).await;
    peer.abort().await;

    report(&result?, out)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_reconstruct_cip25(
    args: &Args,
    scroll: Option<&str>,
    policy: Option<&str>,
    manifest_asset: Option<&str>,
    start_slot: Option<u64>,
    start_hash: Option<&str>,
    max_blocks: usize,
    use_indexer: bool,
    out: &PathBuf,
) -> Result<(), Error> {
    let descriptor = match scroll {
        Some(id) => {
            let catalog = load_catalog(args.catalog_path())?;
            let entry = catalog
                .get(id)
                .ok_or_else(|| Error::not_found(format!("scroll id `{id}` in catalog")))?;

            if entry.entry_type != TYPE_CIP25_PAGES {
                return Err(Error::malformed(
                    "catalog entry",
                    "selected scroll is not a cip-25 pages scroll",
                ));
            }

            entry.to_descriptor()?
        }
        None => {
            let policy = policy
                .ok_or_else(|| Error::malformed("arguments", "--policy or --scroll required"))?;

            let start_point = match (start_slot, start_hash) {
                (Some(slot), Some(hash)) => parse_point(slot, hash)?,
                _ if use_indexer => Point::Origin,
                _ => {
                    return Err(Error::malformed(
                        "arguments",
                        "--start-slot/--start-hash required for a P2P scan",
                    ))
                }
            };

            ScrollDescriptor::Cip25Pages {
                policy_id: policy.to_string(),
                manifest_asset: manifest_asset.map(String::from),
                start_point,
                max_scan_blocks: max_blocks,
                expected_sha256: None,
                content_type: None,
            }
        }
    };

    if use_indexer {
        let (policy_id, manifest_asset, expected_sha256, content_type) = match &descriptor {
            ScrollDescriptor::Cip25Pages {
                policy_id,
                manifest_asset,
                expected_sha256,
                content_type,
                ..
            } => (
                policy_id.clone(),
                manifest_asset.clone(),
                expected_sha256.clone(),
                content_type.clone(),
            ),
            _ => unreachable!("cip25 command builds pages descriptors"),
        };

        let scroll = reconstruct_cip25_indexed(
            &Indexer::from_env(),
            &policy_id,
            manifest_asset.as_deref(),
            expected_sha256.as_ref(),
            content_type.as_deref(),
        )
        .await?;

        return report(&scroll, out);
    }

    let descriptor = match descriptor {
        ScrollDescriptor::Cip25Pages {
            policy_id,
            manifest_asset: descriptor_manifest,
            start_point,
            expected_sha256,
            content_type,
            ..
        } => ScrollDescriptor::Cip25Pages {
            policy_id,
            manifest_asset: descriptor_manifest,
            start_point,
            max_scan_blocks: max_blocks,
            expected_sha256,
            content_type,
        },
        other => other,
    };

    let mut peer = connect(args).await?;
    let result = reconstruct(&mut peer, &descriptor).await;
    peer.abort().await;

    report(&result?, out)
}

async fn cmd_registry_dump(
    head: &str,
    private_heads: &[String],
    out: Option<&Path>,
) -> Result<(), Error> {
    let indexer = Indexer::from_env();

    let head_txin: TxIn = head.parse()?;
    let mut lists = vec![resolve_head(&indexer, &head_txin).await?];

    for private in private_heads {
        let txin: TxIn = private.parse()?;
        lists.push(resolve_head(&indexer, &txin).await?);
    }

    let merged = merge_registry_lists(&lists);

    let document = serde_json::json!({
        "head": { "txin": head },
        "private": private_heads,
        "merged": merged,
    });

    let rendered = serde_json::to_string_pretty(&document)?;

    match out {
        Some(path) => {
            std::fs::write(path, format!("{rendered}\n"))?;
            println!("Wrote: {}", path.display());
        }
        None => println!("{rendered}"),
    }

    Ok(())
}
