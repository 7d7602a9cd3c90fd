use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use basefee_recorder::{
    legacy::import_legacy_file,
    node::{BlockSource, NodeClient},
    predict::{percentile_fee, Predictor},
    retry::RetryPolicy,
    rpc::BlockTag,
    store::FeeStore,
    walk::{WalkConfig, Walker},
};
use basefee_types::units::to_gwei_pretty;
use clap::Parser;
use cli::{AppArgs, Command, NodeArgs, PredictArgs, WalkArgs};
use log::info;

mod cli;

/// Records the base fee of Ethereum blocks to a local file.
///
/// A walk visits block numbers in one direction from a start block, skipping
/// blocks already in the file, so an interrupted walk can simply be started again.
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = AppArgs::parse();
    match args.command {
        Command::Walk(walk) => run_walk(&args.file, walk).await,
        Command::Status => print_status(&args.file),
        Command::Predict(predict) => print_prediction(&args.file, predict),
        Command::Import { from } => {
            let mut store = FeeStore::open(&args.file)?;
            let count = import_legacy_file(&mut store, &from)?;
            println!("Imported {count} records, {} held", store.len());
            Ok(())
        }
        Command::Latest(node) => print_latest(node).await,
    }
}

async fn run_walk(file: &str, args: WalkArgs) -> Result<()> {
    let node = NodeClient::new(args.node.node.clone());
    let mut store = FeeStore::open(file)?;
    info!(
        "Loaded {} records from {}, using node {}",
        store.len(),
        file,
        node.url()
    );

    let config = WalkConfig {
        start: args.start,
        direction: args.direction.into(),
        stop: args.stop,
        retry: match args.no_retry {
            true => None,
            false => Some(RetryPolicy {
                backoff: Duration::from_secs(args.retry_secs),
                max_attempts: args.max_attempts,
            }),
        },
        flush_every: args.flush_every,
        request_delay: Duration::from_millis(args.delay_ms),
        head_poll: Duration::from_secs(args.poll_secs),
        follow: args.follow,
    };

    // Set up Ctrl+C signal handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let s = shutdown.clone();
    ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
    })?;

    let mut walker = Walker::new(&node, &mut store, config).with_shutdown(shutdown);
    if let Some(every) = args.predict_every {
        walker = walker.with_predictor(Predictor::new(every, args.window, args.percentile)?);
    }
    let report = walker.run().await?;
    println!("{report}");
    Ok(())
}

fn print_status(file: &str) -> Result<()> {
    let store = FeeStore::open(file)?;
    let (Some(earliest), Some(latest)) = (store.earliest(), store.latest()) else {
        println!("{file}: no blocks recorded");
        return Ok(());
    };
    println!(
        "{file}: {} blocks recorded from {earliest} to {latest}, {} missing in that range",
        store.len(),
        store.missing_in(earliest..=latest)
    );
    Ok(())
}

fn print_prediction(file: &str, args: PredictArgs) -> Result<()> {
    let store = FeeStore::open(file)?;
    let Some(end) = args.end.or(store.latest()) else {
        bail!("{file} has no blocks to predict from");
    };
    let start = args
        .start
        .unwrap_or_else(|| end.saturating_sub(args.window.max(1) - 1));
    match percentile_fee(&store, start, end, args.percentile)? {
        Some(fee) => println!(
            "Blocks {start}..={end} percentile {}: {} gwei",
            args.percentile,
            to_gwei_pretty(fee)?
        ),
        None => bail!("No blocks recorded between {start} and {end}"),
    }
    Ok(())
}

/// Connectivity check against the node.
async fn print_latest(args: NodeArgs) -> Result<()> {
    let node = NodeClient::new(args.node);
    let Some(block) = node.block(BlockTag::Latest).await? else {
        bail!("Node at {} returned no latest block", node.url());
    };
    println!("Connected to {}", node.url());
    println!("Block number {}", block.number);
    println!("Base fee {} gwei", to_gwei_pretty(block.base_fee)?);
    println!("Timestamp {}", block.timestamp);
    Ok(())
}
