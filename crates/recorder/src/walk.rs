//! Walks block numbers in one direction, recording the fee of each block not
//! already held in the store.
use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use basefee_types::{
    constants::{DEFAULT_FLUSH_EVERY, STATUS_EVERY_N_BLOCKS},
    record::BlockFee,
    units::to_gwei_pretty,
};
use log::{debug, info};
use thiserror::Error;

use crate::{
    node::{BlockSource, NodeError},
    predict::{PredictError, Prediction, Predictor},
    retry::{pause, with_retry, RetryPolicy},
    rpc::BlockTag,
    store::{FeeStore, StoreError},
};

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("Node error {0}")]
    NodeError(#[from] NodeError),
    #[error("Store error {0}")]
    StoreError(#[from] StoreError),
    #[error("Predict error {0}")]
    PredictError(#[from] PredictError),
    #[error("Requested block {requested} but node returned block {received}")]
    UnexpectedBlock { requested: u64, received: u64 },
}

/// Order in which block numbers are visited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Ascending from the start block, optionally following the chain head.
    Forward,
    /// Descending from the start block towards genesis.
    Backward,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WalkConfig {
    pub start: BlockTag,
    pub direction: Direction,
    /// Last block to visit (inclusive). Highest for a forward walk, lowest for backward.
    pub stop: Option<u64>,
    /// No policy means the first node error ends the walk.
    pub retry: Option<RetryPolicy>,
    /// New records held before writing to disk.
    pub flush_every: u64,
    /// Pause after each block fetched from the node.
    pub request_delay: Duration,
    /// Pause before asking again for a block beyond the chain head.
    pub head_poll: Duration,
    /// Whether a forward walk waits for new blocks once it reaches the head.
    pub follow: bool,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            start: BlockTag::Latest,
            direction: Direction::Backward,
            stop: None,
            retry: Some(RetryPolicy::default()),
            flush_every: DEFAULT_FLUSH_EVERY,
            request_delay: Duration::from_millis(100),
            head_poll: Duration::from_secs(12),
            follow: false,
        }
    }
}

/// Summary of a completed walk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkReport {
    /// Blocks fetched from the node and recorded.
    pub fetched: u64,
    /// Blocks already in the store.
    pub skipped: u64,
    /// Node requests that were repeated after an error.
    pub retries: u64,
    /// Last block number recorded or found already recorded.
    pub last_block: Option<u64>,
    /// Most recent prediction made by an attached predictor.
    pub last_prediction: Option<Prediction>,
}

impl Display for WalkReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetched {}, skipped {}, retries {}, last block {}",
            self.fetched,
            self.skipped,
            self.retries,
            self.last_block
                .map_or_else(|| "none".to_string(), |b| b.to_string())
        )
    }
}

/// Records block fees from a source into a store.
pub struct Walker<'a, S> {
    source: &'a S,
    store: &'a mut FeeStore,
    config: WalkConfig,
    predictor: Option<Predictor>,
    shutdown: Arc<AtomicBool>,
}

impl<'a, S: BlockSource + Sync> Walker<'a, S> {
    pub fn new(source: &'a S, store: &'a mut FeeStore, config: WalkConfig) -> Self {
        Self {
            source,
            store,
            config,
            predictor: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Logs a fee prediction whenever the predictor says one is due.
    pub fn with_predictor(mut self, predictor: Predictor) -> Self {
        self.predictor = Some(predictor);
        self
    }

    /// The walk ends at the next block boundary once the flag is set.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Runs the walk to completion. The store is flushed on the way out,
    /// including when the walk ends with an error.
    pub async fn run(mut self) -> Result<WalkReport, WalkError> {
        let mut report = WalkReport::default();
        let outcome = self.walk(&mut report).await;
        let flushed = self.store.flush();
        outcome?;
        flushed?;
        info!("Walk finished: {report}");
        Ok(report)
    }

    async fn walk(&mut self, report: &mut WalkReport) -> Result<(), WalkError> {
        let mut current = self.resolve_start(report).await?;
        info!(
            "Walking {} from block {current} into {}",
            self.config.direction,
            self.store.path().display()
        );
        loop {
            if self.shutdown_requested() {
                info!("Shutdown requested, stopping at block {current}");
                return Ok(());
            }
            if self.past_stop(current) {
                return Ok(());
            }

            if self.store.contains(current) {
                debug!("Block {current} already recorded");
                report.skipped += 1;
            } else {
                let fetched = match self.fetch(current, report).await {
                    Err(e) if self.shutdown_requested() => {
                        info!("Shutdown requested while fetching block {current} ({e})");
                        return Ok(());
                    }
                    other => other?,
                };
                let Some(block) = fetched else {
                    if !self.config.follow {
                        info!("Reached chain head at block {current}");
                        return Ok(());
                    }
                    debug!("Block {current} not yet available");
                    pause(self.config.head_poll, &self.shutdown).await;
                    continue;
                };
                if block.number != current {
                    return Err(WalkError::UnexpectedBlock {
                        requested: current,
                        received: block.number,
                    });
                }
                self.record(block, report)?;
                report.fetched += 1;
                pause(self.config.request_delay, &self.shutdown).await;
            }
            report.last_block = Some(current);

            match self.next(current) {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Resolves the start tag to a block number.
    async fn resolve_start(&self, report: &mut WalkReport) -> Result<u64, WalkError> {
        let number = match self.config.start {
            BlockTag::Number(n) => n,
            BlockTag::Latest => {
                let source = self.source;
                let (result, retries) =
                    with_retry(self.config.retry.as_ref(), &self.shutdown, || async move {
                        source.latest_number().await
                    })
                    .await;
                report.retries += u64::from(retries);
                result?
            }
        };
        Ok(number)
    }

    /// Gets a block from the node. `None` means a forward walk reached the head.
    ///
    /// For a backward walk every block should exist, so an absent block is an error
    /// (and retried as such).
    async fn fetch(
        &self,
        number: u64,
        report: &mut WalkReport,
    ) -> Result<Option<BlockFee>, WalkError> {
        let source = self.source;
        let tag = BlockTag::Number(number);
        let direction = self.config.direction;
        let (result, retries) =
            with_retry(self.config.retry.as_ref(), &self.shutdown, || async move {
                match (source.block(tag).await?, direction) {
                    (None, Direction::Backward) => Err(NodeError::BlockAbsent(tag)),
                    (block, _) => Ok(block),
                }
            })
            .await;
        report.retries += u64::from(retries);
        Ok(result?)
    }

    fn record(&mut self, block: BlockFee, report: &mut WalkReport) -> Result<(), WalkError> {
        let number = block.number;
        self.store.insert(block);
        debug!("Recorded block {number} base fee {} wei", block.base_fee);
        self.store.flush_if_due(self.config.flush_every)?;
        if let Some(status) = status_line(self.store, number) {
            info!("{status}");
        }
        if let Some(predictor) = self.predictor.as_mut() {
            if let Some(prediction) = predictor.observe(self.store, number)? {
                info!(
                    "Predicted base fee {} gwei from blocks {}..={}",
                    to_gwei_pretty(prediction.fee).unwrap_or_else(|_| prediction.fee.to_string()),
                    prediction.window_start,
                    prediction.block
                );
                report.last_prediction = Some(prediction);
            }
        }
        Ok(())
    }

    fn past_stop(&self, current: u64) -> bool {
        match (self.config.stop, self.config.direction) {
            (Some(stop), Direction::Forward) => current > stop,
            (Some(stop), Direction::Backward) => current < stop,
            (None, _) => false,
        }
    }

    /// Next block number to visit, if any.
    fn next(&self, current: u64) -> Option<u64> {
        match self.config.direction {
            Direction::Forward => current.checked_add(1),
            Direction::Backward => current.checked_sub(1),
        }
    }
}

/// Status line logged for every `STATUS_EVERY_N_BLOCKS`-th block number.
fn status_line(store: &FeeStore, number: u64) -> Option<String> {
    if number % STATUS_EVERY_N_BLOCKS != 0 {
        return None;
    }
    Some(format!(
        "Block {number}. Status: {} records held, earliest {:?}, latest {:?}",
        store.len(),
        store.earliest(),
        store.latest()
    ))
}

#[cfg(test)]
mod test {
    use std::{
        collections::HashMap,
        path::PathBuf,
        sync::{atomic::AtomicU64, Mutex},
    };

    use async_trait::async_trait;
    use ethers::types::U256;
    use tempdir::TempDir;

    use super::*;
    use crate::rpc::RpcErrorObject;

    /// A chain held in memory. Blocks above `head` do not exist.
    struct MemoryChain {
        head: AtomicU64,
        /// A new block arrives each time a block beyond the head is requested.
        grow_on_miss: bool,
        /// Remaining forced failures per block number.
        failures: Mutex<HashMap<u64, u32>>,
        /// Block number answered with the following block instead.
        misnumbered: Option<u64>,
        /// Store file whose record count is noted at every request.
        watch: Option<PathBuf>,
        on_disk: Mutex<Vec<usize>>,
        requested: Mutex<Vec<BlockTag>>,
    }

    impl MemoryChain {
        fn new(head: u64) -> Self {
            Self {
                head: AtomicU64::new(head),
                grow_on_miss: false,
                failures: Mutex::new(HashMap::new()),
                misnumbered: None,
                watch: None,
                on_disk: Mutex::new(vec![]),
                requested: Mutex::new(vec![]),
            }
        }
        fn fail(self, block: u64, times: u32) -> Self {
            self.failures.lock().unwrap().insert(block, times);
            self
        }
        fn requested_numbers(&self) -> Vec<u64> {
            self.requested
                .lock()
                .unwrap()
                .iter()
                .filter_map(|t| match t {
                    BlockTag::Number(n) => Some(*n),
                    BlockTag::Latest => None,
                })
                .collect()
        }
    }

    fn fee_of(number: u64) -> BlockFee {
        BlockFee {
            number,
            timestamp: 1_700_000_000 + number * 12,
            base_fee: U256::from(1_000 + number),
        }
    }

    #[async_trait]
    impl BlockSource for MemoryChain {
        async fn block(&self, tag: BlockTag) -> Result<Option<BlockFee>, NodeError> {
            self.requested.lock().unwrap().push(tag);
            if let Some(path) = &self.watch {
                let held = FeeStore::open(path).unwrap().len();
                self.on_disk.lock().unwrap().push(held);
            }
            let head = self.head.load(Ordering::SeqCst);
            let number = match tag {
                BlockTag::Number(n) => n,
                BlockTag::Latest => head,
            };
            if let Some(remaining) = self.failures.lock().unwrap().get_mut(&number) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(NodeError::Rpc(RpcErrorObject {
                        code: -32000,
                        message: "header not found".to_string(),
                    }));
                }
            }
            if number > head {
                if self.grow_on_miss {
                    self.head.fetch_add(1, Ordering::SeqCst);
                }
                return Ok(None);
            }
            if self.misnumbered == Some(number) {
                return Ok(Some(fee_of(number + 1)));
            }
            Ok(Some(fee_of(number)))
        }
    }

    fn config(start: BlockTag, direction: Direction) -> WalkConfig {
        WalkConfig {
            start,
            direction,
            stop: None,
            retry: Some(RetryPolicy {
                backoff: Duration::from_millis(1),
                max_attempts: None,
            }),
            flush_every: 2,
            request_delay: Duration::ZERO,
            head_poll: Duration::from_millis(1),
            follow: false,
        }
    }

    /// Sets the flag after a short delay.
    fn shutdown_soon() -> Arc<AtomicBool> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });
        shutdown
    }

    #[tokio::test]
    async fn test_forward_walk_stops_at_head() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let mut store = FeeStore::open(dir.path().join("fees.json")).unwrap();
        let chain = MemoryChain::new(14);
        let report = Walker::new(&chain, &mut store, config(BlockTag::Number(10), Direction::Forward))
            .run()
            .await
            .unwrap();
        assert_eq!(report.fetched, 5);
        assert_eq!(report.last_block, Some(14));
        assert_eq!(store.earliest(), Some(10));
        assert_eq!(store.latest(), Some(14));
        assert_eq!(store.get(12).unwrap().fee, U256::from(1_012));
        assert_eq!(store.unflushed(), 0);
    }

    #[tokio::test]
    async fn test_backward_walk_from_latest_to_genesis() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let mut store = FeeStore::open(dir.path().join("fees.json")).unwrap();
        let chain = MemoryChain::new(3);
        let report = Walker::new(&chain, &mut store, config(BlockTag::Latest, Direction::Backward))
            .run()
            .await
            .unwrap();
        assert_eq!(report.fetched, 4);
        assert_eq!(report.last_block, Some(0));
        assert_eq!(store.len(), 4);
        assert_eq!(chain.requested_numbers(), vec![3, 2, 1, 0]);
    }

    #[tokio::test]
    async fn test_recorded_blocks_are_not_requested() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let mut store = FeeStore::open(dir.path().join("fees.json")).unwrap();
        store.insert(fee_of(7));
        store.insert(fee_of(8));
        let chain = MemoryChain::new(100);
        let mut walk = config(BlockTag::Number(9), Direction::Backward);
        walk.stop = Some(5);
        let report = Walker::new(&chain, &mut store, walk).run().await.unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.last_block, Some(5));
        assert_eq!(chain.requested_numbers(), vec![9, 6, 5]);
        assert_eq!(store.earliest(), Some(5));
    }

    #[tokio::test]
    async fn test_follow_waits_for_new_blocks() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let mut store = FeeStore::open(dir.path().join("fees.json")).unwrap();
        let mut chain = MemoryChain::new(2);
        chain.grow_on_miss = true;
        let mut walk = config(BlockTag::Number(1), Direction::Forward);
        walk.follow = true;
        walk.stop = Some(4);
        let report = Walker::new(&chain, &mut store, walk).run().await.unwrap();
        assert_eq!(report.fetched, 4);
        assert_eq!(report.last_block, Some(4));
        assert_eq!(chain.requested_numbers(), vec![1, 2, 3, 3, 4, 4]);
        assert_eq!(store.missing_in(1..=4), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let mut store = FeeStore::open(dir.path().join("fees.json")).unwrap();
        let chain = MemoryChain::new(100).fail(21, 3);
        let mut walk = config(BlockTag::Number(20), Direction::Forward);
        walk.stop = Some(22);
        let report = Walker::new(&chain, &mut store, walk).run().await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.retries, 3);
        assert_eq!(chain.requested_numbers(), vec![20, 21, 21, 21, 21, 22]);
    }

    #[tokio::test]
    async fn test_error_without_retry_flushes_progress() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let path = dir.path().join("fees.json");
        let mut store = FeeStore::open(&path).unwrap();
        let chain = MemoryChain::new(100).fail(31, 1);
        let mut walk = config(BlockTag::Number(30), Direction::Forward);
        walk.retry = None;
        walk.flush_every = 1_000;
        let result = Walker::new(&chain, &mut store, walk).run().await;
        assert!(matches!(result, Err(WalkError::NodeError(NodeError::Rpc(_)))));
        let reopened = FeeStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.contains(30));
    }

    #[tokio::test]
    async fn test_periodic_flush_during_walk() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let path = dir.path().join("fees.json");
        let mut store = FeeStore::open(&path).unwrap();
        let mut chain = MemoryChain::new(100);
        chain.watch = Some(path.clone());
        let mut walk = config(BlockTag::Number(0), Direction::Forward);
        walk.stop = Some(4);
        Walker::new(&chain, &mut store, walk).run().await.unwrap();
        // Records on disk as each block was requested, flushing every 2 inserts.
        assert_eq!(*chain.on_disk.lock().unwrap(), vec![0, 0, 2, 2, 4]);
        assert_eq!(FeeStore::open(&path).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_shutdown_flag_ends_walk() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let mut store = FeeStore::open(dir.path().join("fees.json")).unwrap();
        let chain = MemoryChain::new(100);
        let shutdown = Arc::new(AtomicBool::new(true));
        let report = Walker::new(&chain, &mut store, config(BlockTag::Number(1), Direction::Forward))
            .with_shutdown(shutdown)
            .run()
            .await
            .unwrap();
        assert_eq!(report, WalkReport::default());
        assert!(chain.requested_numbers().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_while_node_is_down() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let path = dir.path().join("fees.json");
        let mut store = FeeStore::open(&path).unwrap();
        let chain = MemoryChain::new(100).fail(41, u32::MAX);
        let mut walk = config(BlockTag::Number(40), Direction::Forward);
        walk.retry = Some(RetryPolicy {
            backoff: Duration::from_secs(60),
            max_attempts: None,
        });
        walk.flush_every = 1_000;
        let walker = Walker::new(&chain, &mut store, walk).with_shutdown(shutdown_soon());
        let report = tokio::time::timeout(Duration::from_secs(2), walker.run())
            .await
            .expect("walk should end once shutdown is requested")
            .unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.last_block, Some(40));
        assert!(FeeStore::open(&path).unwrap().contains(40));
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting_at_head() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let mut store = FeeStore::open(dir.path().join("fees.json")).unwrap();
        let chain = MemoryChain::new(5);
        let mut walk = config(BlockTag::Number(5), Direction::Forward);
        walk.follow = true;
        walk.head_poll = Duration::from_secs(60);
        let walker = Walker::new(&chain, &mut store, walk).with_shutdown(shutdown_soon());
        let report = tokio::time::timeout(Duration::from_secs(2), walker.run())
            .await
            .expect("walk should end once shutdown is requested")
            .unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(chain.requested_numbers(), vec![5, 6]);
    }

    #[tokio::test]
    async fn test_mismatched_block_number_is_rejected() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let mut store = FeeStore::open(dir.path().join("fees.json")).unwrap();
        let mut chain = MemoryChain::new(100);
        chain.misnumbered = Some(6);
        let mut walk = config(BlockTag::Number(5), Direction::Forward);
        walk.stop = Some(8);
        let result = Walker::new(&chain, &mut store, walk).run().await;
        assert!(matches!(
            result,
            Err(WalkError::UnexpectedBlock {
                requested: 6,
                received: 7
            })
        ));
        assert!(store.contains(5));
        assert!(!store.contains(6));
        assert!(!store.contains(7));
    }

    #[tokio::test]
    async fn test_predictor_attached_to_walk() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let mut store = FeeStore::open(dir.path().join("fees.json")).unwrap();
        let chain = MemoryChain::new(100);
        let mut walk = config(BlockTag::Number(1), Direction::Forward);
        walk.stop = Some(4);
        let report = Walker::new(&chain, &mut store, walk)
            .with_predictor(Predictor::new(2, 2, 0.0).unwrap())
            .run()
            .await
            .unwrap();
        assert_eq!(
            report.last_prediction,
            Some(Prediction {
                block: 3,
                window_start: 2,
                fee: U256::from(1_002),
            })
        );
    }

    #[test]
    fn test_status_line_every_n_blocks() {
        let dir = TempDir::new("basefee_walk").unwrap();
        let mut store = FeeStore::open(dir.path().join("fees.json")).unwrap();
        store.insert(fee_of(24));
        store.insert(fee_of(25));
        assert_eq!(status_line(&store, 24), None);
        assert_eq!(
            status_line(&store, STATUS_EVERY_N_BLOCKS).unwrap(),
            "Block 25. Status: 2 records held, earliest Some(24), latest Some(25)"
        );
        assert!(status_line(&store, 50).is_some());
    }

    #[test]
    fn test_walk_report_display() {
        let report = WalkReport {
            fetched: 3,
            skipped: 1,
            retries: 0,
            last_block: Some(9),
            last_prediction: None,
        };
        assert_eq!(report.to_string(), "fetched 3, skipped 1, retries 0, last block 9");
    }
}
