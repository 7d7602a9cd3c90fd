//! Fee history held in memory and persisted as a single JSON file.
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufReader, Write},
    ops::RangeInclusive,
    path::{Path, PathBuf},
};

use basefee_types::record::{BlockFee, FeeRecord};
use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error {0}")]
    IoError(#[from] io::Error),
    #[error("serde_json error {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("File {filename} could not be opened {source}")]
    FileOpener {
        source: io::Error,
        filename: PathBuf,
    },
    #[error("File {filename} is not a fee history {source}")]
    InvalidFile {
        source: serde_json::Error,
        filename: PathBuf,
    },
}

/// Block number -> fee record, backed by a file.
///
/// The file is a JSON object keyed by decimal block number:
/// `{"17190873": {"fee": "0xecf0c6e7c", "t": 1683112487}}`.
#[derive(Debug)]
pub struct FeeStore {
    path: PathBuf,
    records: BTreeMap<u64, FeeRecord>,
    /// Inserts since the last flush.
    unflushed: u64,
}

impl FeeStore {
    /// Loads the store from a file, or starts an empty one if the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match File::open(&path) {
            Ok(file) => serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                StoreError::InvalidFile {
                    source: e,
                    filename: path.clone(),
                }
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(StoreError::FileOpener {
                    source: e,
                    filename: path,
                })
            }
        };
        Ok(Self {
            path,
            records,
            unflushed: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, block: u64) -> bool {
        self.records.contains_key(&block)
    }

    pub fn get(&self, block: u64) -> Option<&FeeRecord> {
        self.records.get(&block)
    }

    /// Adds or replaces the record for a block. Returns true if the block was not
    /// previously held.
    pub fn insert(&mut self, block: BlockFee) -> bool {
        let (key, record) = block.to_entry();
        self.unflushed += 1;
        self.records.insert(key, record).is_none()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lowest block number held.
    pub fn earliest(&self) -> Option<u64> {
        self.records.keys().next().copied()
    }

    /// Highest block number held.
    pub fn latest(&self) -> Option<u64> {
        self.records.keys().next_back().copied()
    }

    /// Records within a range of block numbers, ascending.
    pub fn range(&self, blocks: RangeInclusive<u64>) -> impl Iterator<Item = (u64, &FeeRecord)> {
        self.records.range(blocks).map(|(k, v)| (*k, v))
    }

    /// Number of blocks in the range that have no record.
    pub fn missing_in(&self, blocks: RangeInclusive<u64>) -> u64 {
        if blocks.is_empty() {
            return 0;
        }
        let span = blocks.end() - blocks.start() + 1;
        span - self.records.range(blocks).count() as u64
    }

    /// Number of inserts not yet written to disk.
    pub fn unflushed(&self) -> u64 {
        self.unflushed
    }

    /// Writes all records to disk.
    ///
    /// The data is written to a temporary sibling file which then replaces the
    /// store file, so an interrupted write leaves the previous file intact.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path).map_err(|e| StoreError::FileOpener {
            source: e,
            filename: temp_path.clone(),
        })?;
        file.write_all(serde_json::to_string_pretty(&self.records)?.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &self.path)?;
        debug!(
            "Flushed {} records ({} new) to {}",
            self.records.len(),
            self.unflushed,
            self.path.display()
        );
        self.unflushed = 0;
        Ok(())
    }

    /// Flushes if at least `every` inserts have happened since the last flush.
    /// Returns true if a flush happened.
    pub fn flush_if_due(&mut self, every: u64) -> Result<bool, StoreError> {
        if self.unflushed == 0 || self.unflushed < every {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
