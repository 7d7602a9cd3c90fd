//! Imports fee history from the older `data.json` layout, where fees were
//! recorded as gwei floats: `{"15000000": {"fee": 32.1, "t": 1655976429}}`.
use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use basefee_types::{
    record::BlockFee,
    units::{gwei_f64_to_wei, UnitsError},
};
use log::info;
use serde::Deserialize;
use thiserror::Error;

use crate::store::{FeeStore, StoreError};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("serde_json error {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("Store error {0}")]
    StoreError(#[from] StoreError),
    #[error("Block {block} has an invalid fee {source}")]
    InvalidFee { block: u64, source: UnitsError },
    #[error("File {filename} could not be opened {source}")]
    FileOpener {
        source: io::Error,
        filename: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct LegacyRecord {
    /// Base fee in gwei.
    fee: f64,
    t: u64,
}

/// Merges a legacy file into the store, replacing any existing records for the
/// same blocks. The store is flushed afterwards. Returns the number of records imported.
pub fn import_legacy_file<P: AsRef<Path>>(
    store: &mut FeeStore,
    legacy: P,
) -> Result<usize, ImportError> {
    let filename = legacy.as_ref().to_path_buf();
    let file = File::open(&filename).map_err(|e| ImportError::FileOpener {
        source: e,
        filename: filename.clone(),
    })?;
    let records: BTreeMap<u64, LegacyRecord> = serde_json::from_reader(BufReader::new(file))?;
    let count = import_records(store, records)?;
    store.flush()?;
    info!("Imported {count} records from {}", filename.display());
    Ok(count)
}

fn import_records(
    store: &mut FeeStore,
    records: BTreeMap<u64, LegacyRecord>,
) -> Result<usize, ImportError> {
    let count = records.len();
    for (block, record) in records {
        let base_fee =
            gwei_f64_to_wei(record.fee).map_err(|source| ImportError::InvalidFee { block, source })?;
        store.insert(BlockFee {
            number: block,
            timestamp: record.t,
            base_fee,
        });
    }
    Ok(count)
}
