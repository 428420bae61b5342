use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, B256};
use ledger_core::{ChainReader, ChainReaderError, RawLog};
use local_db::{DbError, DbStore, TransferRecord};
use tracing::{Instrument, debug, info, warn};

use crate::types::{FailedRange, IndexReport, IndexRequest, IndexerConfig, ScanRange};

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("transfer indexing failed: {0}")]
    Chain(#[from] ChainReaderError),
    #[error("transfer indexing failed: {0}")]
    Storage(#[from] DbError),
    #[error("invalid block range {from_block}..={to_block}")]
    InvalidRange { from_block: u64, to_block: u64 },
}

/// Scans token `Transfer` logs in bounded chunks and stores the ones touching
/// an address.
pub struct Indexer {
    reader: Arc<dyn ChainReader>,
    db: Arc<DbStore>,
    config: IndexerConfig,
}

struct Scan {
    logs: Vec<RawLog>,
    scanned: Vec<ScanRange>,
    failed: Vec<FailedRange>,
}

impl Indexer {
    pub fn new(reader: Arc<dyn ChainReader>, db: Arc<DbStore>, config: IndexerConfig) -> Self {
        Self { reader, db, config }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Missing bounds default to the token genesis block and the current
    /// chain head. A failing chunk is logged and skipped; the run still
    /// stores whatever the other chunks returned.
    pub async fn index_range(&self, request: IndexRequest) -> Result<IndexReport, IndexerError> {
        let address = request.address.unwrap_or(self.config.tracked_address);
        self.run(address, request)
            .instrument(tracing::info_span!("index_range", %address))
            .await
    }

    async fn run(&self, address: Address, request: IndexRequest) -> Result<IndexReport, IndexerError> {
        let from_block = request.from_block.unwrap_or(self.config.genesis_block);
        let (to_block, head) = match request.to_block {
            Some(block) => (block, None),
            None => {
                let head = self.reader.current_height().await?;
                (head, Some(head))
            }
        };
        if from_block > to_block {
            return Err(IndexerError::InvalidRange {
                from_block,
                to_block,
            });
        }
        let range = ScanRange::new(from_block, to_block);
        info!(from_block, to_block, "indexing transfers");

        let scan = self.scan(range, address).await;
        let logs = dedupe_logs(scan.logs);
        let records = self.enrich(logs, head, to_block).await?;
        let stored = self.db.upsert_transfers(&records)?;

        info!(
            found = records.len(),
            inserted = stored.inserted,
            updated = stored.updated,
            unchanged = stored.unchanged,
            failed_chunks = scan.failed.len(),
            "transfer indexing finished"
        );
        Ok(IndexReport {
            address,
            range,
            records,
            scanned: scan.scanned,
            failed: scan.failed,
            stored,
        })
    }

    async fn scan(&self, range: ScanRange, address: Address) -> Scan {
        let mut scan = Scan {
            logs: Vec::new(),
            scanned: Vec::new(),
            failed: Vec::new(),
        };
        for chunk in range.chunks(self.reader.max_block_range()) {
            let ScanRange {
                from_block,
                to_block,
            } = chunk;
            match self
                .reader
                .get_logs(self.config.token, from_block, to_block)
                .await
            {
                Ok(logs) => {
                    let total = logs.len();
                    scan.logs
                        .extend(logs.into_iter().filter(|log| log.involves(address)));
                    debug!(from_block, to_block, num_logs = total, "fetched transfer logs");
                    scan.scanned.push(chunk);
                }
                Err(err) => {
                    let throttled = err.is_rpc_throttled();
                    if throttled {
                        warn!(?err, from_block, to_block, "rpc throttled, skipping chunk");
                    } else {
                        warn!(?err, from_block, to_block, "failed to fetch transfer logs, skipping chunk");
                    }
                    scan.failed.push(FailedRange {
                        range: chunk,
                        error: err.to_string(),
                        throttled,
                    });
                }
            }
        }
        scan
    }

    async fn enrich(
        &self,
        logs: Vec<RawLog>,
        head: Option<u64>,
        to_block: u64,
    ) -> Result<Vec<TransferRecord>, IndexerError> {
        if logs.is_empty() {
            return Ok(Vec::new());
        }
        let head = match head {
            Some(head) => head,
            None => self.reader.current_height().await.unwrap_or_else(|err| {
                warn!(?err, to_block, "failed to fetch chain head, anchoring timestamps at range end");
                to_block
            }),
        };
        let metadata = self.reader.token_metadata(self.config.token).await?;
        let symbol = self
            .config
            .token_symbol
            .clone()
            .unwrap_or(metadata.symbol);
        let now = SystemTime::now();
        Ok(logs
            .into_iter()
            .map(|log| TransferRecord {
                transaction_hash: log.transaction_hash,
                log_index: log.log_index,
                block_number: log.block_number,
                from: log.from,
                to: log.to,
                value: log.value,
                token_address: self.config.token,
                decimals: metadata.decimals,
                symbol: symbol.clone(),
                estimated_block_timestamp: estimate_block_timestamp(
                    now,
                    head,
                    log.block_number,
                    self.config.block_time,
                ),
            })
            .collect())
    }
}

/// Keeps the first occurrence of each `(transaction hash, log index)` and
/// orders the survivors by block, newest first. Ties keep scan order.
fn dedupe_logs(logs: Vec<RawLog>) -> Vec<RawLog> {
    let mut seen: HashSet<(B256, u64)> = HashSet::with_capacity(logs.len());
    let mut unique: Vec<RawLog> = logs
        .into_iter()
        .filter(|log| seen.insert((log.transaction_hash, log.log_index)))
        .collect();
    unique.sort_by(|a, b| b.block_number.cmp(&a.block_number));
    unique
}

/// Wall clock seconds for `block`, assuming `head` was produced at `now` and
/// blocks arrive every `block_time`.
pub fn estimate_block_timestamp(now: SystemTime, head: u64, block: u64, block_time: Duration) -> u64 {
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    let lag_ms = u128::from(head.saturating_sub(block)).saturating_mul(block_time.as_millis());
    u64::try_from(now_ms.saturating_sub(lag_ms) / 1000).unwrap_or(u64::MAX)
}
