use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, B256, U256, address};
use async_trait::async_trait;
use ledger_core::{ChainReader, ChainReaderError, RawLog, TokenMetadata};
use local_db::test_utils::TempStore;
use transfer_sync::{IndexRequest, Indexer, IndexerConfig, ScanRange, TransferQueryService};

const TOKEN: Address = address!("0xaa480c5f5eb436d0645189ca20e5ade13aecaf27");
const TRACKED: Address = address!("0xde7d4ca820d141d655420d959affa3920bb1e07a");
const PEER: Address = address!("0x00000000000000000000000000000000000000aa");

struct Chain {
    head: u64,
    logs: Mutex<Vec<RawLog>>,
}

#[async_trait]
impl ChainReader for Chain {
    fn max_block_range(&self) -> u64 {
        500
    }

    async fn current_height(&self) -> Result<u64, ChainReaderError> {
        Ok(self.head)
    }

    async fn get_logs(
        &self,
        _contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainReaderError> {
        ledger_core::chain_reader::check_range(from_block, to_block, self.max_block_range())?;
        Ok(self
            .logs
            .lock()
            .expect("logs lock")
            .iter()
            .filter(|log| (from_block..=to_block).contains(&log.block_number))
            .cloned()
            .collect())
    }

    async fn token_metadata(&self, _token: Address) -> Result<TokenMetadata, ChainReaderError> {
        Ok(TokenMetadata {
            decimals: 6,
            symbol: "USDT0".to_string(),
        })
    }

    async fn native_balance(&self, _holder: Address) -> Result<U256, ChainReaderError> {
        Ok(U256::ZERO)
    }

    async fn token_balance(
        &self,
        _token: Address,
        _holder: Address,
    ) -> Result<U256, ChainReaderError> {
        Ok(U256::ZERO)
    }
}

fn log(seed: u64, log_index: u64, block_number: u64, inbound: bool) -> RawLog {
    let (from, to) = if inbound { (PEER, TRACKED) } else { (TRACKED, PEER) };
    RawLog {
        transaction_hash: B256::left_padding_from(&seed.to_be_bytes()),
        log_index,
        block_number,
        from,
        to,
        value: U256::from(seed * 250_000),
    }
}

fn setup(chain: Arc<Chain>) -> (Arc<Indexer>, TransferQueryService, TempStore) {
    let store = TempStore::open().expect("open temp store");
    let db = store.handle();
    let indexer = Arc::new(Indexer::new(
        chain,
        db.clone(),
        IndexerConfig {
            tracked_address: TRACKED,
            token: TOKEN,
            genesis_block: 100,
            block_time: Duration::from_secs(1),
            token_symbol: None,
        },
    ));
    let query = TransferQueryService::new(db, indexer.clone(), ScanRange::new(1_900, 1_999));
    (indexer, query, store)
}

#[tokio::test]
async fn indexed_history_pages_newest_first() {
    let logs = (1..=12)
        .map(|seed| log(seed, 0, 100 + seed * 150, seed % 2 == 0))
        .collect();
    let chain = Arc::new(Chain {
        head: 2_000,
        logs: Mutex::new(logs),
    });
    let (indexer, query, _store) = setup(chain);

    let report = indexer
        .index_range(IndexRequest::default())
        .await
        .expect("index from genesis");
    assert_eq!(report.range, ScanRange::new(100, 2_000));
    assert_eq!(report.scanned.len(), 4);
    assert_eq!(report.indexed_count(), 12);
    assert!(report.is_complete());

    let first = query.get_transfers(TRACKED, 1, 5).await.expect("page 1");
    assert_eq!(first.total, 12);
    assert_eq!(first.total_pages, 3);
    let blocks: Vec<&str> = first.transfers.iter().map(|t| t.block_number.as_str()).collect();
    assert_eq!(blocks, vec!["1900", "1750", "1600", "1450", "1300"]);

    let last = query.get_transfers(TRACKED, 3, 5).await.expect("page 3");
    assert_eq!(last.transfers.len(), 2);
    assert_eq!(last.transfers[1].block_number, "250");
    assert_eq!(last.transfers[1].value, "0.25");

    let peer = query.get_transfers(PEER, 1, 50).await.expect("peer history");
    assert_eq!(peer.total, 12);
}

#[tokio::test]
async fn reindex_picks_up_moved_log_and_new_events() {
    let chain = Arc::new(Chain {
        head: 1_000,
        logs: Mutex::new(vec![log(1, 0, 400, true), log(1, 1, 400, false)]),
    });
    let (indexer, query, _store) = setup(chain.clone());

    let request = IndexRequest {
        from_block: Some(100),
        to_block: Some(999),
        address: None,
    };
    let first = indexer.index_range(request).await.expect("first run");
    assert_eq!(first.stored.inserted, 2);

    {
        let mut logs = chain.logs.lock().expect("logs lock");
        logs[0].block_number = 420;
        logs.push(log(2, 0, 900, true));
    }
    let second = indexer.index_range(request).await.expect("second run");
    assert_eq!(second.stored.inserted, 1);
    assert_eq!(second.stored.updated, 1);
    assert_eq!(second.stored.unchanged, 1);

    let history = query.get_transfers(TRACKED, 1, 50).await.expect("history");
    let rows: Vec<(&str, u64)> = history
        .transfers
        .iter()
        .map(|t| (t.block_number.as_str(), t.id))
        .collect();
    assert_eq!(rows, vec![("900", 3), ("420", 1), ("400", 2)]);
}

#[tokio::test]
async fn history_renders_api_shape() {
    let chain = Arc::new(Chain {
        head: 2_500,
        logs: Mutex::new(vec![log(4, 0, 1_950, true)]),
    });
    let (_, query, _store) = setup(chain);

    let history = query.get_transfers(TRACKED, 1, 50).await.expect("backfilled history");
    let json = serde_json::to_value(&history).expect("serialize");
    assert_eq!(json["total"], 1);
    assert_eq!(json["totalPages"], 1);
    let row = &json["transfers"][0];
    assert_eq!(row["from"], "0x00000000000000000000000000000000000000aa");
    assert_eq!(row["to"], "0xde7d4ca820d141d655420d959affa3920bb1e07a");
    assert_eq!(row["value"], "1");
    assert_eq!(row["rawValue"], "1000000");
    assert_eq!(row["symbol"], "USDT0");
    assert_eq!(row["decimals"], 6);
    assert!(row["blockTimestamp"].as_str().is_some_and(|ts| ts.ends_with('Z')));
}
