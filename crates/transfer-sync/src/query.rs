use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use alloy::hex;
use alloy::primitives::Address;
use local_db::{DbError, DbStore, StoredTransfer, TransferPage, address_key};
use serde::Serialize;
use tracing::info;

use crate::indexer::{Indexer, IndexerError};
use crate::types::{IndexRequest, ScanRange};
use crate::units::format_units;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const MAX_PAGE_SIZE: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum TransferQueryError {
    #[error("failed to fetch transfers: {0}")]
    TransferFetchFailed(#[from] DbError),
    #[error("failed to fetch transfers: {0}")]
    Backfill(#[from] IndexerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferView {
    pub id: u64,
    pub block_number: String,
    pub transaction_hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub raw_value: String,
    pub token_address: String,
    pub symbol: String,
    pub decimals: u8,
    pub timestamp: String,
    pub block_timestamp: String,
}

impl From<StoredTransfer> for TransferView {
    fn from(stored: StoredTransfer) -> Self {
        let record = stored.record;
        Self {
            id: stored.id,
            block_number: record.block_number.to_string(),
            transaction_hash: hex::encode_prefixed(record.transaction_hash),
            from: address_key(&record.from),
            to: address_key(&record.to),
            value: format_units(record.value, record.decimals),
            raw_value: record.value.to_string(),
            token_address: address_key(&record.token_address),
            symbol: record.symbol,
            decimals: record.decimals,
            timestamp: rfc3339(stored.created_at),
            block_timestamp: rfc3339(record.estimated_block_timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferHistory {
    pub transfers: Vec<TransferView>,
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl TransferHistory {
    fn new(result: TransferPage, page: u64, limit: u64) -> Self {
        Self {
            transfers: result.transfers.into_iter().map(TransferView::from).collect(),
            page,
            limit,
            total: result.total,
            total_pages: result.total.div_ceil(limit),
        }
    }
}

/// Serves stored history for an address, backfilling a fixed block window
/// once when nothing is stored yet.
pub struct TransferQueryService {
    db: Arc<DbStore>,
    indexer: Arc<Indexer>,
    fallback_range: ScanRange,
}

impl TransferQueryService {
    pub fn new(db: Arc<DbStore>, indexer: Arc<Indexer>, fallback_range: ScanRange) -> Self {
        Self {
            db,
            indexer,
            fallback_range,
        }
    }

    /// `page` is 1-indexed; `limit` is clamped to `1..=MAX_PAGE_SIZE`.
    ///
    /// The fallback window is scanned only when the address has no stored rows
    /// at all (`total == 0`). A page past the end of a non-empty history is
    /// served empty without touching the chain.
    pub async fn get_transfers(
        &self,
        address: Address,
        page: u64,
        limit: u64,
    ) -> Result<TransferHistory, TransferQueryError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let token = self.indexer.config().token;

        let mut result = self.db.query_transfers(address, token, page, limit)?;
        if result.total == 0 {
            let ScanRange {
                from_block,
                to_block,
            } = self.fallback_range;
            info!(%address, from_block, to_block, "no stored transfers, backfilling");
            let report = self
                .indexer
                .index_range(IndexRequest {
                    from_block: Some(from_block),
                    to_block: Some(to_block),
                    address: Some(address),
                })
                .await?;
            info!(%address, found = report.indexed_count(), "backfill finished");
            result = self.db.query_transfers(address, token, page, limit)?;
        }
        Ok(TransferHistory::new(result, page, limit))
    }
}

fn rfc3339(secs: u64) -> String {
    humantime::format_rfc3339_seconds(UNIX_EPOCH + Duration::from_secs(secs)).to_string()
}

#[cfg(test)]
mod tests {
    use super::{MAX_PAGE_SIZE, TransferQueryService, TransferView, rfc3339};
    use crate::indexer::Indexer;
    use crate::mocks::{ALICE, BOB, CAROL, ScriptedChain, WithStore, indexer_config, transfer};
    use crate::types::{IndexRequest, ScanRange};
    use alloy::primitives::{B256, U256, address};
    use local_db::{StoredTransfer, TransferRecord};
    use std::sync::Arc;

    const FALLBACK: ScanRange = ScanRange {
        from_block: 7_800_838,
        to_block: 7_800_839,
    };

    fn service(chain: &Arc<ScriptedChain>) -> WithStore<TransferQueryService> {
        WithStore::build(|db| {
            let indexer = Arc::new(Indexer::new(chain.clone(), db.clone(), indexer_config()));
            TransferQueryService::new(db, indexer, FALLBACK)
        })
    }

    #[tokio::test]
    async fn empty_store_backfills_once() {
        let chain = Arc::new(ScriptedChain::new(
            8_000_000,
            vec![transfer(7, 7_800_839, BOB, ALICE)],
        ));
        let svc = service(&chain);

        let history = svc.get_transfers(ALICE, 1, 50).await.expect("history");
        assert_eq!(chain.calls(), vec![(7_800_838, 7_800_839)]);
        assert_eq!(history.total, 1);
        assert_eq!(history.total_pages, 1);
        assert_eq!(history.transfers[0].block_number, "7800839");
        assert_eq!(history.transfers[0].value, "7");

        svc.get_transfers(ALICE, 1, 50).await.expect("second read");
        assert_eq!(chain.calls().len(), 1, "stored rows are served without a scan");
    }

    #[tokio::test]
    async fn still_empty_after_backfill() {
        let chain = Arc::new(ScriptedChain::new(8_000_000, vec![transfer(1, 7_800_838, BOB, CAROL)]));
        let svc = service(&chain);

        let history = svc.get_transfers(ALICE, 1, 50).await.expect("history");
        assert!(history.transfers.is_empty());
        assert_eq!(history.total, 0);
        assert_eq!(history.total_pages, 0);
        assert_eq!(chain.calls().len(), 1);
    }

    #[tokio::test]
    async fn backfill_chain_failure_is_not_fatal_per_chunk() {
        let mut chain = ScriptedChain::new(8_000_000, Vec::new());
        chain.failing.insert(FALLBACK.from_block);
        let chain = Arc::new(chain);
        let history = service(&chain)
            .get_transfers(ALICE, 1, 50)
            .await
            .expect("empty history");
        assert!(history.transfers.is_empty());
    }

    #[tokio::test]
    async fn page_past_the_end_does_not_backfill() {
        let chain = Arc::new(ScriptedChain::new(
            5000,
            (1..=3).map(|i| transfer(i, 1000 + i, ALICE, BOB)).collect(),
        ));
        let svc = service(&chain);
        svc.indexer
            .index_range(IndexRequest {
                from_block: Some(1000),
                to_block: Some(1999),
                address: None,
            })
            .await
            .expect("index");
        let scans = chain.calls().len();

        let history = svc.get_transfers(ALICE, 5, 2).await.expect("history");
        assert!(history.transfers.is_empty());
        assert_eq!(history.total, 3);
        assert_eq!(history.total_pages, 2);
        assert_eq!(chain.calls().len(), scans);
    }

    #[tokio::test]
    async fn paging_is_clamped() {
        let chain = Arc::new(ScriptedChain::new(
            5000,
            (1..=3).map(|i| transfer(i, 1000 + i, ALICE, BOB)).collect(),
        ));
        let svc = service(&chain);
        svc.indexer
            .index_range(IndexRequest {
                from_block: Some(1000),
                to_block: Some(1999),
                address: None,
            })
            .await
            .expect("index");

        let history = svc.get_transfers(ALICE, 0, 0).await.expect("history");
        assert_eq!(history.page, 1);
        assert_eq!(history.limit, 1);
        assert_eq!(history.total_pages, 3);
        assert_eq!(history.transfers[0].block_number, "1003");

        let history = svc.get_transfers(ALICE, 1, 5000).await.expect("history");
        assert_eq!(history.limit, MAX_PAGE_SIZE);
        assert_eq!(history.transfers.len(), 3);
    }

    #[test]
    fn renders_transfer_view() {
        let stored = StoredTransfer {
            id: 9,
            created_at: 1_700_000_000,
            record: TransferRecord {
                transaction_hash: B256::repeat_byte(0xab),
                log_index: 2,
                block_number: 7_800_838,
                from: address!("0xDE7D4CA820D141D655420D959AFFA3920BB1E07A"),
                to: BOB,
                value: U256::from(1_500_000u64),
                token_address: address!("0xaa480c5f5eb436d0645189ca20e5ade13aecaf27"),
                decimals: 6,
                symbol: "USDT0".to_string(),
                estimated_block_timestamp: 1_699_999_990,
            },
        };
        let view = TransferView::from(stored);
        assert_eq!(view.value, "1.5");
        assert_eq!(view.raw_value, "1500000");
        assert_eq!(view.from, "0xde7d4ca820d141d655420d959affa3920bb1e07a");
        assert_eq!(view.transaction_hash, format!("0x{}", "ab".repeat(32)));
        assert_eq!(view.timestamp, "2023-11-14T22:13:20Z");
        assert_eq!(view.block_timestamp, rfc3339(1_699_999_990));

        let json = serde_json::to_value(&view).expect("serialize");
        assert_eq!(json["blockNumber"], "7800838");
        assert_eq!(json["rawValue"], "1500000");
        assert_eq!(json["tokenAddress"], "0xaa480c5f5eb436d0645189ca20e5ade13aecaf27");
    }
}
