use std::time::Duration;

use alloy::primitives::{Address, address};
use local_db::{TransferRecord, UpsertSummary};
use serde::Serialize;

/// Inclusive block interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRange {
    pub from_block: u64,
    pub to_block: u64,
}

impl ScanRange {
    #[must_use]
    pub fn new(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
        }
    }

    /// Consecutive sub-ranges of at most `width` blocks. Chunk `i` starts at
    /// `from_block + i * width`; the last one is clipped to `to_block`.
    #[must_use]
    pub fn chunks(self, width: u64) -> Chunks {
        Chunks {
            next: (self.from_block <= self.to_block).then_some(self.from_block),
            end: self.to_block,
            width: width.max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunks {
    next: Option<u64>,
    end: u64,
    width: u64,
}

impl Iterator for Chunks {
    type Item = ScanRange;

    fn next(&mut self) -> Option<ScanRange> {
        let from_block = self.next?;
        let to_block = from_block.saturating_add(self.width - 1).min(self.end);
        self.next = (to_block < self.end).then(|| to_block + 1);
        Some(ScanRange::new(from_block, to_block))
    }
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub tracked_address: Address,
    pub token: Address,
    pub genesis_block: u64,
    pub block_time: Duration,
    /// Overrides the symbol reported by the token contract.
    pub token_symbol: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexRequest {
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRange {
    #[serde(flatten)]
    pub range: ScanRange,
    pub error: String,
    pub throttled: bool,
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub address: Address,
    pub range: ScanRange,
    /// Transfers found by this run after in-run dedup, newest block first.
    pub records: Vec<TransferRecord>,
    pub scanned: Vec<ScanRange>,
    pub failed: Vec<FailedRange>,
    pub stored: UpsertSummary,
}

impl IndexReport {
    #[must_use]
    pub fn indexed_count(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ChainDefaults {
    pub chain_id: u64,
    pub token: Address,
    pub token_symbol: &'static str,
    pub genesis_block: u64,
    pub block_range: u64,
    pub block_time: Duration,
    pub native_symbol: &'static str,
    pub fallback_range: ScanRange,
}

impl ChainDefaults {
    pub fn for_chain(chain_id: u64) -> Option<Self> {
        match chain_id {
            999 => Some(Self {
                chain_id,
                token: address!("0xaa480c5f5eb436d0645189ca20e5ade13aecaf27"),
                token_symbol: "USDT0",
                genesis_block: 5_350_082,
                block_range: 1000,
                block_time: Duration::from_secs(1),
                native_symbol: "HYPE",
                fallback_range: ScanRange::new(7_800_838, 7_800_839),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChainDefaults, ScanRange};

    #[test]
    fn chunks_split_on_width_boundaries() {
        let chunks: Vec<_> = ScanRange::new(1000, 2500).chunks(1000).collect();
        assert_eq!(
            chunks,
            vec![ScanRange::new(1000, 1999), ScanRange::new(2000, 2500)]
        );
    }

    #[test]
    fn chunks_cover_range_without_gaps_or_overlaps() {
        for (from, to, width) in [(0u64, 0u64, 1000u64), (7, 7_006, 1000), (5, 17, 4), (1, 1000, 1000)] {
            let chunks: Vec<_> = ScanRange::new(from, to).chunks(width).collect();
            let expected = (to - from + 1).div_ceil(width);
            assert_eq!(chunks.len() as u64, expected, "{from}..={to} / {width}");
            assert_eq!(chunks[0].from_block, from);
            assert_eq!(chunks[chunks.len() - 1].to_block, to);
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.from_block, from + i as u64 * width);
                assert!(chunk.to_block - chunk.from_block < width);
            }
            for pair in chunks.windows(2) {
                assert_eq!(pair[0].to_block + 1, pair[1].from_block);
            }
        }
    }

    #[test]
    fn inverted_range_has_no_chunks() {
        assert_eq!(ScanRange::new(10, 9).chunks(1000).count(), 0);
    }

    #[test]
    fn chunks_stop_at_u64_max() {
        let chunks: Vec<_> = ScanRange::new(u64::MAX - 5, u64::MAX).chunks(4).collect();
        assert_eq!(
            chunks,
            vec![
                ScanRange::new(u64::MAX - 5, u64::MAX - 2),
                ScanRange::new(u64::MAX - 1, u64::MAX)
            ]
        );
    }

    #[test]
    fn hyperevm_defaults() {
        let defaults = ChainDefaults::for_chain(999).expect("hyperevm defaults");
        assert_eq!(defaults.block_range, 1000);
        assert_eq!(defaults.fallback_range, ScanRange::new(7_800_838, 7_800_839));
        assert!(ChainDefaults::for_chain(1).is_none());
    }
}
