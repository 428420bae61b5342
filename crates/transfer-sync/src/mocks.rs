use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, B256, U256, address};
use async_trait::async_trait;
use ledger_core::chain_reader::check_range;
use ledger_core::{ChainReader, ChainReaderError, RawLog, TokenMetadata};
use local_db::DbStore;
use local_db::test_utils::TempStore;

use crate::types::IndexerConfig;

pub(crate) const TOKEN: Address = address!("0xaa480c5f5eb436d0645189ca20e5ade13aecaf27");
pub(crate) const ALICE: Address = address!("0xde7d4ca820d141d655420d959affa3920bb1e07a");
pub(crate) const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");
pub(crate) const CAROL: Address = address!("0x0000000000000000000000000000000000000ca7");

/// In-memory chain with a fixed set of transfer logs.
pub(crate) struct ScriptedChain {
    pub height: Option<u64>,
    pub max_range: u64,
    pub logs: Vec<RawLog>,
    /// Logs returned in addition to `logs` for the chunk starting at the key.
    pub extra: HashMap<u64, Vec<RawLog>>,
    /// Chunk start blocks whose `get_logs` call fails.
    pub failing: HashSet<u64>,
    pub calls: Mutex<Vec<(u64, u64)>>,
    pub metadata_calls: AtomicUsize,
}

impl ScriptedChain {
    pub(crate) fn new(height: u64, logs: Vec<RawLog>) -> Self {
        Self {
            height: Some(height),
            max_range: 1000,
            logs,
            extra: HashMap::new(),
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            metadata_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ChainReader for ScriptedChain {
    fn max_block_range(&self) -> u64 {
        self.max_range
    }

    async fn current_height(&self) -> Result<u64, ChainReaderError> {
        self.height.ok_or(ChainReaderError::NoHealthyRpc)
    }

    async fn get_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainReaderError> {
        check_range(from_block, to_block, self.max_range)?;
        self.calls
            .lock()
            .expect("calls lock")
            .push((from_block, to_block));
        if contract != TOKEN || self.failing.contains(&from_block) {
            return Err(ChainReaderError::NoHealthyRpc);
        }
        let mut logs: Vec<RawLog> = self
            .logs
            .iter()
            .filter(|log| (from_block..=to_block).contains(&log.block_number))
            .cloned()
            .collect();
        if let Some(extra) = self.extra.get(&from_block) {
            logs.extend(extra.iter().cloned());
        }
        Ok(logs)
    }

    async fn token_metadata(&self, _token: Address) -> Result<TokenMetadata, ChainReaderError> {
        self.metadata_calls.fetch_add(1, Ordering::Relaxed);
        Ok(TokenMetadata {
            decimals: 6,
            symbol: "USD₮0".to_string(),
        })
    }

    async fn native_balance(&self, _holder: Address) -> Result<U256, ChainReaderError> {
        Ok(U256::from(1_250_000_000_000_000_000u64))
    }

    async fn token_balance(
        &self,
        _token: Address,
        _holder: Address,
    ) -> Result<U256, ChainReaderError> {
        Ok(U256::from(42_000_000u64))
    }
}

pub(crate) fn transfer(seed: u64, block_number: u64, from: Address, to: Address) -> RawLog {
    RawLog {
        transaction_hash: B256::left_padding_from(&seed.to_be_bytes()),
        log_index: 0,
        block_number,
        from,
        to,
        value: U256::from(seed * 1_000_000),
    }
}

pub(crate) fn indexer_config() -> IndexerConfig {
    IndexerConfig {
        tracked_address: ALICE,
        token: TOKEN,
        genesis_block: 1000,
        block_time: Duration::from_secs(1),
        token_symbol: None,
    }
}

/// A service bound to a temp store; the store directory goes away with it.
pub(crate) struct WithStore<T> {
    inner: T,
    _store: TempStore,
}

impl<T> WithStore<T> {
    pub(crate) fn build(make: impl FnOnce(Arc<DbStore>) -> T) -> Self {
        let store = TempStore::open().expect("open temp store");
        Self {
            inner: make(store.handle()),
            _store: store,
        }
    }
}

impl<T> Deref for WithStore<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}
