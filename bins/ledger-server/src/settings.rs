use std::path::PathBuf;
use std::time::Duration;

use config::Config;
use eyre::{OptionExt, Result, bail};
use transfer_sync::{ChainDefaults, IndexerConfig, ScanRange};
use url::Url;

/// Config file values merged with the built-in per-chain defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_dir: PathBuf,
    pub query_rpcs: Vec<Url>,
    pub query_rpc_cooldown: Duration,
    pub block_range: u64,
    pub native_symbol: String,
    pub fallback_range: ScanRange,
    pub indexer: IndexerConfig,
}

impl Settings {
    pub fn resolve(cfg: &Config) -> Result<Self> {
        let chain_id = cfg.chain.chain_id;
        if cfg.chain.query_rpcs.is_empty() {
            bail!("chain {chain_id}: at least one query rpc is required");
        }
        let defaults = ChainDefaults::for_chain(chain_id);
        let missing = |field: &str| format!("chain {chain_id} has no built-in {field}, set it in the config");

        let token = match (cfg.token.address, &defaults) {
            (Some(address), _) => address,
            (None, Some(defaults)) => defaults.token,
            (None, None) => bail!(missing("token.address")),
        };
        let genesis_block = cfg
            .token
            .genesis_block
            .or(defaults.as_ref().map(|d| d.genesis_block))
            .ok_or_eyre(missing("token.genesis_block"))?;
        let block_range = cfg
            .chain
            .block_range
            .or(defaults.as_ref().map(|d| d.block_range))
            .ok_or_eyre(missing("chain.block_range"))?;
        if block_range == 0 {
            bail!("chain {chain_id}: block_range must be positive");
        }
        let block_time = cfg
            .chain
            .block_time
            .map(|t| t.into_inner())
            .or(defaults.as_ref().map(|d| d.block_time))
            .ok_or_eyre(missing("chain.block_time"))?;
        let native_symbol = cfg
            .chain
            .native_symbol
            .clone()
            .or(defaults.as_ref().map(|d| d.native_symbol.to_string()))
            .ok_or_eyre(missing("chain.native_symbol"))?;
        let fallback_range = cfg
            .chain
            .fallback_range
            .map(|w| ScanRange::new(w.from_block, w.to_block))
            .or(defaults.as_ref().map(|d| d.fallback_range))
            .ok_or_eyre(missing("chain.fallback_range"))?;
        if fallback_range.from_block > fallback_range.to_block {
            bail!("chain {chain_id}: fallback_range is inverted");
        }
        let token_symbol = cfg
            .token
            .symbol
            .clone()
            .or(defaults.as_ref().map(|d| d.token_symbol.to_string()));

        Ok(Self {
            db_dir: cfg.db_dir.clone().unwrap_or_else(|| PathBuf::from("db")),
            query_rpcs: cfg.chain.query_rpcs.clone(),
            query_rpc_cooldown: cfg.query_rpc_cooldown.into_inner(),
            block_range,
            native_symbol,
            fallback_range,
            indexer: IndexerConfig {
                tracked_address: cfg.tracked_address,
                token,
                genesis_block,
                block_time,
                token_symbol,
            },
        })
    }
}
