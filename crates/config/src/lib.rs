use alloy::primitives::{Address, ChainId};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_QUERY_RPC_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub db_dir: Option<PathBuf>,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub admin: Option<AdminConfig>,
    #[serde(default = "default_query_rpc_cooldown")]
    pub query_rpc_cooldown: humantime_serde::Serde<Duration>,
    pub chain: Chain,
    pub tracked_address: Address,
    #[serde(default)]
    pub token: Token,
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    pub listen_addr: String,
    pub token: String,
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Chain {
    pub chain_id: ChainId,
    pub query_rpcs: Vec<Url>,
    /// Largest inclusive block span a single `eth_getLogs` call may cover.
    pub block_range: Option<u64>,
    pub block_time: Option<humantime_serde::Serde<Duration>>,
    pub native_symbol: Option<String>,
    /// Window scanned when a history read finds nothing stored.
    pub fallback_range: Option<BlockWindow>,
}

#[derive(Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Token {
    pub address: Option<Address>,
    pub genesis_block: Option<u64>,
    pub symbol: Option<String>,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BlockWindow {
    pub from_block: u64,
    pub to_block: u64,
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_query_rpc_cooldown() -> humantime_serde::Serde<Duration> {
    DEFAULT_QUERY_RPC_COOLDOWN.into()
}
