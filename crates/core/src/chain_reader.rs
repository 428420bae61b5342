use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;
use alloy_provider::Provider;
use alloy_rpc_types_eth::{Filter, Log};
use alloy_transport::TransportError;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::contracts::erc20::IERC20;
use crate::query_rpc_pool::{ProviderHandle, QueryRpcPool};

#[derive(Debug, thiserror::Error)]
pub enum ChainReaderError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] TransportError),
    #[error("contract call failed: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("no healthy rpc available")]
    NoHealthyRpc,
    #[error("block range {from_block}..={to_block} exceeds the provider limit of {max} blocks")]
    RangeTooLarge {
        from_block: u64,
        to_block: u64,
        max: u64,
    },
    #[error("invalid block range {from_block}..={to_block}")]
    InvalidRange { from_block: u64, to_block: u64 },
    #[error("log decode error: {0}")]
    Decode(#[from] alloy::sol_types::Error),
    #[error("log is missing {0}")]
    IncompleteLog(&'static str),
}

impl ChainReaderError {
    pub fn is_rpc_throttled(&self) -> bool {
        let transport = match self {
            Self::UpstreamUnavailable(err) => err,
            Self::Contract(alloy::contract::Error::TransportError(err)) => err,
            _ => return false,
        };
        match transport {
            TransportError::ErrorResp(resp) => resp.message.contains("limit exceeded"),
            TransportError::Transport(resp) => resp
                .as_http_error()
                .is_some_and(|err| err.status == 429 || err.body.contains("limit exceeded")),
            _ => false,
        }
    }

    fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_)
                | Self::Contract(alloy::contract::Error::TransportError(_))
        )
    }
}

/// A decoded ERC20 `Transfer` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub transaction_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

impl RawLog {
    #[must_use]
    pub fn involves(&self, address: Address) -> bool {
        self.from == address || self.to == address
    }
}

impl TryFrom<&Log> for RawLog {
    type Error = ChainReaderError;

    fn try_from(log: &Log) -> Result<Self, Self::Error> {
        let decoded = log.log_decode::<IERC20::Transfer>()?;
        let transfer = decoded.inner.data;
        Ok(Self {
            transaction_hash: log
                .transaction_hash
                .ok_or(ChainReaderError::IncompleteLog("transaction hash"))?,
            log_index: log
                .log_index
                .ok_or(ChainReaderError::IncompleteLog("log index"))?,
            block_number: log
                .block_number
                .ok_or(ChainReaderError::IncompleteLog("block number"))?,
            from: transfer.from,
            to: transfer.to,
            value: transfer.value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub decimals: u8,
    pub symbol: String,
}

/// Read access to the chain. `get_logs` callers must keep the inclusive span
/// within [`ChainReader::max_block_range`].
#[async_trait]
pub trait ChainReader: Send + Sync {
    fn max_block_range(&self) -> u64;

    async fn current_height(&self) -> Result<u64, ChainReaderError>;

    async fn get_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainReaderError>;

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, ChainReaderError>;

    async fn native_balance(&self, holder: Address) -> Result<U256, ChainReaderError>;

    async fn token_balance(&self, token: Address, holder: Address)
    -> Result<U256, ChainReaderError>;
}

pub fn check_range(from_block: u64, to_block: u64, max: u64) -> Result<(), ChainReaderError> {
    if from_block > to_block {
        return Err(ChainReaderError::InvalidRange {
            from_block,
            to_block,
        });
    }
    if to_block - from_block >= max {
        return Err(ChainReaderError::RangeTooLarge {
            from_block,
            to_block,
            max,
        });
    }
    Ok(())
}

pub struct RpcChainReader {
    rpcs: Arc<QueryRpcPool>,
    max_block_range: u64,
}

impl RpcChainReader {
    #[must_use]
    pub fn new(rpcs: Arc<QueryRpcPool>, max_block_range: u64) -> Self {
        Self {
            rpcs,
            max_block_range: max_block_range.max(1),
        }
    }

    fn provider(&self) -> Result<ProviderHandle, ChainReaderError> {
        self.rpcs
            .random_provider()
            .ok_or(ChainReaderError::NoHealthyRpc)
    }

    fn settle<T, E>(&self, rpc: &ProviderHandle, result: Result<T, E>) -> Result<T, ChainReaderError>
    where
        E: Into<ChainReaderError>,
    {
        result.map_err(|err| {
            let err = err.into();
            if err.is_upstream() {
                warn!(%err, rpc = rpc.url.as_str(), "rpc call failed, parking provider");
                self.rpcs.mark_bad_provider(rpc);
            }
            err
        })
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    fn max_block_range(&self) -> u64 {
        self.max_block_range
    }

    async fn current_height(&self) -> Result<u64, ChainReaderError> {
        let rpc = self.provider()?;
        let result = rpc.provider.get_block_number().await;
        self.settle(&rpc, result)
    }

    async fn get_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, ChainReaderError> {
        check_range(from_block, to_block, self.max_block_range)?;
        let rpc = self.provider()?;
        let filter = Filter::new()
            .select(from_block..=to_block)
            .address(contract)
            .event_signature(IERC20::Transfer::SIGNATURE_HASH);
        let result = rpc.provider.get_logs(&filter).await;
        let logs = self.settle(&rpc, result)?;

        let mut out = Vec::with_capacity(logs.len());
        for log in &logs {
            match RawLog::try_from(log) {
                Ok(raw) => out.push(raw),
                Err(err) => {
                    debug!(%err, tx = ?log.transaction_hash, "skipping undecodable transfer log");
                }
            }
        }
        Ok(out)
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, ChainReaderError> {
        let rpc = self.provider()?;
        let contract = IERC20::new(token, rpc.provider.clone());
        let decimals = self.settle(&rpc, contract.decimals().call().await)?;
        let symbol = self.settle(&rpc, contract.symbol().call().await)?;
        Ok(TokenMetadata { decimals, symbol })
    }

    async fn native_balance(&self, holder: Address) -> Result<U256, ChainReaderError> {
        let rpc = self.provider()?;
        let result = rpc.provider.get_balance(holder).await;
        self.settle(&rpc, result)
    }

    async fn token_balance(
        &self,
        token: Address,
        holder: Address,
    ) -> Result<U256, ChainReaderError> {
        let rpc = self.provider()?;
        let contract = IERC20::new(token, rpc.provider.clone());
        let result = contract.balanceOf(holder).call().await;
        self.settle(&rpc, result)
    }
}
