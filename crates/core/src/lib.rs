pub mod chain_reader;
pub mod contracts;
pub mod provider;
pub mod query_rpc_pool;

pub use chain_reader::{ChainReader, ChainReaderError, RawLog, RpcChainReader, TokenMetadata};
