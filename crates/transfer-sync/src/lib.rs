pub mod balance;
pub mod indexer;
pub mod query;
pub mod types;
pub mod units;

#[cfg(test)]
mod mocks;

pub use balance::{BalanceService, BalanceView};
pub use indexer::{Indexer, IndexerError};
pub use query::{TransferHistory, TransferQueryError, TransferQueryService, TransferView};
pub use types::{ChainDefaults, FailedRange, IndexReport, IndexRequest, IndexerConfig, ScanRange};
