use std::sync::Arc;

use alloy::primitives::Address;
use ledger_core::{ChainReader, ChainReaderError};
use local_db::address_key;
use serde::Serialize;

use crate::units::format_units;

pub const NATIVE_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub address: String,
    pub balance: String,
    pub raw_balance: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Live balance reads. Nothing here touches the store.
pub struct BalanceService {
    reader: Arc<dyn ChainReader>,
    token: Address,
    token_symbol: Option<String>,
    native_symbol: String,
}

impl BalanceService {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        token: Address,
        token_symbol: Option<String>,
        native_symbol: String,
    ) -> Self {
        Self {
            reader,
            token,
            token_symbol,
            native_symbol,
        }
    }

    pub async fn native_balance(&self, holder: Address) -> Result<BalanceView, ChainReaderError> {
        let raw = self.reader.native_balance(holder).await?;
        Ok(BalanceView {
            address: address_key(&holder),
            balance: format_units(raw, NATIVE_DECIMALS),
            raw_balance: raw.to_string(),
            symbol: self.native_symbol.clone(),
            decimals: NATIVE_DECIMALS,
        })
    }

    pub async fn token_balance(&self, holder: Address) -> Result<BalanceView, ChainReaderError> {
        let raw = self.reader.token_balance(self.token, holder).await?;
        let metadata = self.reader.token_metadata(self.token).await?;
        Ok(BalanceView {
            address: address_key(&holder),
            balance: format_units(raw, metadata.decimals),
            raw_balance: raw.to_string(),
            symbol: self.token_symbol.clone().unwrap_or(metadata.symbol),
            decimals: metadata.decimals,
        })
    }
}
