use alloy::hex;
use alloy::primitives::{Address, B256, U256};
use redb::{ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::{DbError, DbStore, decode, encode, now_epoch_secs};

type PartyKey = (&'static str, &'static str, u64, u64);
type BlockKey = (u64, u64);

/// Rows by store-assigned id, in insertion order.
pub const TRANSFERS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("transfers");
/// `(tx hash, log index)` -> id. Enforces one row per emitted event.
pub const TRANSFER_KEYS_TABLE: TableDefinition<(&str, u64), u64> =
    TableDefinition::new("transfer_keys");
/// `(participant, token, block, id)` for both the sender and the receiver.
pub const PARTY_INDEX_TABLE: TableDefinition<PartyKey, ()> = TableDefinition::new("party_index");
/// `(block, id)`.
pub const BLOCK_INDEX_TABLE: TableDefinition<BlockKey, ()> = TableDefinition::new("block_index");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transaction_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub token_address: Address,
    pub decimals: u8,
    pub symbol: String,
    /// Derived from the distance to the scan head, not read from the chain.
    pub estimated_block_timestamp: u64,
}

impl TransferRecord {
    /// Compares the chain-derived fields, ignoring the timestamp estimate.
    #[must_use]
    pub fn same_transfer(&self, other: &Self) -> bool {
        self.transaction_hash == other.transaction_hash
            && self.log_index == other.log_index
            && self.block_number == other.block_number
            && self.from == other.from
            && self.to == other.to
            && self.value == other.value
            && self.token_address == other.token_address
            && self.decimals == other.decimals
            && self.symbol == other.symbol
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransfer {
    pub id: u64,
    pub created_at: u64,
    pub record: TransferRecord,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Rows skipped because the stored copy has a higher block number.
    pub stale: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPage {
    pub transfers: Vec<StoredTransfer>,
    pub total: u64,
}

/// Lowercase `0x`-prefixed hex, the form addresses take in index keys.
#[must_use]
pub fn address_key(address: &Address) -> String {
    hex::encode_prefixed(address)
}

fn hash_key(hash: &B256) -> String {
    hex::encode_prefixed(hash)
}

impl DbStore {
    /// Writes `records` in one transaction. Existing rows are left alone when
    /// nothing chain-derived changed or when the incoming copy is older.
    pub fn upsert_transfers(&self, records: &[TransferRecord]) -> Result<UpsertSummary, DbError> {
        let mut summary = UpsertSummary::default();
        if records.is_empty() {
            return Ok(summary);
        }
        let created_at = now_epoch_secs()?;
        let txn = self.db.begin_write()?;
        {
            let mut transfers = txn.open_table(TRANSFERS_TABLE)?;
            let mut keys = txn.open_table(TRANSFER_KEYS_TABLE)?;
            let mut parties = txn.open_table(PARTY_INDEX_TABLE)?;
            let mut blocks = txn.open_table(BLOCK_INDEX_TABLE)?;
            let mut next_id = transfers
                .last()?
                .map_or(1, |(id, _)| id.value().saturating_add(1));

            for record in records {
                let hash = hash_key(&record.transaction_hash);
                let existing = keys
                    .get((hash.as_str(), record.log_index))?
                    .map(|id| id.value());
                let Some(id) = existing else {
                    let stored = StoredTransfer {
                        id: next_id,
                        created_at,
                        record: record.clone(),
                    };
                    transfers.insert(next_id, encode(&stored)?.as_slice())?;
                    keys.insert((hash.as_str(), record.log_index), next_id)?;
                    insert_index_entries(&mut parties, &mut blocks, &stored)?;
                    next_id += 1;
                    summary.inserted += 1;
                    continue;
                };

                let current: StoredTransfer = match transfers.get(id)? {
                    Some(value) => decode(value.value())?,
                    None => return Err(DbError::MissingTransfer { id }),
                };
                if record.block_number < current.record.block_number {
                    summary.stale += 1;
                    continue;
                }
                if current.record.same_transfer(record) {
                    summary.unchanged += 1;
                    continue;
                }

                remove_index_entries(&mut parties, &mut blocks, &current)?;
                let updated = StoredTransfer {
                    id,
                    created_at: current.created_at,
                    record: record.clone(),
                };
                transfers.insert(id, encode(&updated)?.as_slice())?;
                insert_index_entries(&mut parties, &mut blocks, &updated)?;
                summary.updated += 1;
            }
        }
        txn.commit()?;
        Ok(summary)
    }

    /// One page of transfers touching `address` for `token`, newest block
    /// first and newest row first within a block. `page` is 1-indexed.
    pub fn query_transfers(
        &self,
        address: Address,
        token: Address,
        page: u64,
        page_size: u64,
    ) -> Result<TransferPage, DbError> {
        let party = address_key(&address);
        let token = address_key(&token);
        let offset = page.max(1).saturating_sub(1).saturating_mul(page_size);

        let txn = self.db.begin_read()?;
        let index = txn.open_table(PARTY_INDEX_TABLE)?;
        let range = index.range(
            (party.as_str(), token.as_str(), 0u64, 0u64)
                ..=(party.as_str(), token.as_str(), u64::MAX, u64::MAX),
        )?;

        let mut total = 0u64;
        let mut ids = Vec::new();
        for entry in range.rev() {
            let (key, _) = entry?;
            if total >= offset && (ids.len() as u64) < page_size {
                ids.push(key.value().3);
            }
            total += 1;
        }

        let table = txn.open_table(TRANSFERS_TABLE)?;
        let mut transfers = Vec::with_capacity(ids.len());
        for id in ids {
            match table.get(id)? {
                Some(value) => transfers.push(decode(value.value())?),
                None => return Err(DbError::MissingTransfer { id }),
            }
        }
        Ok(TransferPage { transfers, total })
    }

    #[cfg(test)]
    pub(crate) fn get_transfer(
        &self,
        transaction_hash: &B256,
        log_index: u64,
    ) -> Result<Option<StoredTransfer>, DbError> {
        let hash = hash_key(transaction_hash);
        let txn = self.db.begin_read()?;
        let keys = txn.open_table(TRANSFER_KEYS_TABLE)?;
        let Some(id) = keys.get((hash.as_str(), log_index))?.map(|id| id.value()) else {
            return Ok(None);
        };
        let table = txn.open_table(TRANSFERS_TABLE)?;
        match table.get(id)? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Err(DbError::MissingTransfer { id }),
        }
    }

    pub fn transfer_count(&self) -> Result<u64, DbError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TRANSFERS_TABLE)?;
        let mut count = 0u64;
        for entry in table.range::<u64>(..)? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Highest block with at least one stored transfer.
    pub fn latest_transfer_block(&self) -> Result<Option<u64>, DbError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(BLOCK_INDEX_TABLE)?;
        Ok(table.last()?.map(|(key, _)| key.value().0))
    }
}

fn participants(record: &TransferRecord) -> Vec<String> {
    let from = address_key(&record.from);
    let to = address_key(&record.to);
    if from == to { vec![from] } else { vec![from, to] }
}

fn insert_index_entries(
    parties: &mut Table<'_, PartyKey, ()>,
    blocks: &mut Table<'_, BlockKey, ()>,
    stored: &StoredTransfer,
) -> Result<(), DbError> {
    let record = &stored.record;
    let token = address_key(&record.token_address);
    for party in participants(record) {
        parties.insert(
            (party.as_str(), token.as_str(), record.block_number, stored.id),
            (),
        )?;
    }
    blocks.insert((record.block_number, stored.id), ())?;
    Ok(())
}

fn remove_index_entries(
    parties: &mut Table<'_, PartyKey, ()>,
    blocks: &mut Table<'_, BlockKey, ()>,
    stored: &StoredTransfer,
) -> Result<(), DbError> {
    let record = &stored.record;
    let token = address_key(&record.token_address);
    for party in participants(record) {
        parties.remove((party.as_str(), token.as_str(), record.block_number, stored.id))?;
    }
    blocks.remove((record.block_number, stored.id))?;
    Ok(())
}
