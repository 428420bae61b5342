use eyre::{Result, WrapErr, bail, eyre};
use local_db::{
    BLOCK_INDEX_TABLE, META_TABLE, Meta, PARTY_INDEX_TABLE, StoredTransfer, TRANSFER_KEYS_TABLE,
    TRANSFERS_TABLE, resolve_db_path,
};
use redb::{Builder, ReadOnlyDatabase, ReadTransaction, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "db-cli")]
struct Options {
    #[structopt(long)]
    path: PathBuf,
    #[structopt(long)]
    table: Option<String>,
    /// Row id for `transfers`, key name for `meta`.
    #[structopt(long)]
    key: Option<String>,
    #[structopt(long)]
    limit: Option<usize>,
    #[structopt(long)]
    raw: bool,
    #[structopt(long)]
    copy: bool,
}

#[derive(Clone, Copy, Debug)]
enum TableKind {
    Meta,
    Transfers,
    TransferKeys,
    PartyIndex,
    BlockIndex,
}

impl TableKind {
    const ALL: [Self; 5] = [
        Self::Meta,
        Self::Transfers,
        Self::TransferKeys,
        Self::PartyIndex,
        Self::BlockIndex,
    ];

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Transfers => "transfers",
            Self::TransferKeys => "transfer_keys",
            Self::PartyIndex => "party_index",
            Self::BlockIndex => "block_index",
        }
    }
}

#[derive(Serialize)]
struct Entry<K, V> {
    key: K,
    value: V,
}

#[derive(Serialize)]
struct RawEntry<K> {
    key: K,
    value_hex: String,
}

fn main() -> Result<()> {
    let opt = Options::from_args();

    if opt.key.is_some() && opt.table.is_none() {
        bail!("--key requires --table");
    }
    if opt.limit.is_some() && opt.table.is_none() {
        bail!("--limit requires --table");
    }

    let db_path = resolve_db_path(&opt.path);
    if !db_path.exists() {
        bail!("db not found: {}", db_path.display());
    }

    let open_path = if opt.copy {
        let copy_path = copy_db_path(&db_path);
        std::fs::copy(&db_path, &copy_path).wrap_err("copy db for repair")?;
        let mut db = Builder::new()
            .open(&copy_path)
            .wrap_err("open redb copy for repair")?;
        db.check_integrity().wrap_err("repair redb copy")?;
        copy_path
    } else {
        db_path.clone()
    };

    let db = match ReadOnlyDatabase::open(&open_path) {
        Ok(db) => db,
        Err(err) => {
            if matches!(err, redb::DatabaseError::RepairAborted) && !opt.copy {
                return Err(eyre!(
                    "database needs repair; rerun with --copy to work on a safe copy"
                ));
            }
            return Err(err).wrap_err("open redb");
        }
    };
    let txn = db.begin_read().wrap_err("begin read")?;

    let Some(table_name) = opt.table.as_deref() else {
        for table in TableKind::ALL {
            println!("{}", table.name());
        }
        return Ok(());
    };
    let table_kind =
        TableKind::from_name(table_name).ok_or_else(|| eyre!("unknown table: {table_name}"))?;
    let limit = opt.limit.unwrap_or(usize::MAX);

    match (table_kind, opt.key.as_deref()) {
        (TableKind::Meta, key) => dump_meta(&txn, key, limit, opt.raw),
        (TableKind::Transfers, key) => {
            let key = key
                .map(|key| key.parse::<u64>().wrap_err("transfer id must be a number"))
                .transpose()?;
            dump_transfers(&txn, key, limit, opt.raw)
        }
        (_, Some(_)) => bail!("--key is only supported for meta and transfers"),
        (TableKind::TransferKeys, None) => {
            let table = txn.open_table(TRANSFER_KEYS_TABLE)?;
            for entry in table.range::<(&str, u64)>(..)?.take(limit) {
                let (key, id) = entry?;
                let (hash, log_index) = key.value();
                print_json(&Entry {
                    key: (hash, log_index),
                    value: id.value(),
                })?;
            }
            Ok(())
        }
        (TableKind::PartyIndex, None) => {
            let table = txn.open_table(PARTY_INDEX_TABLE)?;
            for entry in table.range::<(&str, &str, u64, u64)>(..)?.take(limit) {
                let (key, _) = entry?;
                print_json(&key.value())?;
            }
            Ok(())
        }
        (TableKind::BlockIndex, None) => {
            let table = txn.open_table(BLOCK_INDEX_TABLE)?;
            for entry in table.range::<(u64, u64)>(..)?.take(limit) {
                let (key, _) = entry?;
                print_json(&key.value())?;
            }
            Ok(())
        }
    }
}

fn dump_meta(txn: &ReadTransaction, key: Option<&str>, limit: usize, raw: bool) -> Result<()> {
    let table = txn.open_table(META_TABLE)?;
    if let Some(key) = key {
        return match table.get(key)? {
            Some(value) => print_value::<_, Meta>(key, value.value(), raw),
            None => bail!("key not found: {key}"),
        };
    }
    for entry in table.range::<&str>(..)?.take(limit) {
        let (key, value) = entry?;
        print_value::<_, Meta>(key.value(), value.value(), raw)?;
    }
    Ok(())
}

fn dump_transfers(txn: &ReadTransaction, id: Option<u64>, limit: usize, raw: bool) -> Result<()> {
    let table = txn.open_table(TRANSFERS_TABLE)?;
    if let Some(id) = id {
        return match table.get(id)? {
            Some(value) => print_value::<_, StoredTransfer>(id, value.value(), raw),
            None => bail!("transfer not found: {id}"),
        };
    }
    for entry in table.range::<u64>(..)?.take(limit) {
        let (id, value) = entry?;
        print_value::<_, StoredTransfer>(id.value(), value.value(), raw)?;
    }
    Ok(())
}

fn copy_db_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|file| file.to_string_lossy().to_string())
        .filter(|file| !file.is_empty())
        .unwrap_or_else(|| "db.redb".to_string());
    path.with_file_name(format!("{name}.copy"))
}

fn print_value<K, T>(key: K, value: &[u8], raw: bool) -> Result<()>
where
    K: Serialize,
    T: DeserializeOwned + Serialize,
{
    if raw {
        return print_json(&RawEntry {
            key,
            value_hex: format!("0x{}", hex::encode(value)),
        });
    }
    let decoded: T = rmp_serde::from_slice(value).wrap_err("decode msgpack")?;
    print_json(&Entry {
        key,
        value: decoded,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let data = serde_json::to_string(value).wrap_err("serialize json")?;
    println!("{data}");
    Ok(())
}
