mod admin;
mod api;
mod settings;

use config::Config;
use eyre::{Result, WrapErr, bail};
use ledger_core::{ChainReader, RpcChainReader, query_rpc_pool::QueryRpcPool};
use local_db::{DbConfig, DbStore};
use settings::Settings;
use std::fs;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;
use tracing::metadata::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use transfer_sync::{BalanceService, Indexer, TransferQueryService};

#[derive(StructOpt)]
#[structopt(name = "ledger-server")]
struct Options {
    #[structopt(short, long)]
    pub cfg: PathBuf,
    #[structopt(short, long)]
    pub debug_log: Option<PathBuf>,
    #[structopt(long)]
    pub debug_level: Option<String>,
}

const DEFAULT_DEBUG_LEVEL: &str =
    "info,ledger_core=debug,transfer_sync=debug,local_db=debug,ledger_server=debug";

#[tokio::main]
async fn main() -> Result<()> {
    let opt: Options = Options::from_args();

    let (console_non_blocking, _console_guard) = tracing_appender::non_blocking(std::io::stdout());
    let debug_log = opt
        .debug_log
        .map(|path| {
            OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(path)
                .wrap_err("open debug log for writing")
        })
        .transpose()?
        .map(tracing_appender::non_blocking);
    tracing_subscriber::registry()
        .with(debug_log.as_ref().map(|(handle, _)| {
            let debug_level = opt.debug_level.as_deref().unwrap_or(DEFAULT_DEBUG_LEVEL);
            let filter = EnvFilter::builder()
                .parse(debug_level)
                .unwrap_or_else(|error| {
                    println!("failed to build debug log filter: {error:?}, using default: {DEFAULT_DEBUG_LEVEL}");
                    EnvFilter::builder()
                        .parse(DEFAULT_DEBUG_LEVEL)
                        .unwrap_or_else(|_| EnvFilter::builder().from_env_lossy())
                });
            tracing_logfmt::builder()
                .with_span_name(false)
                .with_span_path(true)
                .with_level(false)
                .with_target(false)
                .with_timestamp(true)
                .layer()
                .with_writer(handle.clone())
                .with_filter(filter)
        }))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(true)
                .with_writer(console_non_blocking)
                .with_filter(
                    EnvFilter::builder()
                        .with_default_directive(LevelFilter::INFO.into())
                        .from_env_lossy(),
                ),
        )
        .init();

    let cfg: Config = {
        let data = fs::read_to_string(&opt.cfg).wrap_err("read a config file")?;
        if opt
            .cfg
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        {
            serde_json::from_str(&data).wrap_err("parse config")?
        } else if opt
            .cfg
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        {
            serde_yaml::from_str(&data).wrap_err("parse config")?
        } else {
            bail!("unsupported config file format");
        }
    };
    let settings = Settings::resolve(&cfg).wrap_err("resolve config")?;
    let chain_id = cfg.chain.chain_id;

    let db = Arc::new(
        DbStore::open(DbConfig {
            root_dir: settings.db_dir.clone(),
        })
        .wrap_err("open local db")?,
    );
    let stored = db.transfer_count().wrap_err("count stored transfers")?;
    let latest_block = db.latest_transfer_block().wrap_err("read latest stored block")?;
    info!(
        path = %db.db_path().display(),
        stored,
        latest_block = ?latest_block,
        "opened ledger db"
    );

    let rpcs = Arc::new(
        QueryRpcPool::connect(&settings.query_rpcs, settings.query_rpc_cooldown)
            .await
            .wrap_err("connect query rpcs")?,
    );
    info!(chain_id, rpcs = rpcs.len(), "query rpc pool ready");
    let reader: Arc<dyn ChainReader> = Arc::new(RpcChainReader::new(rpcs, settings.block_range));

    let indexer = Arc::new(Indexer::new(
        reader.clone(),
        db.clone(),
        settings.indexer.clone(),
    ));
    let transfers = Arc::new(TransferQueryService::new(
        db.clone(),
        indexer.clone(),
        settings.fallback_range,
    ));
    let balances = Arc::new(BalanceService::new(
        reader,
        settings.indexer.token,
        settings.indexer.token_symbol.clone(),
        settings.native_symbol.clone(),
    ));

    if let Some(admin_cfg) = cfg.admin.clone() {
        let indexer = indexer.clone();
        tokio::spawn(async move {
            if let Err(err) = admin::run(admin_cfg, indexer).await {
                error!(?err, "admin server failed");
            }
        });
    }

    info!(
        chain_id,
        tracked = %settings.indexer.tracked_address,
        token = %settings.indexer.token,
        "starting ledger server"
    );
    api::run(cfg.listen_addr.clone(), transfers, balances).await
}
