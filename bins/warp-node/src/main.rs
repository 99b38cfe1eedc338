mod node;

use config::Config;
use content_store::LocalContentStore;
use derived_store::DerivedStore;
use eyre::{Result, WrapErr, bail};
use local_db::DbConfig;
use node::Node;
use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use structopt::StructOpt;
use sync_service::{BulkSyncStrategy, ControllerConfig, DEFAULT_REORG_DEPTH, SyncController};
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use warp::{ChunkPolicy, WarpController};
use warp_core::{ContractEventDecoder, ContractName, ContractRegistry, LogSource, RpcLogSource};

#[derive(StructOpt)]
#[structopt(name = "warp-node")]
struct Options {
    #[structopt(short, long)]
    pub cfg: PathBuf,
    #[structopt(short, long)]
    pub debug_log: Option<PathBuf>,
    #[structopt(long)]
    pub debug_level: Option<String>,
}

const DEFAULT_DEBUG_LEVEL: &str =
    "info,warp=debug,sync_service=debug,derived_store=debug,content_store=debug";

#[tokio::main]
async fn main() -> Result<()> {
    let opt: Options = Options::from_args();
    let cfg = read_config(&opt.cfg)?;

    let (console_non_blocking, _console_guard) = tracing_appender::non_blocking(std::io::stdout());
    let debug_log = opt
        .debug_log
        .or_else(|| cfg.debug_log.clone())
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

    let store = DerivedStore::open(DbConfig {
        root_dir: cfg.db_dir.clone(),
    })
    .wrap_err("open local db")?;
    let content = Arc::new(
        LocalContentStore::open(cfg.content.dir.clone())
            .await
            .wrap_err("open content store")?,
    );

    let contracts = &cfg.contracts;
    let registry = Arc::new(ContractRegistry::new(
        [
            (ContractName::Augur, contracts.augur),
            (ContractName::AugurTrading, contracts.augur_trading),
        ]
        .into_iter()
        .chain(
            contracts
                .share_token
                .map(|address| (ContractName::ShareToken, address)),
        ),
    ));
    let source: Arc<dyn LogSource> = Arc::new(
        RpcLogSource::connect(&cfg.rpc_url)
            .await
            .wrap_err("connect to rpc")?,
    );
    let bulk = BulkSyncStrategy::new(
        source.clone(),
        Arc::new(ContractEventDecoder::new(registry.clone())),
        registry,
        store.clone(),
        cfg.sync.chunk_size,
    )
    .wrap_err("create bulk sync")?;
    let sync = SyncController::new(
        bulk,
        ControllerConfig {
            upload_block: cfg.upload_block,
            finality_depth: cfg.sync.finality_depth,
            poll_interval: cfg.sync.poll_interval.into_inner(),
            reorg_depth: DEFAULT_REORG_DEPTH,
        },
    );
    let warp = WarpController::new(
        store.clone(),
        content.clone(),
        source,
        cfg.upload_block,
        ChunkPolicy {
            max_span: cfg.checkpoints.max_span,
            max_events: cfg.checkpoints.max_events,
        },
    );

    for url in &cfg.content.pin {
        // Failures are logged by the controller; a missing pin must not stop the node.
        if warp.pin_hash_by_gateway_url(url).await.is_err() {
            warn!(url, "skipping pin");
        }
    }

    let node = Node {
        store,
        content,
        gateway: cfg.content.gateway.clone(),
        sync: cfg.sync.enabled.then_some(sync),
        warp: cfg.checkpoints.enabled.then_some(warp),
        poll_interval: cfg.sync.poll_interval.into_inner(),
        checkpoint_interval: cfg.checkpoints.interval.into_inner(),
    };
    if let Some(root) = cfg.content.warp_root.as_deref() {
        node.warm_start(root).await?;
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutting down");
                    cancel.cancel();
                }
                Err(err) => error!(?err, "failed to listen for shutdown signal"),
            }
        }
    });

    info!(
        sync = cfg.sync.enabled,
        checkpoints = cfg.checkpoints.enabled,
        upload_block = cfg.upload_block,
        "starting warp node"
    );
    node.run(cancel).await;
    Ok(())
}

fn read_config(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path).wrap_err("read a config file")?;
    if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    {
        Ok(serde_json::from_str(&data).wrap_err("parse config")?)
    } else if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
    {
        Ok(serde_yaml::from_str(&data).wrap_err("parse config")?)
    } else {
        bail!("unsupported config file format");
    }
}
