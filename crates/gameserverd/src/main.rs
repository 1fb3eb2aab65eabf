//! `gameserverd`: loads configuration, resolves this process's place in the
//! cluster, wires the persistence cache, request queues, inter-GS RPC
//! server, and client session listener together, then serves until a
//! shutdown signal arrives.

mod config;
mod rpc_dispatch;
mod script_dispatch;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use config::{Cli, FileConfig};
use gs_cluster::ClusterMap;
use gs_persistence::PersistenceCache;
use gs_rpc::{GsRpcClient, NoopGsDispatch, Router, RpcServer};
use gs_runtime::QueueRegistry;
use gs_session::SessionPump;
use gs_storage::rocks::RocksDriver;
use tokio_util::sync::CancellationToken;

fn main() -> anyhow::Result<()> {
    install_tracing();

    let cli = Cli::parse();
    tracing::info!(config = %cli.config.display(), "starting gameserverd");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(async_main(cli));
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result
}

fn install_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");
}

/// Install the process metrics recorder (spec §6 `mon.statsd.*`). The
/// config's shape follows spec.md's StatsD-shaped keys, but the actual
/// egress is a Prometheus pull endpoint — see `DESIGN.md` for why.
fn install_metrics(mon: &config::MonConfig) -> anyhow::Result<()> {
    if !mon.statsd.enabled {
        return Ok(());
    }
    let addr: std::net::SocketAddr = format!("{}:{}", mon.statsd.host, mon.statsd.port)
        .parse()
        .context("parsing mon.statsd.{host,port} as a listen address")?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing metrics recorder")?;
    tracing::info!(%addr, "metrics endpoint listening");
    Ok(())
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    let file_config = FileConfig::load(&cli.config).context("loading config file")?;

    install_metrics(&file_config.mon)?;

    let expanded = gs_cluster::expand_game_servers(&file_config.net.game_servers, file_config.net.rpc.base_port);
    let local_id = gs_cluster::resolve_local_gs_id(&expanded, cli.master_id.as_deref(), cli.gsid.as_deref())
        .context("resolving this process's gs id")?;
    let local_conf = expanded[&local_id].clone();

    let cluster = Arc::new(ClusterMap::new(expanded, local_id.clone()).context("building cluster map")?);

    std::fs::create_dir_all(&cli.data_dir).context("creating data directory")?;
    let driver = Arc::new(RocksDriver::open(&cli.data_dir).context("opening rocksdb driver")?);

    let router = Router::new(cluster.clone());
    let rpc_client = Arc::new(GsRpcClient::new(router.clone()));

    let persistence = Arc::new(PersistenceCache::new(driver, cluster.clone(), rpc_client));
    let registry = QueueRegistry::new(persistence.clone());

    let auth = Arc::new(gs_auth::HmacAuth::new(cli.auth_secret.as_bytes(), file_config.auth.token_lifespan));

    let rpc_dispatch = rpc_dispatch::QueueDispatch::new(registry.clone(), Arc::new(rpc_dispatch::NoopMethodHandler));
    let rpc_server = Arc::new(RpcServer::new(
        cluster.clone(),
        rpc_dispatch,
        Arc::new(NoopGsDispatch),
        router,
        file_config.net.max_connections,
    ));

    let session_pump = SessionPump::new(
        registry.clone(),
        cluster.clone(),
        auth,
        Arc::new(script_dispatch::NoopScriptDispatcher),
        file_config.net.max_msg_size,
    );

    let rpc_listener = tokio::net::TcpListener::bind(("0.0.0.0", local_conf.rpc_port))
        .await
        .context("binding rpc listener")?;
    let session_listener = tokio::net::TcpListener::bind(("0.0.0.0", local_conf.port))
        .await
        .context("binding client session listener")?;

    tracing::info!(
        gs_id = %local_id,
        client_port = local_conf.port,
        rpc_port = local_conf.rpc_port,
        "gameserverd listening"
    );

    let stop = CancellationToken::new();
    let rpc_task = tokio::spawn(rpc_server.serve(rpc_listener, stop.child_token()));
    let session_task = tokio::spawn(session_pump.serve(session_listener, stop.child_token()));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received; draining");

    stop.cancel();
    let _ = rpc_task.await;
    let _ = session_task.await;

    registry.shutdown().await;
    persistence.shutdown().await.context("flushing persistence cache during shutdown")?;

    tracing::info!("gameserverd shut down cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
