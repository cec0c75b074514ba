use std::sync::Arc;

use kube::Client;
use splunk_operator::config::OperatorConfig;
use splunk_operator::controller::{Context, run};
use splunk_operator::crds::{
    enterprise::SplunkEnterprise, indexer::IndexerCluster, license_master::LicenseMaster,
    monitoring_console::MonitoringConsole, search_head::SearchHeadCluster, spark::Spark,
    standalone::Standalone,
};
use splunk_operator::metrics::RecorderSink;
use splunk_operator::secrets::ThreadRngSource;
use splunk_operator::store::KubeStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("splunk-operator starting up");

    let config = OperatorConfig::from_env()?;
    info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        workers = config.workers,
        "configuration loaded"
    );
    let client = Client::try_default().await?;

    // one context, so the worker bound applies across every kind
    let ctx = Arc::new(Context::new(
        KubeStore::new(client.clone()),
        config,
        Arc::new(RecorderSink),
        Arc::new(ThreadRngSource),
    ));

    tokio::select! {
        _ = run::<Standalone, _>(client.clone(), ctx.clone()) => {},
        _ = run::<SearchHeadCluster, _>(client.clone(), ctx.clone()) => {},
        _ = run::<IndexerCluster, _>(client.clone(), ctx.clone()) => {},
        _ = run::<LicenseMaster, _>(client.clone(), ctx.clone()) => {},
        _ = run::<MonitoringConsole, _>(client.clone(), ctx.clone()) => {},
        _ = run::<Spark, _>(client.clone(), ctx.clone()) => {},
        _ = run::<SplunkEnterprise, _>(client.clone(), ctx.clone()) => {},
        _ = tokio::signal::ctrl_c() => { info!("shutdown signal received"); }
    }
    Ok(())
}
