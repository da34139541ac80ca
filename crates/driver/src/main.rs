use anyhow::{Context, Result};
use clap::Parser;
use pd_csi_driver::{
  cloud::{CloudClient, GceProvider},
  config::{Args, CloudConfig},
  controller::GceController,
  device::DeviceResolver,
  driver::{Driver, DriverConfig},
  lock::OperationLocks,
  metadata::Metadata,
  node::GceNode,
};
use pd_csi_mount_utils::DefaultMounter;
use pd_csi_proto::Endpoint;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
  let mut terminate = match signal(SignalKind::terminate()) {
    Ok(terminate) => terminate,
    Err(err) => {
      warn!(%err, "failed to listen for SIGTERM");
      let _ = tokio::signal::ctrl_c().await;
      return;
    }
  };

  tokio::select! {
    _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
    _ = terminate.recv() => info!("received SIGTERM"),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| args.log_level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  if !args.run_controller_service && args.cloud_config.is_some() {
    warn!("controller service is disabled but cloud config given - it has no effect");
  }

  let endpoint: Endpoint = args.endpoint.parse()?;
  let cloud_config = match &args.cloud_config {
    Some(path) => CloudConfig::from_file(path)?,
    None => CloudConfig::default(),
  };

  let http = reqwest::Client::new();
  let meta = Metadata::fetch(&http)
    .await
    .context("failed to read instance metadata")?
    .with_overrides(cloud_config.project_id.as_deref(), cloud_config.zone.as_deref());
  info!(project = meta.project(), zone = meta.zone(), instance = meta.instance_name(), "running on instance");

  let locks = OperationLocks::new();

  let controller = if args.run_controller_service {
    let provider = GceProvider::new(
      http.clone(),
      &cloud_config.compute_endpoint,
      cloud_config.token_url.as_deref(),
    );
    let cloud = CloudClient::new(Arc::new(provider), cloud_config.retry_policy());
    Some(
      GceController::new(cloud, meta.clone(), locks.clone())
        .with_extra_labels(cloud_config.extra_labels.clone()),
    )
  } else {
    None
  };

  let node = if args.run_node_service {
    let mounter = DefaultMounter::new()
      .await
      .context("failed to set up the mounter")?;
    Some(GceNode::new(
      Arc::new(mounter),
      DeviceResolver::default(),
      meta,
      locks,
    ))
  } else {
    None
  };

  let driver = Driver::new(
    DriverConfig {
      name: args.driver_name,
      vendor_version: args.vendor_version,
    },
    controller,
    node,
  )?;

  driver.run(endpoint, shutdown_signal()).await?;
  Ok(())
}
