// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::{Client, CustomResourceExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rci_operator::config::Config;
use rci_operator::kubernetes::{wait_for_injector_crd, KubeClusterApi};
use rci_operator::reconcilers::{Engine, InjectorReconciler};
use rci_operator::render::{ChartRenderer, TemplateBundle};
use rci_operator::transform::SpecTransformer;
use rci_operator::types::{ManagedKind, RegistryCredentialInjector};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // `crd` prints the CustomResourceDefinition for installation
    if std::env::args().nth(1).as_deref() == Some("crd") {
        print!("{}", serde_yaml::to_string(&RegistryCredentialInjector::crd())?);
        return Ok(());
    }

    info!("Starting registry credential injector operator");

    let config = Arc::new(Config::from_env()?);
    info!(
        "Configuration loaded: watch_namespace={:?}, workers={}",
        config.watch_namespace, config.worker_concurrency
    );

    let bundle = match &config.template_dir {
        Some(dir) => TemplateBundle::from_dir(dir)?,
        None => TemplateBundle::embedded()?,
    };
    info!("Using template bundle {} {}", bundle.name, bundle.version);

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    info!("Waiting for RegistryCredentialInjector CRD to become available...");
    if !wait_for_injector_crd(&client, &cancel).await? {
        warn!("Shutdown requested before the CRD became available");
        return Ok(());
    }

    let mut kinds = config.managed_kinds.clone();
    kinds.push(ManagedKind::injector());
    let cluster = Arc::new(KubeClusterApi::new(
        client.clone(),
        kinds,
        &config.operator_name,
        config.request_timeout,
    ));
    let engine = Engine::new(
        cluster,
        Arc::new(SpecTransformer::new()),
        Arc::new(ChartRenderer::new(Arc::new(bundle))),
        config.clone(),
    );

    InjectorReconciler::new(client, engine, config, cancel)
        .run()
        .await?;

    info!("Operator stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping controller");
    cancel.cancel();
}
