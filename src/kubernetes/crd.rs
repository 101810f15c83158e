// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::constants::crd::{GROUP, KIND, POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS, VERSION};
use crate::error::Result;
use kube::{discovery::Discovery, Client};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for the RegistryCredentialInjector CRD to be served.
///
/// Polls with exponential backoff from `POLL_INTERVAL_SECS` up to `POLL_MAX_INTERVAL_SECS`.
/// Returns `false` when canceled before the CRD appeared.
pub async fn wait_for_injector_crd(client: &Client, cancel: &CancellationToken) -> Result<bool> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match check_injector_crd_exists(client).await {
            Ok(true) => {
                info!("{} CRD ({}/{}) is available", KIND, GROUP, VERSION);
                return Ok(true);
            }
            Ok(false) => {
                info!(
                    "{} CRD ({}/{}) not yet available, waiting {} seconds...",
                    KIND, GROUP, VERSION, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for {} CRD: {}, retrying in {} seconds...",
                    KIND, e, interval
                );
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            _ = sleep(Duration::from_secs(interval)) => {}
        }

        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

async fn check_injector_crd_exists(client: &Client) -> Result<bool> {
    let discovery = Discovery::new(client.clone())
        .filter(&[GROUP])
        .run()
        .await?;

    for group in discovery.groups() {
        if group.name() != GROUP {
            continue;
        }
        for (ar, _caps) in group.recommended_resources() {
            if ar.kind == KIND && ar.version == VERSION {
                return Ok(true);
            }
        }
    }

    Ok(false)
}
