// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `zapdesk serve` command implementation.
//!
//! Wires storage, the session registry, the realtime layer, the inbound
//! pipeline and the gateway together, then runs until SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use zapdesk_config::model::{ServerConfig as LogConfig, ZapdeskConfig};
use zapdesk_core::{StorageAdapter, SharedClock, SystemClock, ZapdeskError};
use zapdesk_gateway::{AuthConfig, GatewayState, HealthState, ServerConfig, start_server};
use zapdesk_pipeline::integrations::WebhookIntegration;
use zapdesk_pipeline::kv::InMemoryKv;
use zapdesk_pipeline::media::FsMediaStore;
use zapdesk_pipeline::shutdown;
use zapdesk_pipeline::{Collaborators, Pipeline, PipelineDeps};
use zapdesk_prometheus::PrometheusAdapter;
use zapdesk_realtime::Realtime;
use zapdesk_storage::SqliteStorage;
use zapdesk_whatsapp::SessionRegistry;

use crate::{channels, heap};

/// Wire events buffered between transports and the pipeline's dispatcher.
const EVENT_QUEUE: usize = 1024;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the `zapdesk serve` command.
pub async fn run_serve(config: ZapdeskConfig) -> Result<(), ZapdeskError> {
    init_tracing(&config.server);

    info!(name = %config.server.name, "starting zapdesk serve");

    let clock: SharedClock = Arc::new(SystemClock);
    let storage = {
        let storage = SqliteStorage::with_clock(config.storage.clone(), clock.clone());
        storage.initialize().await?;
        Arc::new(storage)
    };

    let prometheus = match PrometheusAdapter::new() {
        Ok(adapter) => {
            info!("prometheus metrics enabled");
            Some(Arc::new(adapter))
        }
        Err(e) => {
            warn!(error = %e, "prometheus initialization failed, continuing without metrics");
            None
        }
    };

    let realtime = Realtime::new(
        config.pool.clone(),
        config.batcher.clone(),
        config.memory.clone(),
        clock.clone(),
        heap::probe(),
        storage.clone(),
    );

    let registry = Arc::new(SessionRegistry::new());
    let deps = PipelineDeps::new(
        storage.clone(),
        registry.clone(),
        Arc::new(realtime.batcher.clone()),
        clock,
    );

    let collaborators = collaborators(&config)?;
    let media = FsMediaStore::new(
        &config.whatsapp.media_dir,
        "/media",
        Duration::from_secs(config.whatsapp.request_timeout_secs.max(1)),
    )?;
    let pipeline = Arc::new(Pipeline::new(
        deps,
        &config,
        collaborators,
        Some(Arc::new(media)),
        Arc::new(InMemoryKv::new()),
    ));

    let cancel = shutdown::install_signal_handler();
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

    let mut tasks =
        channels::connect_all(storage.as_ref(), &registry, &config, &events_tx, &cancel).await?;
    tasks.extend(realtime.spawn_background(&cancel));
    tasks.extend(pipeline.spawn_background(cancel.child_token()));
    tasks.push(tokio::spawn(
        Arc::clone(&pipeline).run(events_rx, cancel.child_token()),
    ));
    info!(tasks = tasks.len(), "background tasks started");

    let state = GatewayState {
        pipeline,
        events: events_tx,
        realtime: realtime.clone(),
        auth: AuthConfig::new(config.gateway.bearer_token.clone()),
        app_secret: config.gateway.app_secret.as_deref().map(Arc::from),
        health: HealthState {
            start_time: Instant::now(),
            prometheus_render: prometheus.map(|p| {
                Arc::new(move || p.render()) as Arc<dyn Fn() -> String + Send + Sync>
            }),
        },
    };

    let served = start_server(&ServerConfig::from_config(&config), state, cancel.clone()).await;
    if let Err(e) = &served {
        error!(error = %e, "gateway stopped unexpectedly");
        cancel.cancel();
    }

    realtime.batcher.flush_all().await;
    shutdown::drain_tasks(tasks, DRAIN_TIMEOUT).await;
    channels::shutdown_all(&registry).await;
    if let Err(e) = storage.close().await {
        warn!(error = %e, "storage close failed");
    }

    info!("zapdesk serve shutdown complete");
    served
}

/// Disabled collaborators, plus the webhook integration when configured.
fn collaborators(config: &ZapdeskConfig) -> Result<Collaborators, ZapdeskError> {
    if config.integrations.is_empty() {
        return Ok(Collaborators::default());
    }
    let integrations = WebhookIntegration::new(&config.integrations)?;
    info!(count = integrations.len(), "webhook integrations enabled");
    Ok(Collaborators {
        integrations: Arc::new(integrations),
        ..Collaborators::default()
    })
}

fn init_tracing(config: &LogConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zapdesk={},warn", config.log_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false);

    if config.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zapdesk_config::model::IntegrationConfig;

    #[test]
    fn no_integrations_keeps_the_defaults() {
        assert!(collaborators(&ZapdeskConfig::default()).is_ok());
    }

    #[test]
    fn configured_integrations_are_wired() {
        let mut config = ZapdeskConfig::default();
        config.integrations.push(IntegrationConfig {
            id: 3,
            url: "http://127.0.0.1:5678/webhook/zapdesk".into(),
            token: None,
            timeout_secs: 5,
        });
        assert!(collaborators(&config).is_ok());
    }
}
