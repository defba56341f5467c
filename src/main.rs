// harbormaster/src/main.rs

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use harbormaster::adapters::docker::DockerHost;
use harbormaster::config::AppConfig;
use harbormaster::core::{gc, reconcile, session};
use harbormaster::notify::LogNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = AppConfig::load();
    info!(
        "🕹️ Harbormaster v{} | Node: {} | Interval: {}s",
        env!("CARGO_PKG_VERSION"),
        cfg.node_name,
        cfg.poll_interval
    );

    let host = DockerHost::new(&cfg.docker_socket, cfg.node_name.clone())?;

    // Which container are we? Needed for self-update targeting and for the
    // startup reconciliation of older instances.
    let current = match &cfg.self_hostname {
        Some(hostname) => match host.find_current_container(hostname).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "could not determine own container, self-update disabled");
                None
            }
        },
        None => None,
    };
    match &current {
        Some(c) => info!(id = %c.id().short(), "running as container {}", c.name()),
        None => info!("not running inside a watched container"),
    }
    let current_id = current.as_ref().map(|c| c.id().clone());

    if let Some(cur) = &current {
        let mut leftover_images = Vec::new();
        let scope = cfg.effective_scope().unwrap_or_default();
        match reconcile::reconcile_instances(&host, cfg.cleanup, &scope, cur, &mut leftover_images)
            .await
        {
            Ok(0) => {}
            Ok(stopped) => info!(stopped, "🧹 cleaned up excess updater instances"),
            Err(e) => warn!(error = %e, "instance reconciliation incomplete"),
        }
        if !leftover_images.is_empty() {
            let (cleaned, err) = gc::remove_stale_images(&host, &leftover_images).await;
            info!(removed = cleaned.len(), "removed images of prior instances");
            if let Some(e) = err {
                warn!(error = %e, "image cleanup after reconciliation incomplete");
            }
        }
    }

    let params = cfg.update_params(current_id);
    let notifier = LogNotifier::new();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown requested, cancelling session in flight");
                cancel.cancel();
            }
        });
    }

    if cfg.run_once {
        info!("run-once mode, performing a single session");
        session::run_session(&host, &notifier, &params, &cancel).await?;
        return Ok(());
    }

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.poll_interval.max(1)));
    loop {
        interval.tick().await;
        if cancel.is_cancelled() {
            info!("shutting down");
            return Ok(());
        }
        if let Err(e) = session::run_session(&host, &notifier, &params, &cancel).await {
            error!(error = %e, "session failed");
        }
        if cancel.is_cancelled() {
            info!("shutting down");
            return Ok(());
        }
    }
}
