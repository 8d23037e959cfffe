use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use archivist_access::{load_channel_registrations, AuthorizationContext};
use archivist_commands::{CommandDispatcher, CommandOutcome, ShutdownSignal};
use archivist_history::{
    HistoryJobOrchestrator, HistoryJobRegistry, HistoryOrchestratorConfig, PagedHistoryWorker,
    PagedHistoryWorkerConfig, ReplySink,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cli_args::Cli;
use crate::config::{load_archivist_config, ArchivistConfig};
use crate::fixture_history_source::FixtureHistorySource;
use crate::stdio_transport::{parse_inbound_line, StdoutReplySink};

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) config: ArchivistConfig,
    pub(crate) fixtures_dir: PathBuf,
}

pub(crate) fn resolve_runtime_settings(cli: &Cli) -> Result<RuntimeSettings> {
    let mut config = load_archivist_config(&cli.config)?;
    if cli.asynchronous_history {
        config.asynchronous_history = true;
    }
    Ok(RuntimeSettings {
        config,
        fixtures_dir: cli.fixtures_dir.clone(),
    })
}

pub(crate) fn build_dispatcher(
    settings: &RuntimeSettings,
    replies: Arc<dyn ReplySink>,
) -> CommandDispatcher {
    let config = &settings.config;
    let source = FixtureHistorySource::new(
        settings.fixtures_dir.clone(),
        Duration::from_millis(config.history_page_delay_ms),
    );
    let worker = PagedHistoryWorker::new(
        source,
        Arc::clone(&replies),
        PagedHistoryWorkerConfig {
            catalog_dir: config.catalog_dir.clone(),
            page_size: config.history_page_size,
        },
    );
    let orchestrator = HistoryJobOrchestrator::new(
        HistoryOrchestratorConfig {
            command_prefix: config.command_prefix.clone(),
            asynchronous_history: config.asynchronous_history,
        },
        HistoryJobRegistry::new(),
        Arc::new(worker),
        Arc::clone(&replies),
    );
    CommandDispatcher::new(Arc::new(orchestrator), replies, ShutdownSignal::new())
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let settings = resolve_runtime_settings(&cli)?;
    let registrations = load_channel_registrations(&settings.config.registrations_path)
        .with_context(|| {
            format!(
                "failed to load channel registrations from {}",
                settings.config.registrations_path.display()
            )
        })?;
    let auth = Arc::new(AuthorizationContext::new(
        settings.config.bot_admins.iter().cloned(),
        registrations,
    ));
    let dispatcher = Arc::new(build_dispatcher(&settings, Arc::new(StdoutReplySink::default())));
    info!(
        registered_channels = auth.registered_channel_ids().len(),
        bot_admins = settings.config.bot_admins.len(),
        asynchronous_history = settings.config.asynchronous_history,
        "archivist started"
    );
    serve_lines(auth, dispatcher).await
}

async fn serve_lines(
    auth: Arc<AuthorizationContext>,
    dispatcher: Arc<CommandDispatcher>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shutdown = dispatcher.shutdown().subscribe();
    let mut tasks = JoinSet::new();
    let cancel_running = loop {
        while let Some(joined) = tasks.try_join_next() {
            log_dispatch_join(joined);
        }
        tokio::select! {
            _ = shutdown.wait() => break true,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break true;
            }
            next = lines.next_line() => {
                let Some(line) = next.context("failed reading stdin")? else {
                    debug!("stdin closed");
                    break false;
                };
                let message = match parse_inbound_line(&line) {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(error) => {
                        warn!(%error, "skipping inbound line");
                        continue;
                    }
                };
                let auth = Arc::clone(&auth);
                let dispatcher = Arc::clone(&dispatcher);
                tasks.spawn(async move { dispatcher.dispatch(&auth, &message).await });
            }
        }
    };

    if cancel_running {
        let cancelled = dispatcher.orchestrator().close();
        if !cancelled.is_empty() {
            info!(channels = ?cancelled, "cancelled running history jobs for shutdown");
        }
    }
    while let Some(joined) = tasks.join_next().await {
        log_dispatch_join(joined);
    }
    dispatcher.orchestrator().join_detached().await;
    info!("archivist stopped");
    Ok(())
}

fn log_dispatch_join(joined: Result<CommandOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(CommandOutcome::History(outcome)) => debug!(
            decision = outcome.decision.reason_code(),
            actions = outcome.actions.len(),
            replies = outcome.replies_delivered,
            "history command finished"
        ),
        Ok(outcome) => debug!(?outcome, "command finished"),
        Err(error) => warn!(%error, "command task ended abnormally"),
    }
}
