use std::sync::Arc;

use anyhow::Context as _;
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kurage::channels::discord::deregister_commands;
use kurage::channels::{DiscordHandler, DiscordPublisher};
use kurage::config::BotConfig;
use kurage::feed::NitterFetcher;
use kurage::links::LinkRewriter;
use kurage::registrations::RegistrationService;
use kurage::relay::Dispatcher;
use kurage::store::{LibSqlBackend, RegistrationStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        feed = %config.relay.feed_base_url,
        viewer = %config.relay.viewer_base_url,
        "Starting kurage"
    );

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn RegistrationStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    info!(path = %config.db_path.display(), "Database ready");

    // ── Discord ──────────────────────────────────────────────────────────
    let links = LinkRewriter::new(config.relay.viewer_base_url.clone());
    let registrations = Arc::new(RegistrationService::new(
        Arc::clone(&store),
        config.relay.accounts_limit,
    ));
    let handler = DiscordHandler::new(registrations, links.clone(), config.watching.clone());

    let mut client = serenity::Client::builder(
        config.bot_token.expose_secret(),
        DiscordHandler::intents(),
    )
    .event_handler(handler)
    .await
    .context("failed to build Discord client")?;
    let http = Arc::clone(&client.http);
    let shard_manager = Arc::clone(&client.shard_manager);

    // ── Relay ────────────────────────────────────────────────────────────
    let fetcher = Arc::new(
        NitterFetcher::new(
            config.relay.feed_base_url.clone(),
            config.relay.poll.request_timeout,
        )
        .context("failed to build feed client")?,
    );
    let publisher = Arc::new(DiscordPublisher::new(Arc::clone(&http)));

    let shutdown = CancellationToken::new();
    let events = store.subscribe();
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        fetcher,
        publisher,
        links,
        config.relay.poll.clone(),
        shutdown.clone(),
    );
    let mut dispatcher_task = tokio::spawn(dispatcher.run(events));

    let gateway_task = tokio::spawn(async move {
        if let Err(e) = client.start().await {
            error!(error = %e, "Discord gateway stopped");
        }
    });

    // Run until Ctrl+C, or until the relay gives up on its own.
    let relay_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for ctrl-c");
            }
            info!("Shutting down");
            None
        }
        result = &mut dispatcher_task => {
            error!("Relay stopped unexpectedly; shutting down");
            Some(result)
        }
    };
    shutdown.cancel();

    match deregister_commands(&http).await {
        Ok(count) => info!(count, "Removed slash commands"),
        Err(e) => warn!(error = %e, "Failed to remove slash commands"),
    }

    let relay_result = match relay_exit {
        Some(result) => result,
        None => dispatcher_task.await,
    };
    let relay_failed = match relay_result {
        Ok(Ok(())) => false,
        Ok(Err(e)) => {
            error!(error = %e, "Dispatcher failed");
            true
        }
        Err(e) => {
            error!(error = %e, "Dispatcher task panicked");
            true
        }
    };

    shard_manager.shutdown_all().await;
    if let Err(e) = gateway_task.await {
        warn!(error = %e, "Gateway task did not exit cleanly");
    }

    info!("Shutdown complete");
    if relay_failed {
        anyhow::bail!("relay stopped with an error");
    }
    Ok(())
}
