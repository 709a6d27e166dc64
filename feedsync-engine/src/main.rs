use feedsync_client::{ApiClient, ApiError, WebSocketPushSource};
use feedsync_engine::{
    config::{ConfigError, FeedConfig},
    error::SyncError,
    feed::FeedManager,
    realtime::RealtimeCoordinator,
    upload::registry::SessionRegistry,
};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
enum InitError {
    #[error("Error reading configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Error building api client: {0}")]
    Client(#[from] ApiError),
    #[error("Error syncing feed: {0}")]
    Sync(#[from] SyncError),
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "feedsync_engine=debug,\
                feedsync_client=debug,\
                feedsync_common=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let config = FeedConfig::from_env()?;

    let api = Arc::new(ApiClient::new(
        config.api_base_url.clone(),
        config.api_token.clone(),
    )?);
    let feed = Arc::new(FeedManager::new(
        api,
        Arc::new(config.identity_store()),
        config.feed_settings()?,
    ));

    let outcome = feed.load_first_page().await?;
    info!(?outcome, posts = feed.status().len, "Feed loaded");

    let push = Arc::new(WebSocketPushSource::new(
        config.push_url.clone(),
        config.api_token.clone(),
    ));
    let coordinator = RealtimeCoordinator::new(
        push,
        Arc::clone(&feed),
        SessionRegistry::spawn(),
        config.realtime_settings()?,
    );

    let mut indicator = coordinator.indicator().subscribe();
    tokio::spawn(async move {
        while indicator.changed().await.is_ok() {
            let visible = *indicator.borrow_and_update();
            info!(visible, "New content indicator changed");
        }
    });

    let mut status = feed.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            info!(
                revision = current.revision,
                posts = current.len,
                refreshing = current.refreshing,
                "Feed changed"
            );
        }
    });

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutting down");
                    shutdown.cancel();
                }
                Err(err) => error!(error = %err, "Could not listen for Ctrl-C"),
            }
        }
    });

    coordinator.run(shutdown).await?;
    Ok(())
}
