//! Reacting to the workspace push channel.

pub mod indicator;

use crate::{
    config::RealtimeSettings,
    error::{Result, SyncError},
    feed::FeedManager,
    upload::registry::SessionRegistry,
};
use feedsync_client::{PushError, PushSource};
use feedsync_common::model::{Id, event::PushEvent, post::PostMarker};
use futures::StreamExt;
use indicator::NewContentIndicator;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum EventDisposition {
    Ignored,
    /// One of our own uploads went live. The feed was refreshed silently.
    SelfCompletion(Id<PostMarker>),
    /// Someone else posted. The indicator was notified.
    PeerContent(Id<PostMarker>),
}

pub struct RealtimeCoordinator {
    push: Arc<dyn PushSource>,
    feed: Arc<FeedManager>,
    registry: SessionRegistry,
    indicator: NewContentIndicator,
    settings: RealtimeSettings,
}

impl std::fmt::Debug for RealtimeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeCoordinator")
            .field("indicator", &self.indicator)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RealtimeCoordinator {
    #[must_use]
    pub fn new(
        push: Arc<dyn PushSource>,
        feed: Arc<FeedManager>,
        registry: SessionRegistry,
        settings: RealtimeSettings,
    ) -> Self {
        Self {
            push,
            feed,
            registry,
            indicator: NewContentIndicator::spawn(settings.debounce, settings.auto_hide),
            settings,
        }
    }

    #[must_use]
    pub fn indicator(&self) -> &NewContentIndicator {
        &self.indicator
    }

    /// Classifies one raw push frame and acts on it.
    pub async fn handle_frame(&self, frame: &str) -> Result<EventDisposition> {
        let post_id = match PushEvent::parse(frame) {
            Ok(PushEvent::NewPost(post_id)) => post_id,
            Ok(PushEvent::Other(event_type)) => {
                debug!(event_type, "Ignoring push event");
                return Ok(EventDisposition::Ignored);
            }
            Err(err) => {
                warn!(error = %err, "Ignoring malformed push frame");
                return Ok(EventDisposition::Ignored);
            }
        };

        let own_upload = match self.registry.announce(post_id.clone()).await {
            Ok(own_upload) => own_upload,
            Err(err) => {
                warn!(%post_id, error = %err, "Could not match push event against uploads");
                false
            }
        };

        if own_upload {
            info!(%post_id, "Own upload is live, refreshing");
            if let Err(err) = self.feed.refresh_after_in_flight().await {
                warn!(%post_id, error = %err, "Silent refresh failed");
            }
            Ok(EventDisposition::SelfCompletion(post_id))
        } else {
            debug!(%post_id, "New content from someone else");
            self.indicator.notify();
            Ok(EventDisposition::PeerContent(post_id))
        }
    }

    /// Refreshes the feed if the indicator was showing, and hides it.
    pub async fn accept_new_content(&self) -> Result<bool> {
        if !self.indicator.dismiss().await {
            return Ok(false);
        }

        self.feed.refresh_after_in_flight().await?;
        Ok(true)
    }

    fn reconnect_delay(&self, failures: u32) -> Duration {
        let base = self.settings.reconnect_base_delay.get();
        let exponent = failures.saturating_sub(1).min(16);
        let delay = base.saturating_mul(1 << exponent).min(MAX_RECONNECT_DELAY);

        let jitter_ms = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
        delay + Duration::from_millis(rand::random_range(0..=jitter_ms))
    }

    /// Listens until `shutdown` fires.
    ///
    /// Lost subscriptions are retried with exponential backoff. The budget of
    /// consecutive failures resets whenever a subscription delivered a frame.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let workspace_id = self.feed.scope()?.identity.workspace_id;
        let mut failures = 0u32;

        loop {
            let subscribed = tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                subscribed = self.push.subscribe(&workspace_id) => subscribed,
            };

            let last_error: Option<PushError> = match subscribed {
                Ok(mut stream) => {
                    info!(%workspace_id, "Subscribed to push channel");
                    let mut delivered = false;

                    let ended = loop {
                        let frame = tokio::select! {
                            () = shutdown.cancelled() => return Ok(()),
                            frame = stream.next() => frame,
                        };

                        match frame {
                            Some(Ok(text)) => {
                                delivered = true;
                                self.handle_frame(&text).await?;
                            }
                            Some(Err(err)) => break Some(err),
                            None => break None,
                        }
                    };

                    if delivered {
                        failures = 0;
                    }
                    ended
                }
                Err(err) => Some(err),
            };

            failures += 1;
            match &last_error {
                Some(err) => warn!(failures, error = %err, "Push subscription lost"),
                None => warn!(failures, "Push subscription ended"),
            }
            if failures > self.settings.reconnect_attempts {
                return Err(SyncError::PushClosed {
                    attempts: self.settings.reconnect_attempts,
                    source: last_error,
                });
            }

            let delay = self.reconnect_delay(failures);
            debug!(?delay, "Reconnecting push channel");
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
