//! Post creation with attachments.
//!
//! A session runs `Created -> HandshakeInFlight -> TransferInFlight ->
//! AllTransferred` or stops in `HandshakeFailed` / `TransferFailed`. Its
//! placeholder id is registered with the [`SessionRegistry`] before the first
//! byte is sent, so a push confirmation can never overtake it unseen.

pub mod registry;
pub mod session;

use crate::{
    config::UploadSettings,
    error::{Result, SyncError},
    feed::FeedManager,
};
use feedsync_client::{MediaTransfer, PostApi, RequestScope};
use feedsync_common::{
    model::{
        Id,
        media::{LocalMedia, MediaMetadata},
        post::PostMarker,
    },
    util::PositiveDuration,
};
use futures::future::join_all;
use registry::{Registration, SessionRegistry};
use session::{TransferState, UploadPhase, UploadSession};
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ConfirmationOutcome {
    /// The push channel announced the post.
    Confirmed,
    /// Nothing arrived within the configured wait. The post's state is unknown.
    TimedOut,
    /// The registry dropped the session.
    Abandoned,
}

/// Wait for the push announcement of an uploaded post.
#[derive(Debug)]
pub struct Confirmation {
    post_id: Id<PostMarker>,
    registration: Registration,
    timeout: PositiveDuration,
    registry: SessionRegistry,
}

impl Confirmation {
    pub async fn wait(self) -> ConfirmationOutcome {
        let Registration::Pending(confirmed) = self.registration else {
            return ConfirmationOutcome::Confirmed;
        };

        match tokio::time::timeout(self.timeout.get(), confirmed).await {
            Ok(Ok(())) => ConfirmationOutcome::Confirmed,
            Ok(Err(_)) => ConfirmationOutcome::Abandoned,
            Err(_) => {
                warn!(post_id = %self.post_id, timeout = ?self.timeout.get(), "Upload was not confirmed in time");
                if let Err(err) = self.registry.forget(self.post_id).await {
                    debug!(error = %err, "Could not forget timed out session");
                }
                ConfirmationOutcome::TimedOut
            }
        }
    }
}

#[derive(Debug)]
pub struct UploadReceipt {
    pub post_id: Id<PostMarker>,
    pub confirmation: Confirmation,
}

/// A running upload.
#[derive(Debug)]
pub struct UploadHandle {
    progress: watch::Receiver<UploadSession>,
    task: JoinHandle<Result<UploadReceipt>>,
}

impl UploadHandle {
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<UploadSession> {
        self.progress.clone()
    }

    pub async fn finished(self) -> Result<UploadReceipt> {
        self.task.await.map_err(|err| {
            warn!(error = %err, "Upload task did not finish");
            SyncError::Aborted
        })?
    }
}

#[derive(Clone)]
pub struct UploadPipeline {
    api: Arc<dyn PostApi>,
    transfer: Arc<dyn MediaTransfer>,
    feed: Arc<FeedManager>,
    registry: SessionRegistry,
    settings: UploadSettings,
}

impl std::fmt::Debug for UploadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPipeline")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl UploadPipeline {
    #[must_use]
    pub fn new(
        api: Arc<dyn PostApi>,
        transfer: Arc<dyn MediaTransfer>,
        feed: Arc<FeedManager>,
        registry: SessionRegistry,
        settings: UploadSettings,
    ) -> Self {
        Self {
            api,
            transfer,
            feed,
            registry,
            settings,
        }
    }

    /// Validates the submission and starts it in the background.
    ///
    /// Empty posts and a missing identity fail here, before any request.
    pub fn start(&self, text: impl Into<String>, media: Vec<LocalMedia>) -> Result<UploadHandle> {
        let text = text.into();
        if text.trim().is_empty() && media.is_empty() {
            return Err(SyncError::EmptyPost);
        }
        let scope = self.feed.scope()?;

        let (progress, receiver) = watch::channel(UploadSession::new(media.clone()));
        let pipeline = self.clone();
        let task = tokio::spawn(async move { pipeline.run(scope, text, media, progress).await });

        Ok(UploadHandle {
            progress: receiver,
            task,
        })
    }

    pub async fn submit(
        &self,
        text: impl Into<String>,
        media: Vec<LocalMedia>,
    ) -> Result<UploadReceipt> {
        self.start(text, media)?.finished().await
    }

    async fn run(
        self,
        scope: RequestScope,
        text: String,
        media: Vec<LocalMedia>,
        progress: watch::Sender<UploadSession>,
    ) -> Result<UploadReceipt> {
        progress.send_modify(|session| session.phase = UploadPhase::HandshakeInFlight);

        let metadata: Vec<MediaMetadata> = media.iter().map(LocalMedia::metadata).collect();
        let handshake = match self.api.create_post(&scope, &text, &metadata).await {
            Ok(handshake) => handshake,
            Err(err) => {
                warn!(error = %err, "Post creation handshake failed");
                progress.send_modify(|session| {
                    session.phase = UploadPhase::HandshakeFailed(err.to_string());
                });
                return Err(err.into());
            }
        };

        if handshake.upload_targets.len() != media.len() {
            let err = SyncError::ProtocolMismatch {
                submitted: media.len(),
                returned: handshake.upload_targets.len(),
            };
            warn!(error = %err, post_id = %handshake.placeholder_post_id, "Handshake does not match submission");
            progress.send_modify(|session| {
                session.phase = UploadPhase::HandshakeFailed(err.to_string());
            });
            return Err(err);
        }

        let post_id = handshake.placeholder_post_id;
        let registration = self.registry.register(post_id.clone()).await?;
        let targets = handshake.upload_targets;
        progress.send_modify(|session| {
            session.assign_targets(post_id.clone(), targets.clone());
            session.phase = UploadPhase::TransferInFlight;
        });
        info!(%post_id, items = media.len(), "Transferring attachments");

        let transfer = self.transfer.as_ref();
        let progress_ref = &progress;
        let transfers = media
            .iter()
            .zip(&targets)
            .enumerate()
            .map(|(index, (item, target))| async move {
                progress_ref.send_modify(|session| session.set_state(index, TransferState::Transferring));

                let state = match transfer.transfer(item, target).await {
                    Ok(()) => TransferState::Succeeded,
                    Err(err) => {
                        warn!(index, path = %item.path.display(), error = %err, "Attachment transfer failed");
                        TransferState::Failed(err.to_string())
                    }
                };
                progress_ref.send_modify(|session| session.set_state(index, state));
            });
        join_all(transfers).await;

        let failed = progress.borrow().failed_items();
        if !failed.is_empty() {
            if let Err(err) = self.registry.forget(post_id.clone()).await {
                debug!(error = %err, "Could not forget failed session");
            }
            progress.send_modify(|session| session.phase = UploadPhase::TransferFailed);
            return Err(SyncError::TransferFailed(failed));
        }

        progress.send_modify(|session| session.phase = UploadPhase::AllTransferred);
        info!(%post_id, "All attachments transferred");

        if matches!(registration, Registration::AlreadyAnnounced) {
            if let Err(err) = self.feed.refresh_after_in_flight().await {
                warn!(%post_id, error = %err, "Could not refresh after confirmed upload");
            }
        }

        Ok(UploadReceipt {
            post_id: post_id.clone(),
            confirmation: Confirmation {
                post_id,
                registration,
                timeout: self.settings.confirmation_timeout,
                registry: self.registry,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{FeedSettings, UploadSettings};
    use crate::error::SyncError;
    use crate::feed::FeedManager;
    use crate::testing::{FakePostApi, FakeTransfer, identity_store, local_media, rejected, target};
    use crate::upload::registry::SessionRegistry;
    use crate::upload::session::{TransferState, UploadPhase};
    use crate::upload::{ConfirmationOutcome, UploadPipeline};
    use feedsync_client::Handshake;
    use feedsync_common::model::Id;
    use std::sync::Arc;

    struct Harness {
        api: Arc<FakePostApi>,
        transfer: Arc<FakeTransfer>,
        registry: SessionRegistry,
        pipeline: UploadPipeline,
    }

    fn harness() -> Harness {
        let api = Arc::new(FakePostApi::default());
        let transfer = Arc::new(FakeTransfer::default());
        let registry = SessionRegistry::spawn();
        let feed = Arc::new(FeedManager::new(
            api.clone(),
            identity_store(),
            FeedSettings::default(),
        ));
        let pipeline = UploadPipeline::new(
            api.clone(),
            transfer.clone(),
            feed,
            registry.clone(),
            UploadSettings::default(),
        );

        Harness {
            api,
            transfer,
            registry,
            pipeline,
        }
    }

    fn handshake(destinations: &[&str]) -> Handshake {
        Handshake {
            placeholder_post_id: Id::new_unchecked("p42"),
            upload_targets: destinations.iter().map(|dest| target(dest)).collect(),
        }
    }

    #[tokio::test]
    async fn empty_post_makes_no_request() {
        let harness = harness();

        assert!(matches!(
            harness.pipeline.submit("  ", Vec::new()).await,
            Err(SyncError::EmptyPost)
        ));
        assert!(harness.api.created().is_empty());
    }

    #[tokio::test]
    async fn count_mismatch_transfers_nothing() {
        let harness = harness();
        harness
            .api
            .set_handshake(Ok(handshake(&["https://bucket/a", "https://bucket/b"])));

        let media = vec![local_media("a.jpg"), local_media("b.jpg"), local_media("c.jpg")];
        let handle = harness.pipeline.start("three photos", media).unwrap();
        let progress = handle.progress();

        assert!(matches!(
            handle.finished().await,
            Err(SyncError::ProtocolMismatch {
                submitted: 3,
                returned: 2
            })
        ));
        assert!(harness.transfer.calls().is_empty());
        assert_eq!(harness.registry.pending_count(), 0);
        assert!(matches!(
            progress.borrow().phase,
            UploadPhase::HandshakeFailed(_)
        ));
    }

    #[tokio::test]
    async fn handshake_rejection_is_reported() {
        let harness = harness();
        harness.api.set_handshake(Err(rejected(422)));

        assert!(matches!(
            harness.pipeline.submit("hello", Vec::new()).await,
            Err(SyncError::ServerRejected { status: 422, .. })
        ));
    }

    #[tokio::test]
    async fn sends_metadata_then_transfers_every_item() {
        let harness = harness();
        harness
            .api
            .set_handshake(Ok(handshake(&["https://bucket/a", "https://bucket/b"])));

        let handle = harness
            .pipeline
            .start("leg day", vec![local_media("a.JPG"), local_media("b.jpg")])
            .unwrap();
        let progress = handle.progress();
        let receipt = handle.finished().await.unwrap();

        assert_eq!(receipt.post_id.as_str(), "p42");
        let created = harness.api.created();
        let (text, metadata) = &created[0];
        assert_eq!(text, "leg day");
        assert_eq!(metadata[0].extension, "jpg");
        assert_eq!(metadata[1].size_bytes, 1_024);

        let mut calls = harness.transfer.calls();
        calls.sort();
        assert_eq!(calls, ["https://bucket/a", "https://bucket/b"]);

        let session = progress.borrow().clone();
        assert_eq!(session.phase, UploadPhase::AllTransferred);
        assert_eq!(session.correlation_post_id, Some(Id::new_unchecked("p42")));
        assert!(session.all_succeeded());
        assert_eq!(harness.registry.pending_count(), 1);

        assert!(harness.registry.announce(Id::new_unchecked("p42")).await.unwrap());
        assert_eq!(
            receipt.confirmation.wait().await,
            ConfirmationOutcome::Confirmed
        );
    }

    #[tokio::test]
    async fn failed_item_does_not_cancel_siblings() {
        let harness = harness();
        harness.api.set_handshake(Ok(handshake(&[
            "https://bucket/a",
            "https://bucket/b",
            "https://bucket/c",
        ])));
        harness.transfer.fail("https://bucket/b");

        let handle = harness
            .pipeline
            .start(
                "",
                vec![local_media("a.jpg"), local_media("b.jpg"), local_media("c.jpg")],
            )
            .unwrap();
        let progress = handle.progress();

        let Err(SyncError::TransferFailed(failed)) = handle.finished().await else {
            panic!("expected a transfer failure");
        };
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].index, 1);
        assert_eq!(failed[0].path, std::path::Path::new("/tmp/b.jpg"));

        assert_eq!(harness.transfer.calls().len(), 3);
        let session = progress.borrow().clone();
        assert_eq!(session.phase, UploadPhase::TransferFailed);
        assert_eq!(session.items[0].state, TransferState::Succeeded);
        assert_eq!(session.items[2].state, TransferState::Succeeded);
        assert_eq!(harness.registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_upload_times_out() {
        let harness = harness();
        harness.api.set_handshake(Ok(handshake(&[])));

        let receipt = harness.pipeline.submit("text only", Vec::new()).await.unwrap();
        assert_eq!(harness.registry.pending_count(), 1);

        assert_eq!(
            receipt.confirmation.wait().await,
            ConfirmationOutcome::TimedOut
        );
        assert_eq!(harness.registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn announcement_before_registration_still_confirms() {
        let harness = harness();
        harness.api.set_handshake(Ok(handshake(&[])));
        assert!(!harness.registry.announce(Id::new_unchecked("p42")).await.unwrap());

        let receipt = harness.pipeline.submit("quick one", Vec::new()).await.unwrap();

        assert_eq!(
            receipt.confirmation.wait().await,
            ConfirmationOutcome::Confirmed
        );
        assert_eq!(harness.api.requested_pages(), [1]);
    }
}
