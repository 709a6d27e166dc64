//! The one audio player shared by every item of the feed.
//!
//! Items never own decoders. They ask [`PlaybackController`] for transitions
//! and observe [`PlaybackState`], so two decoders can never be active at once.

pub mod decoder;

use crate::config::PlaybackSettings;
use decoder::{AudioBackend, AudioDecoder, AudioSource, DecoderError, PlaybackItemId};
use feedsync_common::model::{Id, post::PostMarker};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch},
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error("Another item was started before this one finished loading")]
    Superseded,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Loading(PlaybackItemId),
    Playing {
        item: PlaybackItemId,
        position_ms: u64,
    },
    Paused {
        item: PlaybackItemId,
        position_ms: u64,
    },
}

impl PlaybackPhase {
    #[must_use]
    pub fn item(&self) -> Option<&PlaybackItemId> {
        match self {
            PlaybackPhase::Idle => None,
            PlaybackPhase::Loading(item)
            | PlaybackPhase::Playing { item, .. }
            | PlaybackPhase::Paused { item, .. } => Some(item),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct PlaybackState {
    pub phase: PlaybackPhase,
    pub duration_ms: u64,
}

impl PlaybackState {
    #[must_use]
    pub fn active_item(&self) -> Option<&PlaybackItemId> {
        self.phase.item()
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        matches!(self.phase, PlaybackPhase::Playing { .. })
    }

    #[must_use]
    pub fn position_ms(&self) -> u64 {
        match self.phase {
            PlaybackPhase::Playing { position_ms, .. } | PlaybackPhase::Paused { position_ms, .. } => {
                position_ms
            }
            PlaybackPhase::Idle | PlaybackPhase::Loading(_) => 0,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum PlaybackEvent {
    Progress {
        item: PlaybackItemId,
        position_ms: u64,
        duration_ms: u64,
    },
    Completed(PlaybackItemId),
    Stopped(PlaybackItemId),
    Failed {
        item: PlaybackItemId,
        error: DecoderError,
    },
}

#[derive(Default)]
struct Inner {
    phase: PlaybackPhase,
    duration_ms: u64,
    decoder: Option<Box<dyn AudioDecoder>>,
    progress: Option<CancellationToken>,
    generation: u64,
}

impl Inner {
    fn snapshot(&self) -> PlaybackState {
        PlaybackState {
            phase: self.phase.clone(),
            duration_ms: self.duration_ms,
        }
    }

    /// Returns to `Idle`, releasing whatever the previous item held.
    fn reset(&mut self) -> Option<PlaybackItemId> {
        self.generation += 1;
        if let Some(progress) = self.progress.take() {
            progress.cancel();
        }
        if let Some(mut decoder) = self.decoder.take() {
            decoder.release();
        }
        self.duration_ms = 0;

        std::mem::take(&mut self.phase).item().cloned()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.reset();
    }
}

pub struct PlaybackController {
    backend: Arc<dyn AudioBackend>,
    settings: PlaybackSettings,
    inner: Mutex<Inner>,
    state: watch::Sender<PlaybackState>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl PlaybackController {
    #[must_use]
    pub fn new(backend: Arc<dyn AudioBackend>, settings: PlaybackSettings) -> Self {
        let (state, _) = watch::channel(PlaybackState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            backend,
            settings,
            inner: Mutex::new(Inner::default()),
            state,
            events,
        }
    }

    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.state.send_replace(inner.snapshot());
    }

    fn emit(&self, event: PlaybackEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn teardown(&self, inner: &mut Inner) {
        if let Some(item) = inner.reset() {
            debug!(%item, "Stopped playback");
            self.emit(PlaybackEvent::Stopped(item));
        }
    }

    fn fail(&self, inner: &mut Inner, item: PlaybackItemId, error: DecoderError) -> PlaybackError {
        inner.reset();
        warn!(%item, %error, "Playback failed");
        self.emit(PlaybackEvent::Failed {
            item,
            error: error.clone(),
        });
        self.publish(inner);
        PlaybackError::Decoder(error)
    }

    /// Starts `item`, first stopping and releasing anything else that is active.
    ///
    /// Calling this for the paused item resumes it where it was.
    pub async fn play(
        self: &Arc<Self>,
        item: PlaybackItemId,
        source: AudioSource,
    ) -> Result<(), PlaybackError> {
        let generation = {
            let mut inner = self.lock();

            match &inner.phase {
                PlaybackPhase::Paused {
                    item: paused,
                    position_ms,
                } if *paused == item => {
                    let position_ms = *position_ms;
                    return self.resume(&mut inner, item, position_ms);
                }
                PlaybackPhase::Playing { item: playing, .. } | PlaybackPhase::Loading(playing)
                    if *playing == item =>
                {
                    return Ok(());
                }
                _ => {}
            }

            self.teardown(&mut inner);
            inner.phase = PlaybackPhase::Loading(item.clone());
            inner.duration_ms = source.duration_hint_ms.unwrap_or(0);
            self.publish(&inner);
            inner.generation
        };

        debug!(%item, url = source.url, "Loading audio");
        let opened = self.backend.open(&source).await;

        let mut inner = self.lock();
        if inner.generation != generation {
            if let Ok(mut decoder) = opened {
                decoder.release();
            }
            debug!(%item, "Discarding superseded decoder");
            return Err(PlaybackError::Superseded);
        }

        let mut decoder = match opened {
            Ok(decoder) => decoder,
            Err(error) => return Err(self.fail(&mut inner, item, error)),
        };
        if let Err(error) = decoder.play() {
            decoder.release();
            return Err(self.fail(&mut inner, item, error));
        }

        inner.decoder = Some(decoder);
        inner.phase = PlaybackPhase::Playing {
            item: item.clone(),
            position_ms: 0,
        };
        self.start_progress(&mut inner);
        self.publish(&inner);
        debug!(%item, "Playing");
        Ok(())
    }

    fn resume(
        self: &Arc<Self>,
        inner: &mut Inner,
        item: PlaybackItemId,
        position_ms: u64,
    ) -> Result<(), PlaybackError> {
        let resumed = match inner.decoder.as_mut() {
            Some(decoder) => decoder.play(),
            None => Err(DecoderError::new("paused item has no decoder")),
        };
        if let Err(error) = resumed {
            return Err(self.fail(inner, item, error));
        }

        inner.phase = PlaybackPhase::Playing {
            item: item.clone(),
            position_ms,
        };
        self.start_progress(inner);
        self.publish(inner);
        debug!(%item, position_ms, "Resumed");
        Ok(())
    }

    fn start_progress(self: &Arc<Self>, inner: &mut Inner) {
        let token = CancellationToken::new();
        if let Some(previous) = inner.progress.replace(token.clone()) {
            previous.cancel();
        }

        let controller = Arc::downgrade(self);
        let generation = inner.generation;
        let period = self.settings.progress_interval.get();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !poll_progress(&controller, generation) {
                    break;
                }
            }
        });
    }

    /// One progress tick. Returns whether polling should continue.
    fn tick(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        let PlaybackPhase::Playing { item, .. } = &inner.phase else {
            return false;
        };
        let item = item.clone();

        let status = match inner.decoder.as_mut().map(|decoder| decoder.status()) {
            Some(Ok(status)) => status,
            Some(Err(error)) => {
                self.fail(&mut inner, item, error);
                return false;
            }
            None => {
                self.fail(&mut inner, item, DecoderError::new("playing item has no decoder"));
                return false;
            }
        };

        if status.duration_ms > 0 {
            inner.duration_ms = status.duration_ms;
        }
        let duration_ms = inner.duration_ms;

        if duration_ms > 0 && status.position_ms >= duration_ms {
            inner.reset();
            debug!(%item, "Playback completed");
            self.emit(PlaybackEvent::Completed(item));
            self.publish(&inner);
            return false;
        }

        inner.phase = PlaybackPhase::Playing {
            item: item.clone(),
            position_ms: status.position_ms,
        };
        self.emit(PlaybackEvent::Progress {
            item,
            position_ms: status.position_ms,
            duration_ms,
        });
        self.publish(&inner);
        true
    }

    /// Pauses `item` if it is the one playing. Anything else is a no-op.
    pub fn pause(&self, item: &PlaybackItemId) -> Result<(), PlaybackError> {
        let mut inner = self.lock();
        let position_ms = match &inner.phase {
            PlaybackPhase::Playing {
                item: playing,
                position_ms,
            } if playing == item => *position_ms,
            _ => return Ok(()),
        };

        let paused = match inner.decoder.as_mut() {
            Some(decoder) => decoder.pause(),
            None => Err(DecoderError::new("playing item has no decoder")),
        };
        if let Err(error) = paused {
            return Err(self.fail(&mut inner, item.clone(), error));
        }

        if let Some(progress) = inner.progress.take() {
            progress.cancel();
        }
        inner.phase = PlaybackPhase::Paused {
            item: item.clone(),
            position_ms,
        };
        self.publish(&inner);
        debug!(%item, position_ms, "Paused");
        Ok(())
    }

    /// Stops `item` and releases its decoder. Returns whether it was active.
    pub fn stop(&self, item: &PlaybackItemId) -> bool {
        let mut inner = self.lock();
        if inner.phase.item() != Some(item) {
            return false;
        }

        self.teardown(&mut inner);
        self.publish(&inner);
        true
    }

    /// Moves to `fraction` of the known duration. A no-op while the duration is unknown.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn seek(&self, item: &PlaybackItemId, fraction: f64) -> Result<(), PlaybackError> {
        let mut inner = self.lock();
        let is_loaded = matches!(
            &inner.phase,
            PlaybackPhase::Playing { item: active, .. } | PlaybackPhase::Paused { item: active, .. }
                if active == item
        );
        if !is_loaded || inner.duration_ms == 0 || fraction.is_nan() {
            return Ok(());
        }

        let fraction = fraction.clamp(0.0, 1.0);
        let position_ms = (inner.duration_ms as f64 * fraction).round() as u64;

        let sought = match inner.decoder.as_mut() {
            Some(decoder) => decoder.seek(position_ms),
            None => Err(DecoderError::new("loaded item has no decoder")),
        };
        if let Err(error) = sought {
            return Err(self.fail(&mut inner, item.clone(), error));
        }

        match &mut inner.phase {
            PlaybackPhase::Playing {
                position_ms: current,
                ..
            }
            | PlaybackPhase::Paused {
                position_ms: current,
                ..
            } => *current = position_ms,
            PlaybackPhase::Idle | PlaybackPhase::Loading(_) => {}
        }
        self.publish(&inner);
        Ok(())
    }

    /// Stops the active item if it belongs to one of `post_ids`.
    pub fn stop_for_posts(&self, post_ids: &[Id<PostMarker>]) -> bool {
        let mut inner = self.lock();
        let belongs = inner
            .phase
            .item()
            .is_some_and(|item| post_ids.contains(&item.post_id));
        if !belongs {
            return false;
        }

        self.teardown(&mut inner);
        self.publish(&inner);
        true
    }

    /// A carousel of `post_id` now shows `visible_index`.
    ///
    /// Leaving the page that holds the active audio stops it. Other posts are unaffected.
    pub fn on_page_changed(&self, post_id: &Id<PostMarker>, visible_index: usize) -> bool {
        let mut inner = self.lock();
        let left_active_page = inner
            .phase
            .item()
            .is_some_and(|item| &item.post_id == post_id && item.media_index != visible_index);
        if !left_active_page {
            return false;
        }

        self.teardown(&mut inner);
        self.publish(&inner);
        true
    }
}

fn poll_progress(controller: &Weak<PlaybackController>, generation: u64) -> bool {
    controller
        .upgrade()
        .is_some_and(|controller| controller.tick(generation))
}
