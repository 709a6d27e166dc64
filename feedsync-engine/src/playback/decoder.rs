//! Contract of the platform audio decoder the controller drives.

use async_trait::async_trait;
use feedsync_common::model::{
    Id,
    post::{MediaRef, Post, PostMarker},
};
use std::fmt::Display;
use thiserror::Error;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
#[error("Decoder failed: {0}")]
pub struct DecoderError(String);

impl DecoderError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One playable attachment: a post and the position of the audio in its media list.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct PlaybackItemId {
    pub post_id: Id<PostMarker>,
    pub media_index: usize,
}

impl PlaybackItemId {
    #[must_use]
    pub fn new(post_id: Id<PostMarker>, media_index: usize) -> Self {
        Self {
            post_id,
            media_index,
        }
    }
}

impl Display for PlaybackItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.post_id, self.media_index)
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AudioSource {
    pub url: String,
    pub duration_hint_ms: Option<u64>,
}

impl AudioSource {
    /// The first audio attachment of a post, ready to hand to [`super::PlaybackController::play`].
    #[must_use]
    pub fn first_of(post: &Post) -> Option<(PlaybackItemId, Self)> {
        let index = post.audio_index()?;
        let source = match &post.media[index] {
            MediaRef::Audio { url, duration_ms } => Self {
                url: url.clone(),
                duration_hint_ms: *duration_ms,
            },
            MediaRef::Image { .. } => return None,
        };

        Some((PlaybackItemId::new(post.id.clone(), index), source))
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct DecoderStatus {
    pub position_ms: u64,
    /// Zero while the decoder does not know the length yet.
    pub duration_ms: u64,
}

#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn open(&self, source: &AudioSource) -> Result<Box<dyn AudioDecoder>, DecoderError>;
}

/// A loaded audio stream.
///
/// `release` frees the platform resource and must be safe to call more than once.
pub trait AudioDecoder: Send {
    fn play(&mut self) -> Result<(), DecoderError>;

    fn pause(&mut self) -> Result<(), DecoderError>;

    fn seek(&mut self, position_ms: u64) -> Result<(), DecoderError>;

    fn status(&mut self) -> Result<DecoderStatus, DecoderError>;

    fn release(&mut self);
}
