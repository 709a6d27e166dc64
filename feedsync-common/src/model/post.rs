use crate::model::{
    Id,
    user::{Author, UserMarker},
};
use time::OffsetDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: Author,
    pub content: String,
    pub created_at: OffsetDateTime,
    pub media: Vec<MediaRef>,
    pub likes: LikeState,
    pub comment_count: u32,
    pub editable_by_me: bool,
}

impl Post {
    #[must_use]
    pub fn is_authored_by(&self, user_id: &Id<UserMarker>) -> bool {
        &self.author.id == user_id
    }

    /// Index of the first audio attachment, if the post carries one.
    #[must_use]
    pub fn audio_index(&self) -> Option<usize> {
        self.media.iter().position(MediaRef::is_audio)
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum MediaRef {
    Image { url: String },
    Audio { url: String, duration_ms: Option<u64> },
}

impl MediaRef {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            MediaRef::Image { url } | MediaRef::Audio { url, .. } => url,
        }
    }

    #[must_use]
    pub fn is_audio(&self) -> bool {
        matches!(self, MediaRef::Audio { .. })
    }
}

/// Like counter together with the viewer's own like.
///
/// The count never goes below zero; a toggle moves it by at most one.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct LikeState {
    pub count: u32,
    pub liked_by_me: bool,
}

impl LikeState {
    #[must_use]
    pub fn new(count: u32, liked_by_me: bool) -> Self {
        Self { count, liked_by_me }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        if self.liked_by_me {
            Self {
                count: self.count.saturating_sub(1),
                liked_by_me: false,
            }
        } else {
            Self {
                count: self.count.saturating_add(1),
                liked_by_me: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::post::LikeState;

    #[test]
    fn toggle_moves_count_by_one() {
        let unliked = LikeState::new(5, false);
        let liked = unliked.toggled();

        assert_eq!(liked, LikeState::new(6, true));
        assert_eq!(liked.toggled(), unliked);
    }

    #[test]
    fn unlike_never_goes_negative() {
        assert_eq!(LikeState::new(0, true).toggled(), LikeState::new(0, false));
    }
}
