use crate::api::{Handshake, PostPage};
use feedsync_common::model::{
    Id, ModelValidationError,
    media::{MediaKind, MediaMetadata, UploadTarget},
    post::{LikeState, MediaRef, Post},
    user::{Author, DisplayName, UserMarker},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListPostsRecord {
    #[serde(default)]
    pub posts: Vec<PostRecord>,
    pub pagination: PaginationRecord,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PaginationRecord {
    pub has_next_page: bool,
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PostRecord {
    pub id: String,
    pub author_id: String,
    pub author_display_name: String,
    pub author_avatar_url: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub media_items: Vec<MediaRecord>,
    pub like_count: i64,
    pub is_liked_by_me: bool,
    #[serde(default)]
    pub comment_count: i64,
    pub is_editable_by_me: Option<bool>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub duration_ms: Option<u64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HandshakeRecord {
    pub placeholder_post_id: String,
    #[serde(default)]
    pub upload_targets: Vec<UploadTargetRecord>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadTargetRecord {
    pub upload_url: String,
    pub content_type: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
pub(crate) struct ErrorRecord {
    pub message: Option<String>,
    pub detail: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScopeRecord<'a> {
    pub workspace_id: &'a str,
    pub user_id: &'a str,
    pub role: &'a str,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListPostsQuery<'a> {
    #[serde(flatten)]
    pub scope: ScopeRecord<'a>,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreatePostRecord<'a> {
    pub text: &'a str,
    #[serde(flatten)]
    pub scope: ScopeRecord<'a>,
    pub media: &'a [MediaMetadata],
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeletePostQuery<'a> {
    pub workspace_id: &'a str,
    pub role: &'a str,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EditPostRecord<'a> {
    #[serde(flatten)]
    pub scope: ScopeRecord<'a>,
    pub content: &'a str,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommentRecord<'a> {
    #[serde(flatten)]
    pub scope: ScopeRecord<'a>,
    pub text: &'a str,
}

impl ErrorRecord {
    pub fn into_detail(self) -> Option<String> {
        self.detail.or(self.message).filter(|detail| !detail.is_empty())
    }
}

fn counter(name: &'static str, value: i64) -> Result<u32, ModelValidationError> {
    u32::try_from(value).map_err(|_| ModelValidationError::NegativeCounter { name, value })
}

impl PostRecord {
    /// Converts the record for the given viewer.
    ///
    /// Older servers omit `isEditableByMe`; authorship decides then.
    pub fn into_post(self, viewer: &Id<UserMarker>) -> Result<Post, ModelValidationError> {
        let author = Author {
            id: Id::new(self.author_id)?,
            display_name: DisplayName::new(self.author_display_name)?,
            avatar_url: self.author_avatar_url.filter(|url| !url.is_empty()),
        };

        let mut post = Post {
            id: Id::new(self.id)?,
            author,
            content: self.content,
            created_at: self.created_at,
            media: self
                .media_items
                .into_iter()
                .map(MediaRef::try_from)
                .collect::<Result<_, _>>()?,
            likes: LikeState::new(counter("likeCount", self.like_count)?, self.is_liked_by_me),
            comment_count: counter("commentCount", self.comment_count)?,
            editable_by_me: false,
        };
        post.editable_by_me = self
            .is_editable_by_me
            .unwrap_or_else(|| post.is_authored_by(viewer));
        Ok(post)
    }
}

impl ListPostsRecord {
    pub fn into_page(self, viewer: &Id<UserMarker>) -> Result<PostPage, ModelValidationError> {
        Ok(PostPage {
            posts: self
                .posts
                .into_iter()
                .map(|record| record.into_post(viewer))
                .collect::<Result<_, _>>()?,
            has_next_page: self.pagination.has_next_page,
            total_count: self.pagination.total_count,
        })
    }
}

impl TryFrom<MediaRecord> for MediaRef {
    type Error = ModelValidationError;

    fn try_from(value: MediaRecord) -> Result<Self, Self::Error> {
        Ok(match value.kind.parse::<MediaKind>()? {
            MediaKind::Image => MediaRef::Image { url: value.url },
            MediaKind::Audio => MediaRef::Audio {
                url: value.url,
                duration_ms: value.duration_ms,
            },
        })
    }
}

impl From<UploadTargetRecord> for UploadTarget {
    fn from(value: UploadTargetRecord) -> Self {
        Self {
            destination: value.upload_url,
            content_type: value.content_type,
            expires_at: value.expires_at,
        }
    }
}

impl TryFrom<HandshakeRecord> for Handshake {
    type Error = ModelValidationError;

    fn try_from(value: HandshakeRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            placeholder_post_id: Id::new(value.placeholder_post_id)?,
            upload_targets: value
                .upload_targets
                .into_iter()
                .map(UploadTarget::from)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::record::{HandshakeRecord, ListPostsRecord};
    use crate::api::Handshake;
    use feedsync_common::model::{Id, ModelValidationError, post::MediaRef};
    use serde_json::json;

    fn post_json(id: &str, author: &str, like_count: i64) -> serde_json::Value {
        json!({
            "id": id,
            "authorId": author,
            "authorDisplayName": "Coach Mira",
            "authorAvatarUrl": "",
            "content": "leg day",
            "createdAt": "2025-03-01T10:00:00Z",
            "mediaItems": [
                { "type": "image", "url": "https://cdn/1.jpg" },
                { "type": "audio", "url": "https://cdn/2.m4a", "durationMs": 4000 }
            ],
            "likeCount": like_count,
            "isLikedByMe": false,
            "commentCount": 2
        })
    }

    #[test]
    fn converts_page_for_viewer() {
        let record: ListPostsRecord = serde_json::from_value(json!({
            "posts": [post_json("p1", "u1", 3), post_json("p2", "u2", 0)],
            "pagination": { "hasNextPage": true, "totalCount": 40 }
        }))
        .unwrap();

        let page = record.into_page(&Id::new_unchecked("u1")).unwrap();

        assert!(page.has_next_page);
        assert_eq!(page.total_count, 40);
        assert_eq!(page.posts.len(), 2);
        assert!(page.posts[0].editable_by_me);
        assert!(!page.posts[1].editable_by_me);
        assert_eq!(page.posts[0].author.avatar_url, None);
        assert_eq!(
            page.posts[0].media[1],
            MediaRef::Audio {
                url: "https://cdn/2.m4a".into(),
                duration_ms: Some(4000)
            }
        );
    }

    #[test]
    fn negative_counters_are_rejected() {
        let record: ListPostsRecord = serde_json::from_value(json!({
            "posts": [post_json("p1", "u1", -1)],
            "pagination": { "hasNextPage": false }
        }))
        .unwrap();

        assert_eq!(
            record.into_page(&Id::new_unchecked("u1")),
            Err(ModelValidationError::NegativeCounter {
                name: "likeCount",
                value: -1
            })
        );
    }

    #[test]
    fn handshake_keeps_target_order() {
        let record: HandshakeRecord = serde_json::from_value(json!({
            "placeholderPostId": "p42",
            "uploadTargets": [
                { "uploadUrl": "https://bucket/a", "contentType": "image/jpeg" },
                { "uploadUrl": "https://bucket/b", "contentType": "audio/mp4",
                  "expiresAt": "2025-03-01T10:15:00Z" }
            ]
        }))
        .unwrap();

        let handshake = Handshake::try_from(record).unwrap();
        assert_eq!(handshake.placeholder_post_id.as_str(), "p42");
        assert_eq!(handshake.upload_targets[0].destination, "https://bucket/a");
        assert_eq!(handshake.upload_targets[1].content_type, "audio/mp4");
        assert!(handshake.upload_targets[1].expires_at.is_some());
    }
}
