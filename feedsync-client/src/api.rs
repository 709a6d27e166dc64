use crate::{client::ApiError, push::PushError, transfer::TransferError};
use async_trait::async_trait;
use feedsync_common::{
    identity::Identity,
    model::{
        Id, WorkspaceMarker,
        media::{LocalMedia, MediaMetadata, UploadTarget},
        post::{Post, PostMarker},
    },
};
use futures::stream::BoxStream;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Who is asking: every post endpoint is scoped to a workspace, a user and a role.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct RequestScope {
    pub identity: Identity,
    pub role: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub has_next_page: bool,
    pub total_count: u64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum ListPostsResponse {
    Page(PostPage),
    /// The server's distinguished "nothing here" answer. Not an error.
    NoContent,
}

/// Answer to the post creation handshake.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Handshake {
    pub placeholder_post_id: Id<PostMarker>,
    pub upload_targets: Vec<UploadTarget>,
}

#[async_trait]
pub trait PostApi: Send + Sync {
    async fn list_posts(
        &self,
        scope: &RequestScope,
        page: u32,
        page_size: u32,
    ) -> Result<ListPostsResponse>;

    async fn toggle_like(&self, scope: &RequestScope, post_id: &Id<PostMarker>) -> Result<()>;

    async fn create_post(
        &self,
        scope: &RequestScope,
        text: &str,
        media: &[MediaMetadata],
    ) -> Result<Handshake>;

    async fn delete_post(&self, scope: &RequestScope, post_id: &Id<PostMarker>) -> Result<()>;

    async fn edit_post(
        &self,
        scope: &RequestScope,
        post_id: &Id<PostMarker>,
        content: &str,
    ) -> Result<()>;

    async fn comment(
        &self,
        scope: &RequestScope,
        post_id: &Id<PostMarker>,
        text: &str,
    ) -> Result<()>;
}

/// Moves one local file to its upload target.
#[async_trait]
pub trait MediaTransfer: Send + Sync {
    async fn transfer(
        &self,
        media: &LocalMedia,
        target: &UploadTarget,
    ) -> Result<(), TransferError>;
}

/// Raw text frames of a workspace push subscription.
pub type PushStream = BoxStream<'static, Result<String, PushError>>;

#[async_trait]
pub trait PushSource: Send + Sync {
    async fn subscribe(&self, workspace_id: &Id<WorkspaceMarker>) -> Result<PushStream, PushError>;
}
