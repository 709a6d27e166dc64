//! Network collaborators of the feed engine: the post API, the direct
//! media upload transfer and the workspace push channel.

pub mod api;
pub mod client;
pub mod push;
mod record;
pub mod transfer;

pub use api::{
    Handshake, ListPostsResponse, MediaTransfer, PostApi, PostPage, PushSource, PushStream,
    RequestScope,
};
pub use client::{ApiClient, ApiError};
pub use push::{PushError, WebSocketPushSource};
pub use transfer::{HttpTransfer, TransferError};
