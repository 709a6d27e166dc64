use feedsync_client::{ApiError, PushError};
use feedsync_common::{
    identity::IdentityError,
    model::{Id, post::PostMarker},
};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    IdentityMissing(#[from] IdentityError),
    #[error("Server could not be reached: {0}")]
    Transport(#[source] ApiError),
    #[error("Server rejected the request with status {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    ServerRejected { status: u16, detail: Option<String> },
    #[error("Server answered with invalid data: {0}")]
    InvalidData(#[source] ApiError),
    #[error("Handshake returned {returned} upload targets for {submitted} media items")]
    ProtocolMismatch { submitted: usize, returned: usize },
    #[error("A post needs text or at least one media item")]
    EmptyPost,
    #[error("A comment needs text")]
    EmptyComment,
    #[error("{} of the attachments failed to upload", .0.len())]
    TransferFailed(Vec<FailedItem>),
    #[error("Post {0} is not in the feed")]
    PostNotCached(Id<PostMarker>),
    #[error("The upload session registry has shut down")]
    RegistryClosed,
    #[error("Upload task ended before reporting a result")]
    Aborted,
    #[error("Push channel stayed closed after {attempts} reconnect attempts")]
    PushClosed {
        attempts: u32,
        #[source]
        source: Option<PushError>,
    },
}

impl From<ApiError> for SyncError {
    fn from(value: ApiError) -> Self {
        match value {
            ApiError::Transport(_) => SyncError::Transport(value),
            ApiError::Rejected { status, detail } => SyncError::ServerRejected { status, detail },
            ApiError::Decode(_) | ApiError::Data(_) | ApiError::InvalidBaseUrl(_) => {
                SyncError::InvalidData(value)
            }
        }
    }
}

/// One attachment that did not reach its upload target.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct FailedItem {
    pub index: usize,
    pub path: PathBuf,
    pub reason: String,
}
