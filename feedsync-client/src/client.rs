use crate::api::{Handshake, ListPostsResponse, PostApi, RequestScope};
use crate::record::{
    CommentRecord, CreatePostRecord, DeletePostQuery, EditPostRecord, ErrorRecord,
    HandshakeRecord, ListPostsQuery, ListPostsRecord, ScopeRecord,
};
use async_trait::async_trait;
use feedsync_common::model::{
    Id, ModelValidationError, auth::ApiToken, media::MediaMetadata, post::PostMarker,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use std::{error::Error as StdError, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

pub type BoxError = Box<dyn StdError + Send + Sync>;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Request could not be completed: {0}")]
    Transport(#[source] BoxError),
    #[error("Server rejected the request with status {status}: {}", .detail.as_deref().unwrap_or("no detail"))]
    Rejected { status: u16, detail: Option<String> },
    #[error("Response body could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Response contained invalid data: {0}")]
    Data(#[from] ModelValidationError),
    #[error("Base url cannot carry a path: {0}")]
    InvalidBaseUrl(Url),
}

impl ApiError {
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        ApiError::Transport(Box::new(value))
    }
}

/// JSON client for the post endpoints.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: Option<ApiToken>,
}

impl ApiClient {
    pub fn new(base_url: Url, token: Option<ApiToken>) -> Result<Self> {
        let http = Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?;
        Self::with_client(http, base_url, token)
    }

    pub fn with_client(http: Client, base_url: Url, token: Option<ApiToken>) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(base_url));
        }

        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidBaseUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.as_token_str()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let detail = match response.bytes().await {
            Ok(body) => serde_json::from_slice::<ErrorRecord>(&body)
                .ok()
                .and_then(ErrorRecord::into_detail),
            Err(err) => {
                warn!(error = %err, %status, "Could not read error body");
                None
            }
        };
        debug!(%status, ?detail, "Request rejected");

        Err(ApiError::Rejected {
            status: status.as_u16(),
            detail,
        })
    }

    async fn send_json<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.send(request).await?.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn scope_record(scope: &RequestScope) -> ScopeRecord<'_> {
    ScopeRecord {
        workspace_id: scope.identity.workspace_id.as_str(),
        user_id: scope.identity.user_id.as_str(),
        role: &scope.role,
    }
}

#[async_trait]
impl PostApi for ApiClient {
    async fn list_posts(
        &self,
        scope: &RequestScope,
        page: u32,
        page_size: u32,
    ) -> Result<ListPostsResponse> {
        let query = ListPostsQuery {
            scope: scope_record(scope),
            page,
            page_size,
        };
        let response = self
            .send(self.http.get(self.endpoint(&["posts"])?).query(&query))
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(ListPostsResponse::NoContent);
        }

        let record: ListPostsRecord = serde_json::from_slice(&response.bytes().await?)?;
        Ok(ListPostsResponse::Page(
            record.into_page(&scope.identity.user_id)?,
        ))
    }

    async fn toggle_like(&self, scope: &RequestScope, post_id: &Id<PostMarker>) -> Result<()> {
        let url = self.endpoint(&["posts", post_id.as_str(), "like"])?;
        self.send(self.http.post(url).json(&scope_record(scope)))
            .await?;
        Ok(())
    }

    async fn create_post(
        &self,
        scope: &RequestScope,
        text: &str,
        media: &[MediaMetadata],
    ) -> Result<Handshake> {
        let body = CreatePostRecord {
            text,
            scope: scope_record(scope),
            media,
        };
        let record: HandshakeRecord = self
            .send_json(self.http.post(self.endpoint(&["posts"])?).json(&body))
            .await?;

        Ok(Handshake::try_from(record)?)
    }

    async fn delete_post(&self, scope: &RequestScope, post_id: &Id<PostMarker>) -> Result<()> {
        let query = DeletePostQuery {
            workspace_id: scope.identity.workspace_id.as_str(),
            role: &scope.role,
        };
        let url = self.endpoint(&["posts", post_id.as_str()])?;
        self.send(self.http.delete(url).query(&query)).await?;
        Ok(())
    }

    async fn edit_post(
        &self,
        scope: &RequestScope,
        post_id: &Id<PostMarker>,
        content: &str,
    ) -> Result<()> {
        let body = EditPostRecord {
            scope: scope_record(scope),
            content,
        };
        let url = self.endpoint(&["posts", post_id.as_str()])?;
        self.send(self.http.patch(url).json(&body)).await?;
        Ok(())
    }

    async fn comment(
        &self,
        scope: &RequestScope,
        post_id: &Id<PostMarker>,
        text: &str,
    ) -> Result<()> {
        let body = CommentRecord {
            scope: scope_record(scope),
            text,
        };
        let url = self.endpoint(&["posts", post_id.as_str(), "comments"])?;
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }
}
