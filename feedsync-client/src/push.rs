use crate::api::{PushSource, PushStream};
use async_trait::async_trait;
use feedsync_common::model::{Id, WorkspaceMarker, auth::ApiToken};
use futures::StreamExt;
use reqwest::Url;
use thiserror::Error;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("Could not connect to the push channel: {0}")]
    Connect(#[source] tungstenite::Error),
    #[error("Push channel failed while receiving: {0}")]
    Receive(#[source] tungstenite::Error),
    #[error("Push channel was closed by the server")]
    Closed,
    #[error("Push channel token is not a valid header value")]
    InvalidToken,
}

/// Workspace-scoped push subscription over a WebSocket.
#[derive(Clone, Debug)]
pub struct WebSocketPushSource {
    url: Url,
    token: Option<ApiToken>,
}

impl WebSocketPushSource {
    #[must_use]
    pub fn new(url: Url, token: Option<ApiToken>) -> Self {
        Self { url, token }
    }

    fn subscription_url(&self, workspace_id: &Id<WorkspaceMarker>) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("workspaceId", workspace_id.as_str());
        url
    }
}

#[async_trait]
impl PushSource for WebSocketPushSource {
    async fn subscribe(&self, workspace_id: &Id<WorkspaceMarker>) -> Result<PushStream, PushError> {
        let url = self.subscription_url(workspace_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(PushError::Connect)?;

        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token.as_token_str()))
                .map_err(|_| PushError::InvalidToken)?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, response) = connect_async(request).await.map_err(PushError::Connect)?;
        debug!(workspace_id = %workspace_id, status = %response.status(), "Push channel connected");

        let frames = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Push channel closed by server");
                    Some(Err(PushError::Closed))
                }
                Ok(other) => {
                    trace!(?other, "Ignoring non-text push frame");
                    None
                }
                Err(err) => Some(Err(PushError::Receive(err))),
            }
        });

        Ok(frames.boxed())
    }
}
