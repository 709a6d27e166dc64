use crate::api::MediaTransfer;
use async_trait::async_trait;
use feedsync_common::model::media::{LocalMedia, UploadTarget};
use reqwest::{Client, header::CONTENT_TYPE};
use std::{path::PathBuf, time::Duration};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Upload request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Upload target answered with status {0}")]
    Rejected(u16),
    #[error("Upload target expired before the transfer started")]
    Expired,
}

/// Direct PUT of the file bytes to a pre-signed destination.
#[derive(Clone, Debug)]
pub struct HttpTransfer {
    http: Client,
}

impl HttpTransfer {
    pub fn new() -> Result<Self, TransferError> {
        let http = Client::builder().timeout(DEFAULT_TRANSFER_TIMEOUT).build()?;
        Ok(Self { http })
    }

    #[must_use]
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MediaTransfer for HttpTransfer {
    async fn transfer(
        &self,
        media: &LocalMedia,
        target: &UploadTarget,
    ) -> Result<(), TransferError> {
        if target.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(TransferError::Expired);
        }

        let bytes = tokio::fs::read(&media.path)
            .await
            .map_err(|source| TransferError::Read {
                path: media.path.clone(),
                source,
            })?;
        let len = bytes.len();

        let response = self
            .http
            .put(&target.destination)
            .header(CONTENT_TYPE, &target.content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Rejected(status.as_u16()));
        }

        debug!(path = %media.path.display(), len, %status, "Transferred media");
        Ok(())
    }
}
