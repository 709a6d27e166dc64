use crate::model::ModelValidationError;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, path::PathBuf, str::FromStr};
use time::OffsetDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = ModelValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" | "photo" => Ok(MediaKind::Image),
            "audio" => Ok(MediaKind::Audio),
            other => Err(ModelValidationError::UnknownMediaKind(other.to_owned())),
        }
    }
}

/// A media file picked on the device, not yet uploaded.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct LocalMedia {
    pub kind: MediaKind,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_ms: Option<u64>,
}

impl LocalMedia {
    #[must_use]
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }

    /// What the creation handshake is told about this file. Never the bytes.
    #[must_use]
    pub fn metadata(&self) -> MediaMetadata {
        MediaMetadata {
            kind: self.kind,
            extension: self.extension(),
            size_bytes: self.size_bytes,
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub extension: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Time-limited destination for one attachment's bytes.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct UploadTarget {
    pub destination: String,
    pub content_type: String,
    pub expires_at: Option<OffsetDateTime>,
}

impl UploadTarget {
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}
