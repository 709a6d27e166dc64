use crate::model::{Id, post::PostMarker};
use serde::Deserialize;

pub const NEW_POST_EVENT: &str = "new_post";

/// A decoded push-channel message.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum PushEvent {
    NewPost(Id<PostMarker>),
    Other(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPushEvent {
    event_type: String,
    post_id: Option<Id<PostMarker>>,
}

impl PushEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawPushEvent = serde_json::from_str(text)?;

        Ok(match (raw.event_type.as_str(), raw.post_id) {
            (NEW_POST_EVENT, Some(post_id)) => PushEvent::NewPost(post_id),
            _ => PushEvent::Other(raw.event_type),
        })
    }
}
