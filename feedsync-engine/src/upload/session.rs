use crate::error::FailedItem;
use feedsync_common::model::{
    Id,
    media::{LocalMedia, UploadTarget},
    post::PostMarker,
};

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub enum TransferState {
    #[default]
    Pending,
    Transferring,
    Succeeded,
    Failed(String),
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub enum UploadPhase {
    #[default]
    Created,
    HandshakeInFlight,
    HandshakeFailed(String),
    TransferInFlight,
    AllTransferred,
    TransferFailed,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct UploadItem {
    pub media: LocalMedia,
    /// Known once the handshake answered.
    pub target: Option<UploadTarget>,
    pub state: TransferState,
}

/// One post creation with attachments, from handshake to the last transfer.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct UploadSession {
    pub correlation_post_id: Option<Id<PostMarker>>,
    pub phase: UploadPhase,
    pub items: Vec<UploadItem>,
}

impl UploadSession {
    #[must_use]
    pub fn new(media: Vec<LocalMedia>) -> Self {
        Self {
            correlation_post_id: None,
            phase: UploadPhase::Created,
            items: media
                .into_iter()
                .map(|media| UploadItem {
                    media,
                    target: None,
                    state: TransferState::Pending,
                })
                .collect(),
        }
    }

    pub fn assign_targets(&mut self, post_id: Id<PostMarker>, targets: Vec<UploadTarget>) {
        self.correlation_post_id = Some(post_id);
        for (item, target) in self.items.iter_mut().zip(targets) {
            item.target = Some(target);
        }
    }

    pub fn set_state(&mut self, index: usize, state: TransferState) {
        if let Some(item) = self.items.get_mut(index) {
            item.state = state;
        }
    }

    #[must_use]
    pub fn failed_items(&self) -> Vec<FailedItem> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match &item.state {
                TransferState::Failed(reason) => Some(FailedItem {
                    index,
                    path: item.media.path.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.items
            .iter()
            .all(|item| item.state == TransferState::Succeeded)
    }
}
