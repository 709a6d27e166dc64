use feedsync_common::model::{
    Id,
    post::{LikeState, PostMarker},
};
use std::collections::HashMap;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct MutationId(u64);

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum MutationKind {
    LikeToggle,
}

/// A local change applied ahead of the server, with what it takes to undo it.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct OptimisticMutation {
    pub id: MutationId,
    pub post_id: Id<PostMarker>,
    pub kind: MutationKind,
    pub previous: LikeState,
    pub applied: LikeState,
}

impl OptimisticMutation {
    /// Undoes this mutation on whatever the post looks like now.
    ///
    /// Returns `None` if a later toggle already moved the post off the applied
    /// state, in which case reverting would clobber that later change.
    #[must_use]
    pub fn rollback(&self, current: LikeState) -> Option<LikeState> {
        if current.liked_by_me != self.applied.liked_by_me {
            return None;
        }

        let delta = i64::from(self.applied.count) - i64::from(self.previous.count);
        let count = (i64::from(current.count) - delta).clamp(0, i64::from(u32::MAX));

        Some(LikeState {
            count: u32::try_from(count).unwrap_or_default(),
            liked_by_me: self.previous.liked_by_me,
        })
    }
}

/// In-flight optimistic mutations, keyed by their own id.
#[derive(Clone, Debug, Default)]
pub struct MutationLedger {
    next_id: u64,
    pending: HashMap<MutationId, OptimisticMutation>,
}

impl MutationLedger {
    pub fn record_like(
        &mut self,
        post_id: Id<PostMarker>,
        previous: LikeState,
        applied: LikeState,
    ) -> MutationId {
        let id = MutationId(self.next_id);
        self.next_id += 1;

        self.pending.insert(
            id,
            OptimisticMutation {
                id,
                post_id,
                kind: MutationKind::LikeToggle,
                previous,
                applied,
            },
        );
        id
    }

    pub fn take(&mut self, id: MutationId) -> Option<OptimisticMutation> {
        self.pending.remove(&id)
    }

    /// Hands a rejected mutation's starting state to the next pending toggle
    /// on the same post, so that toggle's rollback lands before both.
    ///
    /// Returns `false` if no later toggle on the post is pending.
    pub fn fold_into_later(&mut self, rejected: &OptimisticMutation) -> bool {
        let later = self
            .pending
            .values_mut()
            .filter(|mutation| mutation.post_id == rejected.post_id && mutation.id > rejected.id)
            .min_by_key(|mutation| mutation.id);

        match later {
            Some(later) => {
                later.previous = rejected.previous;
                true
            }
            None => false,
        }
    }

    pub fn purge_posts(&mut self, post_ids: &[Id<PostMarker>]) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, mutation| !post_ids.contains(&mutation.post_id));
        before - self.pending.len()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
