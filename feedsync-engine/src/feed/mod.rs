//! Feed cache and pagination manager.
//!
//! [`FeedManager`] is the only owner of the cached posts. Every mutation
//! takes the state lock, finishes its bookkeeping and releases the lock
//! before any request is awaited, so no mutation is ever torn across I/O.

pub mod cache;
pub mod optimistic;

use crate::{
    config::FeedSettings,
    error::{Result, SyncError},
    playback::PlaybackController,
};
use cache::{FeedCache, PageCursor};
use feedsync_client::{ListPostsResponse, PostApi, RequestScope};
use feedsync_common::{
    identity::{Identity, IdentityStore},
    model::{
        Id,
        post::{LikeState, Post, PostMarker},
    },
};
use optimistic::{MutationId, MutationLedger};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

const FIRST_PAGE: u32 = 1;

/// What a UI needs to re-render the feed.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct FeedStatus {
    /// Bumped on every change to the cached posts.
    pub revision: u64,
    pub loading_first_page: bool,
    pub loading_next_page: bool,
    pub refreshing: bool,
    pub has_more: bool,
    pub len: usize,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum LoadOutcome {
    Loaded { added: usize },
    /// The server answered "no content".
    Empty,
    /// Another load was already in flight.
    Suppressed,
    /// No cursor left.
    Exhausted,
    /// A newer first page replaced the feed while this page was loading.
    Stale,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
enum HeadLoad {
    FirstPage,
    Refresh,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
enum LoadFlag {
    FirstPage,
    NextPage,
    Refresh,
}

impl From<HeadLoad> for LoadFlag {
    fn from(value: HeadLoad) -> Self {
        match value {
            HeadLoad::FirstPage => LoadFlag::FirstPage,
            HeadLoad::Refresh => LoadFlag::Refresh,
        }
    }
}

#[derive(Debug)]
struct FeedState {
    cache: FeedCache,
    ledger: MutationLedger,
    generation: u64,
    revision: u64,
    loading_first_page: bool,
    loading_next_page: bool,
    refreshing: bool,
}

impl FeedState {
    fn flag(&mut self, flag: LoadFlag) -> &mut bool {
        match flag {
            LoadFlag::FirstPage => &mut self.loading_first_page,
            LoadFlag::NextPage => &mut self.loading_next_page,
            LoadFlag::Refresh => &mut self.refreshing,
        }
    }

    fn head_in_flight(&self) -> bool {
        self.loading_first_page || self.refreshing
    }

    fn status(&self) -> FeedStatus {
        FeedStatus {
            revision: self.revision,
            loading_first_page: self.loading_first_page,
            loading_next_page: self.loading_next_page,
            refreshing: self.refreshing,
            has_more: self.cache.next_page().is_some(),
            len: self.cache.len(),
        }
    }
}

/// Clears a load flag however the load ends.
struct InFlight<'a> {
    manager: &'a FeedManager,
    flag: LoadFlag,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.manager.lock();
        *state.flag(self.flag) = false;
        self.manager.publish(&state);
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum LikeResolution {
    Confirmed,
    RolledBack,
    /// A later toggle on the same post is still pending. Its rollback now
    /// restores the state from before this one.
    Deferred,
    /// The server rejected the toggle but there was nothing left to roll back.
    Discarded,
}

/// A like toggle that is already visible and still waiting for the server.
#[derive(Debug)]
pub struct PendingLike {
    pub applied: LikeState,
    handle: JoinHandle<LikeResolution>,
}

impl PendingLike {
    pub async fn settled(self) -> LikeResolution {
        self.handle.await.unwrap_or(LikeResolution::Discarded)
    }
}

pub struct FeedManager {
    api: Arc<dyn PostApi>,
    identity: Arc<dyn IdentityStore>,
    settings: FeedSettings,
    playback: Option<Arc<PlaybackController>>,
    state: Mutex<FeedState>,
    status: watch::Sender<FeedStatus>,
}

impl std::fmt::Debug for FeedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedManager")
            .field("settings", &self.settings)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl FeedManager {
    #[must_use]
    pub fn new(
        api: Arc<dyn PostApi>,
        identity: Arc<dyn IdentityStore>,
        settings: FeedSettings,
    ) -> Self {
        let (status, _) = watch::channel(FeedStatus::default());

        Self {
            api,
            identity,
            state: Mutex::new(FeedState {
                cache: FeedCache::new(settings.max_cached_posts),
                ledger: MutationLedger::default(),
                generation: 0,
                revision: 0,
                loading_first_page: false,
                loading_next_page: false,
                refreshing: false,
            }),
            settings,
            playback: None,
            status,
        }
    }

    /// Stops playback of posts that leave the cache.
    #[must_use]
    pub fn with_playback(mut self, playback: Arc<PlaybackController>) -> Self {
        self.playback = Some(playback);
        self
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &FeedState) {
        self.status.send_replace(state.status());
    }

    fn changed(&self, state: &mut FeedState) {
        state.revision += 1;
        self.publish(state);
    }

    fn forget_posts(&self, removed: &[Id<PostMarker>]) {
        if removed.is_empty() {
            return;
        }
        if let Some(playback) = &self.playback {
            playback.stop_for_posts(removed);
        }
    }

    /// Reads the identity fresh from the store. Fails if either id is absent.
    pub fn scope(&self) -> Result<RequestScope> {
        Ok(RequestScope {
            identity: Identity::load(self.identity.as_ref())?,
            role: self.settings.role.clone(),
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FeedStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn status(&self) -> FeedStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn posts(&self) -> Vec<Post> {
        self.lock().cache.posts().to_vec()
    }

    #[must_use]
    pub fn post(&self, post_id: &Id<PostMarker>) -> Option<Post> {
        self.lock().cache.get(post_id).cloned()
    }

    #[must_use]
    pub fn next_page(&self) -> PageCursor {
        self.lock().cache.next_page()
    }

    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.lock().ledger.len()
    }

    fn begin(&self, flag: LoadFlag) -> Option<InFlight<'_>> {
        let mut state = self.lock();
        let busy = match flag {
            LoadFlag::FirstPage | LoadFlag::Refresh => state.head_in_flight(),
            LoadFlag::NextPage => state.head_in_flight() || state.loading_next_page,
        };
        if busy {
            return None;
        }

        *state.flag(flag) = true;
        self.publish(&state);
        Some(InFlight {
            manager: self,
            flag,
        })
    }

    /// Replaces the feed with page one.
    ///
    /// A failed request leaves the cached posts exactly as they were.
    pub async fn load_first_page(&self) -> Result<LoadOutcome> {
        self.load_head(HeadLoad::FirstPage).await
    }

    /// Same as [`Self::load_first_page`] but reported as a background refresh.
    pub async fn refresh_silently(&self) -> Result<LoadOutcome> {
        self.load_head(HeadLoad::Refresh).await
    }

    /// Refreshes for content known to exist now.
    ///
    /// A head load already in flight may have been sent before that content
    /// existed, so instead of being suppressed this waits for it and refreshes
    /// once more. If yet another head load started meanwhile, that one
    /// postdates the content and its outcome stands.
    pub async fn refresh_after_in_flight(&self) -> Result<LoadOutcome> {
        let mut status = self.subscribe();
        let outcome = self.refresh_silently().await?;
        if outcome != LoadOutcome::Suppressed {
            return Ok(outcome);
        }

        debug!("Waiting for the head load in flight before refreshing");
        if status
            .wait_for(|status| !status.loading_first_page && !status.refreshing)
            .await
            .is_err()
        {
            return Ok(LoadOutcome::Suppressed);
        }
        self.refresh_silently().await
    }

    async fn load_head(&self, kind: HeadLoad) -> Result<LoadOutcome> {
        let scope = self.scope()?;
        let Some(_in_flight) = self.begin(kind.into()) else {
            debug!(?kind, "Head load already in flight");
            return Ok(LoadOutcome::Suppressed);
        };

        let response = self
            .api
            .list_posts(&scope, FIRST_PAGE, self.settings.page_size)
            .await
            .inspect_err(|err| warn!(?kind, error = %err, "Could not load first page"))?;

        let (posts, next_page) = match response {
            ListPostsResponse::Page(page) => {
                let next_page = page.has_next_page.then_some(FIRST_PAGE + 1);
                (page.posts, next_page)
            }
            ListPostsResponse::NoContent => (Vec::new(), None),
        };

        let (removed, len) = {
            let mut state = self.lock();
            state.generation += 1;
            let removed = state.cache.replace(posts, next_page);
            let dropped = state.ledger.clear();
            if dropped > 0 {
                debug!(dropped, "Server snapshot replaced pending like toggles");
            }
            self.changed(&mut state);
            (removed, state.cache.len())
        };
        self.forget_posts(&removed);

        info!(?kind, len, ?next_page, "Loaded first page");
        Ok(if len == 0 {
            LoadOutcome::Empty
        } else {
            LoadOutcome::Loaded { added: len }
        })
    }

    /// Appends the next page. A no-op while any load is in flight or no cursor is left.
    pub async fn load_next_page(&self) -> Result<LoadOutcome> {
        let scope = self.scope()?;

        let (page, generation) = {
            let state = self.lock();
            match state.cache.next_page() {
                Some(page) => (page, state.generation),
                None => return Ok(LoadOutcome::Exhausted),
            }
        };
        let Some(_in_flight) = self.begin(LoadFlag::NextPage) else {
            debug!(page, "Page load already in flight");
            return Ok(LoadOutcome::Suppressed);
        };

        let response = self
            .api
            .list_posts(&scope, page, self.settings.page_size)
            .await
            .inspect_err(|err| warn!(page, error = %err, "Could not load next page"))?;

        let mut state = self.lock();
        if state.generation != generation {
            debug!(page, "Discarding page fetched before the feed was replaced");
            return Ok(LoadOutcome::Stale);
        }

        let page_posts = match response {
            ListPostsResponse::Page(page_posts) => page_posts,
            ListPostsResponse::NoContent => {
                state.cache.set_next_page(None);
                self.changed(&mut state);
                return Ok(LoadOutcome::Empty);
            }
        };

        let next_page = page_posts.has_next_page.then_some(page + 1);
        let outcome = state.cache.append(page_posts.posts, next_page);
        if !outcome.evicted.is_empty() {
            let purged = state.ledger.purge_posts(&outcome.evicted);
            info!(
                evicted = outcome.evicted.len(),
                purged,
                capacity = state.cache.capacity(),
                "Evicted posts past the cache bound"
            );
        }
        self.changed(&mut state);
        drop(state);

        self.forget_posts(&outcome.evicted);
        debug!(
            page,
            added = outcome.added,
            duplicates = outcome.duplicates,
            "Appended page"
        );
        Ok(LoadOutcome::Loaded {
            added: outcome.added,
        })
    }

    /// Flips the like immediately and confirms it with the server in the background.
    ///
    /// A rejection reverts the recorded delta on the post as it is then, looked up by id.
    pub fn toggle_like(self: &Arc<Self>, post_id: &Id<PostMarker>) -> Result<PendingLike> {
        let scope = self.scope()?;

        let (mutation, applied) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let post = state
                .cache
                .get_mut(post_id)
                .ok_or_else(|| SyncError::PostNotCached(post_id.clone()))?;

            let previous = post.likes;
            let applied = previous.toggled();
            post.likes = applied;

            let mutation = state.ledger.record_like(post_id.clone(), previous, applied);
            self.changed(state);
            (mutation, applied)
        };
        debug!(%post_id, ?applied, "Applied like toggle");

        let manager = Arc::clone(self);
        let post_id = post_id.clone();
        let handle = tokio::spawn(async move { manager.settle_like(scope, post_id, mutation).await });

        Ok(PendingLike { applied, handle })
    }

    async fn settle_like(
        &self,
        scope: RequestScope,
        post_id: Id<PostMarker>,
        mutation: MutationId,
    ) -> LikeResolution {
        match self.api.toggle_like(&scope, &post_id).await {
            Ok(()) => {
                self.lock().ledger.take(mutation);
                LikeResolution::Confirmed
            }
            Err(err) => {
                warn!(%post_id, error = %err, "Like toggle rejected");
                self.roll_back(mutation)
            }
        }
    }

    fn roll_back(&self, mutation: MutationId) -> LikeResolution {
        let mut guard = self.lock();
        let state = &mut *guard;

        let Some(mutation) = state.ledger.take(mutation) else {
            return LikeResolution::Discarded;
        };
        if state.ledger.fold_into_later(&mutation) {
            debug!(post_id = %mutation.post_id, "Later like toggle pending, deferring rollback to it");
            return LikeResolution::Deferred;
        }
        let Some(post) = state.cache.get_mut(&mutation.post_id) else {
            debug!(post_id = %mutation.post_id, "Post left the feed before rollback");
            return LikeResolution::Discarded;
        };
        let Some(restored) = mutation.rollback(post.likes) else {
            debug!(post_id = %mutation.post_id, "Like was toggled again, skipping rollback");
            return LikeResolution::Discarded;
        };

        post.likes = restored;
        self.changed(state);
        debug!(post_id = %mutation.post_id, ?restored, "Rolled back like toggle");
        LikeResolution::RolledBack
    }

    /// Drops a post after the server confirmed its removal.
    pub fn remove_post(&self, post_id: &Id<PostMarker>) -> bool {
        {
            let mut state = self.lock();
            if state.cache.remove(post_id).is_none() {
                return false;
            }
            state.ledger.purge_posts(std::slice::from_ref(post_id));
            self.changed(&mut state);
        }

        self.forget_posts(std::slice::from_ref(post_id));
        true
    }

    /// Replaces a post's text after the server confirmed the edit.
    pub fn mutate_post_content(&self, post_id: &Id<PostMarker>, content: String) -> bool {
        let mut state = self.lock();
        let Some(post) = state.cache.get_mut(post_id) else {
            return false;
        };

        post.content = content;
        self.changed(&mut state);
        true
    }

    pub async fn delete_post(&self, post_id: &Id<PostMarker>) -> Result<()> {
        let scope = self.scope()?;
        self.api.delete_post(&scope, post_id).await?;

        let removed = self.remove_post(post_id);
        info!(%post_id, removed, "Deleted post");
        Ok(())
    }

    pub async fn edit_post(&self, post_id: &Id<PostMarker>, content: String) -> Result<()> {
        let scope = self.scope()?;
        self.api.edit_post(&scope, post_id, &content).await?;

        let updated = self.mutate_post_content(post_id, content);
        info!(%post_id, updated, "Edited post");
        Ok(())
    }

    /// Posts a comment and bumps the cached comment count once the server accepted it.
    pub async fn add_comment(&self, post_id: &Id<PostMarker>, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::EmptyComment);
        }

        let scope = self.scope()?;
        self.api.comment(&scope, post_id, text).await?;

        let mut state = self.lock();
        if let Some(post) = state.cache.get_mut(post_id) {
            post.comment_count = post.comment_count.saturating_add(1);
            self.changed(&mut state);
        }
        Ok(())
    }
}
