//! In-memory stand-ins for the network and decoder collaborators.

use crate::playback::decoder::{
    AudioBackend, AudioDecoder, AudioSource, DecoderError, DecoderStatus,
};
use async_trait::async_trait;
use feedsync_client::{
    ApiError, Handshake, ListPostsResponse, MediaTransfer, PostApi, PostPage, PushError,
    PushSource, PushStream, RequestScope, TransferError,
};
use feedsync_common::{
    identity::{IdentityKey, MemoryIdentityStore},
    model::{
        Id, WorkspaceMarker,
        media::{LocalMedia, MediaMetadata, UploadTarget},
        post::{LikeState, MediaRef, Post, PostMarker},
        user::{Author, DisplayName},
    },
};
use futures::{StreamExt, channel::mpsc};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
};
use time::macros::datetime;
use tokio::sync::Semaphore;

pub fn post(id: &str) -> Post {
    Post {
        id: Id::new_unchecked(id),
        author: Author {
            id: Id::new_unchecked("u2"),
            display_name: DisplayName::new("Coach Mira".into()).unwrap(),
            avatar_url: None,
        },
        content: format!("content of {id}"),
        created_at: datetime!(2025-03-01 10:00 UTC),
        media: Vec::new(),
        likes: LikeState::new(5, false),
        comment_count: 0,
        editable_by_me: false,
    }
}

pub fn audio_post(id: &str) -> Post {
    Post {
        media: vec![
            MediaRef::Image {
                url: format!("https://cdn/{id}.jpg"),
            },
            MediaRef::Audio {
                url: format!("https://cdn/{id}.m4a"),
                duration_ms: Some(4_000),
            },
        ],
        ..post(id)
    }
}

pub fn posts<'a>(ids: impl IntoIterator<Item = &'a str>) -> Vec<Post> {
    ids.into_iter().map(post).collect()
}

pub fn page<'a>(ids: impl IntoIterator<Item = &'a str>, has_next_page: bool) -> ListPostsResponse {
    let posts = posts(ids);
    ListPostsResponse::Page(PostPage {
        total_count: posts.len() as u64,
        posts,
        has_next_page,
    })
}

pub fn rejected(status: u16) -> ApiError {
    ApiError::Rejected {
        status,
        detail: Some("rejected by fake".into()),
    }
}

pub fn identity_store() -> Arc<MemoryIdentityStore> {
    Arc::new(
        MemoryIdentityStore::new()
            .with(IdentityKey::CurrentUserId, "u1")
            .with(IdentityKey::WorkspaceId, "gym-7"),
    )
}

pub fn local_media(name: &str) -> LocalMedia {
    LocalMedia {
        kind: feedsync_common::model::media::MediaKind::Image,
        path: format!("/tmp/{name}").into(),
        size_bytes: 1_024,
        duration_ms: None,
    }
}

pub fn target(destination: &str) -> UploadTarget {
    UploadTarget {
        destination: destination.into(),
        content_type: "image/jpeg".into(),
        expires_at: None,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

#[derive(Default)]
pub struct FakePostApi {
    list_responses: Mutex<VecDeque<Result<ListPostsResponse, ApiError>>>,
    list_gates: Mutex<HashMap<u32, Arc<Semaphore>>>,
    requested_pages: Mutex<Vec<u32>>,
    like_results: Mutex<VecDeque<Result<(), ApiError>>>,
    like_gate: Mutex<Option<Arc<Semaphore>>>,
    like_calls: Mutex<Vec<Id<PostMarker>>>,
    handshake: Mutex<Option<Result<Handshake, ApiError>>>,
    created: Mutex<Vec<(String, Vec<MediaMetadata>)>>,
    deleted: Mutex<Vec<Id<PostMarker>>>,
    edited: Mutex<Vec<(Id<PostMarker>, String)>>,
    commented: Mutex<Vec<(Id<PostMarker>, String)>>,
    reject_writes: AtomicBool,
}

impl FakePostApi {
    pub fn push_list(&self, response: Result<ListPostsResponse, ApiError>) {
        lock(&self.list_responses).push_back(response);
    }

    /// Makes requests for `page` wait for a permit on the returned semaphore.
    pub fn gate_list(&self, page: u32) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        lock(&self.list_gates).insert(page, Arc::clone(&gate));
        gate
    }

    pub fn requested_pages(&self) -> Vec<u32> {
        lock(&self.requested_pages).clone()
    }

    pub fn push_like(&self, result: Result<(), ApiError>) {
        lock(&self.like_results).push_back(result);
    }

    pub fn gate_like(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.like_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn like_calls(&self) -> usize {
        lock(&self.like_calls).len()
    }

    pub fn set_handshake(&self, handshake: Result<Handshake, ApiError>) {
        *lock(&self.handshake) = Some(handshake);
    }

    pub fn created(&self) -> Vec<(String, Vec<MediaMetadata>)> {
        lock(&self.created).clone()
    }

    pub fn deleted(&self) -> Vec<Id<PostMarker>> {
        lock(&self.deleted).clone()
    }

    pub fn edited(&self) -> Vec<(Id<PostMarker>, String)> {
        lock(&self.edited).clone()
    }

    pub fn commented(&self) -> Vec<(Id<PostMarker>, String)> {
        lock(&self.commented).clone()
    }

    pub fn reject_writes(&self) {
        self.reject_writes.store(true, Ordering::SeqCst);
    }

    fn write_result(&self) -> Result<(), ApiError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            Err(rejected(403))
        } else {
            Ok(())
        }
    }
}

async fn pass(gate: &Mutex<Option<Arc<Semaphore>>>) {
    let gate = lock(gate).clone();
    if let Some(gate) = gate {
        gate.acquire().await.unwrap().forget();
    }
}

#[async_trait]
impl PostApi for FakePostApi {
    async fn list_posts(
        &self,
        _scope: &RequestScope,
        page: u32,
        _page_size: u32,
    ) -> Result<ListPostsResponse, ApiError> {
        lock(&self.requested_pages).push(page);
        let gate = lock(&self.list_gates).get(&page).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        lock(&self.list_responses)
            .pop_front()
            .unwrap_or(Ok(ListPostsResponse::NoContent))
    }

    async fn toggle_like(
        &self,
        _scope: &RequestScope,
        post_id: &Id<PostMarker>,
    ) -> Result<(), ApiError> {
        lock(&self.like_calls).push(post_id.clone());
        pass(&self.like_gate).await;
        lock(&self.like_results).pop_front().unwrap_or(Ok(()))
    }

    async fn create_post(
        &self,
        _scope: &RequestScope,
        text: &str,
        media: &[MediaMetadata],
    ) -> Result<Handshake, ApiError> {
        lock(&self.created).push((text.to_owned(), media.to_vec()));
        lock(&self.handshake)
            .take()
            .unwrap_or_else(|| Err(rejected(500)))
    }

    async fn delete_post(
        &self,
        _scope: &RequestScope,
        post_id: &Id<PostMarker>,
    ) -> Result<(), ApiError> {
        self.write_result()?;
        lock(&self.deleted).push(post_id.clone());
        Ok(())
    }

    async fn edit_post(
        &self,
        _scope: &RequestScope,
        post_id: &Id<PostMarker>,
        content: &str,
    ) -> Result<(), ApiError> {
        self.write_result()?;
        lock(&self.edited).push((post_id.clone(), content.to_owned()));
        Ok(())
    }

    async fn comment(
        &self,
        _scope: &RequestScope,
        post_id: &Id<PostMarker>,
        text: &str,
    ) -> Result<(), ApiError> {
        self.write_result()?;
        lock(&self.commented).push((post_id.clone(), text.to_owned()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransfer {
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransfer {
    pub fn fail(&self, destination: &str) {
        lock(&self.failing).insert(destination.to_owned());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl MediaTransfer for FakeTransfer {
    async fn transfer(
        &self,
        _media: &LocalMedia,
        target: &UploadTarget,
    ) -> Result<(), TransferError> {
        lock(&self.calls).push(target.destination.clone());
        tokio::task::yield_now().await;

        if lock(&self.failing).contains(&target.destination) {
            Err(TransferError::Rejected(500))
        } else {
            Ok(())
        }
    }
}

pub type FrameSender = mpsc::UnboundedSender<Result<String, PushError>>;

#[derive(Default)]
pub struct FakePushSource {
    streams: Mutex<VecDeque<PushStream>>,
    subscribes: AtomicUsize,
}

impl FakePushSource {
    /// Queues a subscription and returns the sender feeding it frames.
    pub fn connection(&self) -> FrameSender {
        let (sender, receiver) = mpsc::unbounded();
        lock(&self.streams).push_back(receiver.boxed());
        sender
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushSource for FakePushSource {
    async fn subscribe(
        &self,
        _workspace_id: &Id<WorkspaceMarker>,
    ) -> Result<PushStream, PushError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        lock(&self.streams).pop_front().ok_or(PushError::Closed)
    }
}

#[derive(Default)]
pub struct FakeAudioBackend {
    opened: Mutex<Vec<String>>,
    open_gate: Mutex<Option<Arc<Semaphore>>>,
    fail_open: AtomicBool,
    active: Arc<AtomicUsize>,
    position_ms: Arc<AtomicU64>,
    duration_ms: Arc<AtomicU64>,
    seeks: Arc<Mutex<Vec<u64>>>,
    broken: Arc<AtomicBool>,
}

impl FakeAudioBackend {
    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }

    pub fn gate_open(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.open_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// Decoders opened and not yet released.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_position(&self, position_ms: u64) {
        self.position_ms.store(position_ms, Ordering::SeqCst);
    }

    pub fn seeks(&self) -> Vec<u64> {
        lock(&self.seeks).clone()
    }

    pub fn break_decoders(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AudioBackend for FakeAudioBackend {
    async fn open(&self, source: &AudioSource) -> Result<Box<dyn AudioDecoder>, DecoderError> {
        lock(&self.opened).push(source.url.clone());
        pass(&self.open_gate).await;

        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DecoderError::new("unsupported codec"));
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDecoder {
            active: Arc::clone(&self.active),
            position_ms: Arc::clone(&self.position_ms),
            duration_ms: Arc::clone(&self.duration_ms),
            seeks: Arc::clone(&self.seeks),
            broken: Arc::clone(&self.broken),
            released: false,
        }))
    }
}

struct FakeDecoder {
    active: Arc<AtomicUsize>,
    position_ms: Arc<AtomicU64>,
    duration_ms: Arc<AtomicU64>,
    seeks: Arc<Mutex<Vec<u64>>>,
    broken: Arc<AtomicBool>,
    released: bool,
}

impl FakeDecoder {
    fn check(&self) -> Result<(), DecoderError> {
        if self.broken.load(Ordering::SeqCst) {
            Err(DecoderError::new("stream ended unexpectedly"))
        } else {
            Ok(())
        }
    }
}

impl AudioDecoder for FakeDecoder {
    fn play(&mut self) -> Result<(), DecoderError> {
        self.check()
    }

    fn pause(&mut self) -> Result<(), DecoderError> {
        self.check()
    }

    fn seek(&mut self, position_ms: u64) -> Result<(), DecoderError> {
        self.check()?;
        lock(&self.seeks).push(position_ms);
        self.position_ms.store(position_ms, Ordering::SeqCst);
        Ok(())
    }

    fn status(&mut self) -> Result<DecoderStatus, DecoderError> {
        self.check()?;
        Ok(DecoderStatus {
            position_ms: self.position_ms.load(Ordering::SeqCst),
            duration_ms: self.duration_ms.load(Ordering::SeqCst),
        })
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
