//! Upload sessions waiting for their push confirmation.
//!
//! The registry is a small actor. The pipeline and the push listener only
//! talk to it through a command queue, so a confirmation is matched against
//! exactly the sessions registered before it in queue order.

use crate::error::{Result, SyncError};
use feedsync_common::model::{Id, post::PostMarker};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace};

const COMMAND_CAPACITY: usize = 32;

/// How many unmatched announcements are remembered for late registration.
pub const RECENT_ANNOUNCEMENTS: usize = 64;

#[derive(Debug)]
enum Command {
    Register {
        post_id: Id<PostMarker>,
        reply: oneshot::Sender<Registration>,
    },
    Announce {
        post_id: Id<PostMarker>,
        reply: oneshot::Sender<bool>,
    },
    Forget {
        post_id: Id<PostMarker>,
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Debug)]
pub enum Registration {
    /// Resolves when the post is announced. Dropped if the session is forgotten.
    Pending(oneshot::Receiver<()>),
    /// The announcement arrived before the session was registered.
    AlreadyAnnounced,
}

#[derive(Clone, Debug)]
pub struct SessionRegistry {
    commands: mpsc::Sender<Command>,
    pending: watch::Receiver<usize>,
}

impl SessionRegistry {
    /// Spawns the actor. It runs until every handle is dropped.
    #[must_use]
    pub fn spawn() -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let (pending_sender, pending) = watch::channel(0);

        tokio::spawn(run(receiver, pending_sender));

        Self { commands, pending }
    }

    /// A handle whose actor is already gone.
    #[cfg(test)]
    pub(crate) fn closed() -> Self {
        let (commands, _) = mpsc::channel(1);
        let (_, pending) = watch::channel(0);
        Self { commands, pending }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::RegistryClosed)
    }

    pub async fn register(&self, post_id: Id<PostMarker>) -> Result<Registration> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Register { post_id, reply }).await?;
        response.await.map_err(|_| SyncError::RegistryClosed)
    }

    /// Reports a published post. Returns whether a local session was waiting for it.
    pub async fn announce(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Announce { post_id, reply }).await?;
        response.await.map_err(|_| SyncError::RegistryClosed)
    }

    /// Stops waiting for `post_id`. Returns whether it was still registered.
    pub async fn forget(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Forget { post_id, reply }).await?;
        response.await.map_err(|_| SyncError::RegistryClosed)
    }

    /// Number of sessions waiting for confirmation.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }
}

async fn run(mut commands: mpsc::Receiver<Command>, pending: watch::Sender<usize>) {
    let mut sessions: HashMap<Id<PostMarker>, oneshot::Sender<()>> = HashMap::new();
    let mut recent: VecDeque<Id<PostMarker>> = VecDeque::with_capacity(RECENT_ANNOUNCEMENTS);

    while let Some(command) = commands.recv().await {
        trace!(?command, "Registry command");
        match command {
            Command::Register { post_id, reply } => {
                let registration = if let Some(index) = recent.iter().position(|id| *id == post_id) {
                    recent.remove(index);
                    debug!(%post_id, "Session registered after its announcement");
                    Registration::AlreadyAnnounced
                } else {
                    let (confirm, confirmed) = oneshot::channel();
                    sessions.insert(post_id, confirm);
                    Registration::Pending(confirmed)
                };
                pending.send_replace(sessions.len());
                let _ = reply.send(registration);
            }
            Command::Announce { post_id, reply } => {
                let matched = match sessions.remove(&post_id) {
                    Some(confirm) => {
                        let _ = confirm.send(());
                        true
                    }
                    None => {
                        if recent.len() == RECENT_ANNOUNCEMENTS {
                            recent.pop_front();
                        }
                        recent.push_back(post_id);
                        false
                    }
                };
                pending.send_replace(sessions.len());
                let _ = reply.send(matched);
            }
            Command::Forget { post_id, reply } => {
                let removed = sessions.remove(&post_id).is_some();
                pending.send_replace(sessions.len());
                let _ = reply.send(removed);
            }
        }
    }

    debug!("Session registry stopped");
}

#[cfg(test)]
mod tests {
    use crate::upload::registry::{Registration, SessionRegistry};
    use feedsync_common::model::Id;

    #[tokio::test]
    async fn announcement_confirms_registered_session() {
        let registry = SessionRegistry::spawn();

        let Registration::Pending(confirmed) =
            registry.register(Id::new_unchecked("p42")).await.unwrap()
        else {
            panic!("expected a pending registration");
        };
        assert_eq!(registry.pending_count(), 1);

        assert!(!registry.announce(Id::new_unchecked("p99")).await.unwrap());
        assert!(registry.announce(Id::new_unchecked("p42")).await.unwrap());
        confirmed.await.unwrap();
        assert_eq!(registry.pending_count(), 0);

        assert!(!registry.announce(Id::new_unchecked("p42")).await.unwrap());
    }

    #[tokio::test]
    async fn late_registration_is_confirmed_immediately() {
        let registry = SessionRegistry::spawn();

        assert!(!registry.announce(Id::new_unchecked("p42")).await.unwrap());
        assert!(matches!(
            registry.register(Id::new_unchecked("p42")).await.unwrap(),
            Registration::AlreadyAnnounced
        ));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn forgotten_sessions_are_not_confirmed() {
        let registry = SessionRegistry::spawn();

        let Registration::Pending(confirmed) =
            registry.register(Id::new_unchecked("p42")).await.unwrap()
        else {
            panic!("expected a pending registration");
        };
        assert!(registry.forget(Id::new_unchecked("p42")).await.unwrap());
        assert!(!registry.forget(Id::new_unchecked("p42")).await.unwrap());

        assert!(confirmed.await.is_err());
        assert!(!registry.announce(Id::new_unchecked("p42")).await.unwrap());
    }
}
