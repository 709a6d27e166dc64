//! Read side of the device's persistent identity store.
//!
//! The sync engine only ever reads the current user and workspace from here.
//! Writing belongs to the login flow of the host application.

use crate::model::{Id, InvalidIdError, WorkspaceMarker, user::UserMarker};
use std::{
    collections::HashMap,
    fmt::Display,
    sync::{PoisonError, RwLock},
};
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum IdentityKey {
    CurrentUserId,
    WorkspaceId,
}

impl IdentityKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityKey::CurrentUserId => "currentUserId",
            IdentityKey::WorkspaceId => "workspaceId",
        }
    }
}

impl Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait IdentityStore: Send + Sync {
    fn get(&self, key: IdentityKey) -> Option<String>;
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum IdentityError {
    #[error("Identity value {0} is missing")]
    Missing(IdentityKey),
    #[error("Identity value {0} is invalid: {1}")]
    Invalid(IdentityKey, InvalidIdError),
}

impl IdentityError {
    #[must_use]
    pub fn key(&self) -> IdentityKey {
        match self {
            IdentityError::Missing(key) | IdentityError::Invalid(key, _) => *key,
        }
    }
}

/// The pair of ids every feed request is scoped to.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Identity {
    pub user_id: Id<UserMarker>,
    pub workspace_id: Id<WorkspaceMarker>,
}

impl Identity {
    pub fn load(store: &dyn IdentityStore) -> Result<Self, IdentityError> {
        Ok(Self {
            user_id: read_id(store, IdentityKey::CurrentUserId)?,
            workspace_id: read_id(store, IdentityKey::WorkspaceId)?,
        })
    }
}

fn read_id<Marker>(store: &dyn IdentityStore, key: IdentityKey) -> Result<Id<Marker>, IdentityError> {
    let value = store
        .get(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or(IdentityError::Missing(key))?;

    Id::new(value).map_err(|err| IdentityError::Invalid(key, err))
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    values: RwLock<HashMap<IdentityKey, String>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, key: IdentityKey, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: IdentityKey, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value.into());
    }

    pub fn remove(&self, key: IdentityKey) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, key: IdentityKey) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }
}
