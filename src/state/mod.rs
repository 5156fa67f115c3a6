pub(crate) mod autosave;
pub(crate) mod guard;
pub(crate) mod mirror;
pub(crate) mod note_sync;
pub(crate) mod realtime;

pub use mirror::{LocalMirror, RenameTarget, SaveStatus, UiSelection};
pub use note_sync::NoteSyncController;

use crate::api::StoreError;
use crate::models::OwnerId;
use leptos::prelude::*;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    ValidationRejected(&'static str),
    #[error("change stream failed: {0}")]
    Subscription(String),
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Unavailable(msg) => Self::RemoteUnavailable(msg),
            other => Self::RemoteUnavailable(other.to_string()),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Reactive surface for the view layer.
#[derive(Clone, Copy)]
pub struct AppState {
    pub mirror: RwSignal<LocalMirror>,

    /// Whose data the mirror currently holds.
    pub owner: RwSignal<Option<OwnerId>>,

    /// Latest failure worth showing in a status line.
    pub last_error: RwSignal<Option<String>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            mirror: RwSignal::new(LocalMirror::default()),
            owner: RwSignal::new(None),
            last_error: RwSignal::new(None),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
