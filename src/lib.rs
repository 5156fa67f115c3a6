//! Client-side sync layer for a notes-and-folders app.
//!
//! [`NoteSyncController`] keeps a reactive [`LocalMirror`] consistent with a
//! [`RemoteStore`]: optimistic mutations, debounced content writes, a live
//! notes subscription, and a single-flight guard on note creation.

pub mod api;
pub mod config;
pub mod logging;
pub mod models;
pub mod platform;
pub mod session;
pub mod state;

pub use api::{
    Collection, Document, DocumentMeta, HttpStore, MemoryStore, OrderBy, RemoteStore, StoreError,
    StoreResult, WriteOp,
};
pub use config::SyncConfig;
pub use models::{Folder, FolderId, FolderPatch, Note, NoteId, NotePatch, OwnerId, ServerTimestamp};
pub use platform::{BrowserPrompter, BrowserRuntime, Prompter, Runtime, TimerId};
pub use session::{Session, SessionError};
pub use state::{
    AppState, LocalMirror, NoteSyncController, RenameTarget, SaveStatus, SyncError, SyncResult,
    UiSelection,
};

use std::rc::Rc;

// Needed for `#[wasm_bindgen(start)]` on the wasm entrypoint.
#[cfg(all(target_arch = "wasm32", not(test)))]
use wasm_bindgen::prelude::wasm_bindgen;

/// Controller wired to browser timers and dialogs.
pub fn browser_controller(config: SyncConfig, store: Rc<dyn RemoteStore>) -> NoteSyncController {
    NoteSyncController::new(
        AppState::new(),
        store,
        Rc::new(BrowserRuntime),
        Rc::new(BrowserPrompter),
        config,
    )
}

/// Controller talking to the configured HTTP document service.
pub fn http_controller(config: SyncConfig, token: Option<String>) -> NoteSyncController {
    let mut store = HttpStore::new(config.api_url.clone());
    if let Some(token) = token {
        store = store.with_token(token);
    }
    browser_controller(config, Rc::new(store))
}


// Only register the WASM start function for normal builds (not for tests),
// otherwise wasm-bindgen-test will end up with multiple entry symbols.
#[cfg_attr(all(target_arch = "wasm32", not(test)), wasm_bindgen(start))]
pub fn main() {
    console_error_panic_hook::set_once();
    let config = SyncConfig::load();
    logging::init(&config);
    tracing::info!(api_url = %config.api_url, "notefold-sync loaded");
}
