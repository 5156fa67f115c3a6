use super::autosave::{AutosaveChannels, Failed, Fired, Settled};
use super::guard::SingleFlight;
use super::realtime::{decode_all, Reconciler};
use super::{AppState, RenameTarget, SaveStatus, SyncError, SyncResult};
use crate::api::{Collection, OrderBy, RemoteStore, StoreError};
use crate::config::SyncConfig;
use crate::models::{
    to_fields, Folder, FolderFields, FolderId, FolderPatch, Note, NoteFields, NoteId, NotePatch,
    OwnerId,
};
use crate::platform::{Prompter, Runtime};
use crate::session::{Session, SessionError};
use futures::future::FutureExt;
use futures::stream::{abortable, AbortHandle};
use leptos::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

/// Owns every write the client makes and the one live notes subscription.
///
/// Responsibilities:
/// - optimistic create/update/delete against the mirror, then the store
/// - per-note debounced content writes with bounded retry
/// - inline rename lifecycle for note titles and folder names
/// - session start/end (subscribe, initial folder load, teardown)
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct NoteSyncController {
    app_state: AppState,

    store: Rc<dyn RemoteStore>,
    runtime: Rc<dyn Runtime>,
    prompter: Rc<dyn Prompter>,
    config: Rc<SyncConfig>,

    /// Per-note content channels.
    autosave: Rc<RefCell<AutosaveChannels>>,

    /// `create_note` latch.
    creation: SingleFlight,

    /// Aborts the running reconciler.
    subscription: Rc<RefCell<Option<AbortHandle>>>,
}

impl NoteSyncController {
    pub fn new(
        app_state: AppState,
        store: Rc<dyn RemoteStore>,
        runtime: Rc<dyn Runtime>,
        prompter: Rc<dyn Prompter>,
        config: SyncConfig,
    ) -> Self {
        Self {
            creation: SingleFlight::new(app_state.mirror),
            app_state,
            store,
            runtime,
            prompter,
            config: Rc::new(config),
            autosave: Rc::new(RefCell::new(AutosaveChannels::default())),
            subscription: Rc::new(RefCell::new(None)),
        }
    }

    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ---- session ----

    /// Subscribes to `owner`'s notes and loads their folders.
    ///
    /// Any previous session is torn down first.
    pub async fn start_session(&self, owner: OwnerId) -> SyncResult<()> {
        self.end_session();
        tracing::info!(owner = %owner, "starting session");
        self.app_state.owner.set(Some(owner.clone()));

        let stream = self
            .store
            .subscribe(Collection::Notes, &owner, OrderBy::CreatedDesc);
        let (stream, handle) = abortable(stream);
        *self.subscription.borrow_mut() = Some(handle);
        let reconciler = Reconciler::new(self.app_state, self.autosave.clone());
        self.runtime.spawn(reconciler.run(stream).boxed_local());

        if let Err(e) = self.load(&owner).await {
            self.report("load folders", &e, false);
            return Err(e);
        }
        Ok(())
    }

    /// Initial folder query; every folder starts expanded.
    pub async fn load(&self, owner: &str) -> SyncResult<()> {
        let docs = self
            .store
            .query_by_owner(Collection::Folders, owner)
            .await?;
        if !self.owns_session(owner) {
            tracing::debug!(owner, "session changed during folder load");
            return Ok(());
        }

        let folders: Vec<Folder> = decode_all(docs);
        tracing::debug!(count = folders.len(), "folders loaded");
        self.app_state.mirror.update(|m| {
            for folder in folders {
                m.selection.expanded.insert(folder.id.clone(), true);
                m.upsert_folder(folder);
            }
        });
        Ok(())
    }

    /// Unsubscribes, drops pending writes and clears the mirror.
    pub fn end_session(&self) {
        let handle = self.subscription.borrow_mut().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let timers = self.autosave.borrow_mut().teardown_all();
        for timer in timers {
            self.runtime.clear_timeout(timer);
        }

        if self.app_state.owner.get_untracked().is_some() {
            tracing::info!("ending session");
        }
        self.app_state.owner.set(None);
        self.app_state.last_error.set(None);
        self.app_state.mirror.update(|m| m.clear());
    }

    /// Follows the authenticated identity; a change restarts the session.
    pub async fn on_identity_changed(&self, owner: Option<OwnerId>) -> SyncResult<()> {
        if self.app_state.owner.get_untracked() == owner {
            return Ok(());
        }
        match owner {
            Some(owner) => self.start_session(owner).await,
            None => {
                self.end_session();
                Ok(())
            }
        }
    }

    /// Reads the session's current identity and follows it.
    pub async fn sync_identity(&self, session: &dyn Session) -> SyncResult<()> {
        self.on_identity_changed(session.current_owner()).await
    }

    fn owns_session(&self, owner: &str) -> bool {
        self.app_state.owner.get_untracked().as_deref() == Some(owner)
    }

    pub async fn sign_out(&self, session: &dyn Session) -> Result<(), SessionError> {
        session.sign_out().await?;
        self.end_session();
        Ok(())
    }

    // ---- create ----

    /// Creates a folder and opens it for renaming. Nothing is inserted
    /// locally until the store has assigned an id.
    pub async fn create_folder(&self, owner: &str) -> SyncResult<FolderId> {
        let name = self.config.default_folder_name.clone();
        let fields = to_fields(&FolderFields { name: name.clone() })?;

        let meta = match self
            .store
            .add_document(Collection::Folders, owner, fields)
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                let e = SyncError::from(e);
                self.report("create folder", &e, true);
                return Err(e);
            }
        };

        if !self.owns_session(owner) {
            tracing::debug!(folder_id = %meta.id, "session changed during folder create");
            return Ok(meta.id);
        }

        let folder = Folder {
            id: meta.id.clone(),
            owner_id: owner.to_string(),
            name,
            created_at: meta.create_time,
        };
        self.app_state.mirror.update(|m| {
            m.selection.expanded.insert(folder.id.clone(), true);
            m.upsert_folder(folder);
        });
        tracing::debug!(folder_id = %meta.id, "folder created");
        self.begin_folder_rename(&meta.id);
        Ok(meta.id)
    }

    /// Creates an empty note and makes it active.
    ///
    /// Returns `Ok(None)` without touching the store while another
    /// `create_note` is in flight.
    pub async fn create_note(
        &self,
        owner: &str,
        folder: Option<FolderId>,
    ) -> SyncResult<Option<NoteId>> {
        let Some(_permit) = self.creation.try_acquire() else {
            tracing::debug!("create_note already in flight");
            return Ok(None);
        };

        let title = self.config.default_note_title.clone();
        let fields = to_fields(&NoteFields {
            title: title.clone(),
            content: String::new(),
            folder_id: folder.clone(),
        })?;

        let meta = match self
            .store
            .add_document(Collection::Notes, owner, fields)
            .await
        {
            Ok(meta) => meta,
            Err(e) => {
                let e = SyncError::from(e);
                self.report("create note", &e, true);
                return Err(e);
            }
        };

        if !self.owns_session(owner) {
            tracing::debug!(note_id = %meta.id, "session changed during note create");
            return Ok(Some(meta.id));
        }

        let note = Note {
            id: meta.id.clone(),
            owner_id: owner.to_string(),
            title,
            content: String::new(),
            folder_id: folder,
            created_at: meta.create_time,
            updated_at: meta.update_time,
        };
        self.app_state.mirror.update(|m| m.upsert_note(note));
        self.select_note(Some(meta.id.clone()));
        tracing::debug!(note_id = %meta.id, "note created");
        Ok(Some(meta.id))
    }

    // ---- update ----

    /// Applies `patch` locally, then writes it in the background.
    ///
    /// A failed write is reported but not rolled back; the next snapshot
    /// carries the store's value.
    pub fn update_note_metadata(&self, id: &str, patch: NotePatch) {
        let mut found = false;
        self.app_state.mirror.update(|m| {
            if let Some(note) = m.find_note_mut(id) {
                patch.apply(note);
                found = true;
            }
        });
        if !found {
            tracing::debug!(note_id = id, "patching a note not in the mirror");
        }

        let this = self.clone();
        let id = id.to_string();
        self.runtime.spawn(
            async move {
                let res = this
                    .store
                    .update_document(Collection::Notes, &id, patch.to_fields())
                    .await;
                if let Err(e) = res {
                    this.report("update note", &SyncError::from(e), false);
                }
            }
            .boxed_local(),
        );
    }

    pub fn update_folder(&self, id: &str, patch: FolderPatch) {
        let FolderPatch::Name(name) = &patch;
        if let Err(e) = validate_name(name) {
            tracing::debug!(folder_id = id, error = %e, "folder update ignored");
            return;
        }

        self.app_state.mirror.update(|m| {
            if let Some(folder) = m.find_folder_mut(id) {
                patch.apply(folder);
            }
        });

        let this = self.clone();
        let id = id.to_string();
        self.runtime.spawn(
            async move {
                let res = this
                    .store
                    .update_document(Collection::Folders, &id, patch.to_fields())
                    .await;
                if let Err(e) = res {
                    this.report("rename folder", &SyncError::from(e), false);
                }
            }
            .boxed_local(),
        );
    }

    // ---- delete ----

    /// Deletes a folder after confirmation. Its notes are moved to unfiled,
    /// never deleted.
    ///
    /// Returns `Ok(false)` when the user declines.
    pub async fn delete_folder(&self, id: &str) -> SyncResult<bool> {
        let name = self
            .app_state
            .mirror
            .with_untracked(|m| m.find_folder(id).map(|f| f.name.clone()))
            .unwrap_or_else(|| id.to_string());
        if !self
            .prompter
            .confirm(&format!("Delete folder \"{name}\"? Its notes will be kept."))
        {
            return Ok(false);
        }

        if let Err(e) = self.store.delete_document(Collection::Folders, id).await {
            let e = SyncError::from(e);
            self.report("delete folder", &e, true);
            return Err(e);
        }

        let mut orphans: Vec<NoteId> = Vec::new();
        self.app_state.mirror.update(|m| {
            m.remove_folder(id);
            m.selection.expanded.remove(id);
            m.clear_rename(id);
            orphans = m
                .notes()
                .iter()
                .filter(|n| n.folder_id.as_deref() == Some(id))
                .map(|n| n.id.clone())
                .collect();
        });

        tracing::info!(folder_id = id, notes = orphans.len(), "folder deleted");
        for note_id in orphans {
            self.update_note_metadata(&note_id, NotePatch::Folder(None));
        }
        Ok(true)
    }

    /// Deletes a note after confirmation and drops its unsent content.
    ///
    /// Returns `Ok(false)` when the user declines.
    pub async fn delete_note(&self, id: &str) -> SyncResult<bool> {
        let title = self
            .app_state
            .mirror
            .with_untracked(|m| m.find_note(id).map(|n| n.title.clone()))
            .unwrap_or_else(|| id.to_string());
        if !self.prompter.confirm(&format!("Delete note \"{title}\"?")) {
            return Ok(false);
        }

        if let Err(e) = self.store.delete_document(Collection::Notes, id).await {
            let e = SyncError::from(e);
            self.report("delete note", &e, true);
            return Err(e);
        }

        let timer = self.autosave.borrow_mut().teardown(id);
        if let Some(timer) = timer {
            self.runtime.clear_timeout(timer);
        }

        self.app_state.mirror.update(|m| {
            m.remove_note(id);
            m.set_save_status(id, SaveStatus::Saved);
            m.clear_rename(id);
            if m.selection.active_note.as_deref() == Some(id) {
                let next = m.notes().first().map(|n| n.id.clone());
                m.set_active(next);
            }
        });
        tracing::info!(note_id = id, "note deleted");
        Ok(true)
    }

    // ---- inline rename ----

    /// Opens a note title for editing, committing any other open rename.
    pub fn begin_title_edit(&self, id: &str) {
        if self.rename_open_for(id) {
            return;
        }
        self.commit_open_rename();
        self.app_state.mirror.update(|m| {
            let original = m.find_note(id).map(|n| n.title.clone());
            if let Some(original) = original {
                m.begin_rename(RenameTarget::Note {
                    id: id.to_string(),
                    original,
                });
            }
        });
    }

    /// Local only; nothing is sent until commit.
    pub fn edit_title_draft(&self, id: &str, draft: String) {
        self.app_state.mirror.update(|m| {
            if !matches!(m.rename_target(), Some(RenameTarget::Note { id: r, .. }) if r == id) {
                return;
            }
            if let Some(note) = m.find_note_mut(id) {
                note.title = draft;
            }
        });
    }

    /// Persists `new_title` and leaves rename mode. A blank title restores
    /// the one held before editing started and sends nothing.
    pub fn commit_title_edit(&self, id: &str, new_title: &str) {
        let original = self.take_note_rename(id);
        let title = new_title.trim();

        if title.is_empty() {
            tracing::debug!(note_id = id, "empty title discarded");
            self.restore_note_title(id, original);
            return;
        }
        if original.as_deref() == Some(title) {
            self.restore_note_title(id, original);
            return;
        }
        self.update_note_metadata(id, NotePatch::Title(title.to_string()));
    }

    pub fn cancel_title_edit(&self, id: &str) {
        let original = self.take_note_rename(id);
        self.restore_note_title(id, original);
    }

    pub fn begin_folder_rename(&self, id: &str) {
        if self.rename_open_for(id) {
            return;
        }
        self.commit_open_rename();
        self.app_state.mirror.update(|m| {
            let original = m.find_folder(id).map(|f| f.name.clone());
            if let Some(original) = original {
                m.begin_rename(RenameTarget::Folder {
                    id: id.to_string(),
                    original,
                });
            }
        });
    }

    pub fn edit_folder_name_draft(&self, id: &str, draft: String) {
        self.app_state.mirror.update(|m| {
            if !matches!(m.rename_target(), Some(RenameTarget::Folder { id: r, .. }) if r == id) {
                return;
            }
            if let Some(folder) = m.find_folder_mut(id) {
                folder.name = draft;
            }
        });
    }

    /// Persists the drafted name. A blank draft restores the prior name.
    pub fn commit_folder_rename(&self, id: &str) {
        let original = self.take_folder_rename(id);
        let draft = self
            .app_state
            .mirror
            .with_untracked(|m| m.find_folder(id).map(|f| f.name.trim().to_string()));
        let Some(draft) = draft else {
            return;
        };

        if validate_name(&draft).is_err() || original.as_deref() == Some(draft.as_str()) {
            self.restore_folder_name(id, original);
            return;
        }
        self.update_folder(id, FolderPatch::Name(draft));
    }

    pub fn cancel_folder_rename(&self, id: &str) {
        let original = self.take_folder_rename(id);
        self.restore_folder_name(id, original);
    }

    fn rename_open_for(&self, id: &str) -> bool {
        self.app_state
            .mirror
            .with_untracked(|m| m.rename_target().is_some_and(|r| r.id() == id))
    }

    fn commit_open_rename(&self) {
        let open = self
            .app_state
            .mirror
            .with_untracked(|m| m.rename_target().cloned());
        match open {
            Some(RenameTarget::Note { id, .. }) => {
                let draft = self
                    .app_state
                    .mirror
                    .with_untracked(|m| m.find_note(&id).map(|n| n.title.clone()))
                    .unwrap_or_default();
                self.commit_title_edit(&id, &draft);
            }
            Some(RenameTarget::Folder { id, .. }) => self.commit_folder_rename(&id),
            None => {}
        }
    }

    fn take_note_rename(&self, id: &str) -> Option<String> {
        let mut original = None;
        self.app_state.mirror.update(|m| {
            if !matches!(m.rename_target(), Some(RenameTarget::Note { .. })) {
                return;
            }
            if let Some(RenameTarget::Note { original: o, .. }) = m.clear_rename(id) {
                original = Some(o);
            }
        });
        original
    }

    fn take_folder_rename(&self, id: &str) -> Option<String> {
        let mut original = None;
        self.app_state.mirror.update(|m| {
            if !matches!(m.rename_target(), Some(RenameTarget::Folder { .. })) {
                return;
            }
            if let Some(RenameTarget::Folder { original: o, .. }) = m.clear_rename(id) {
                original = Some(o);
            }
        });
        original
    }

    fn restore_note_title(&self, id: &str, original: Option<String>) {
        let Some(original) = original else {
            return;
        };
        self.app_state.mirror.update(|m| {
            if let Some(note) = m.find_note_mut(id) {
                note.title = original;
            }
        });
    }

    fn restore_folder_name(&self, id: &str, original: Option<String>) {
        let Some(original) = original else {
            return;
        };
        self.app_state.mirror.update(|m| {
            if let Some(folder) = m.find_folder_mut(id) {
                folder.name = original;
            }
        });
    }

    // ---- selection & content ----

    /// Switches the open note. A write still in the previous note's quiet
    /// period is dropped; retries already under way continue.
    pub fn select_note(&self, id: Option<NoteId>) {
        let previous = self
            .app_state
            .mirror
            .with_untracked(|m| m.selection.active_note.clone());
        if previous == id {
            return;
        }

        if let Some(prev) = previous {
            let timer = self.autosave.borrow_mut().cancel_pending(&prev);
            if let Some(timer) = timer {
                self.runtime.clear_timeout(timer);
                tracing::debug!(note_id = %prev, "pending write dropped on switch");
                self.app_state
                    .mirror
                    .update(|m| m.set_save_status(&prev, SaveStatus::Saved));
            }
        }
        self.app_state.mirror.update(|m| m.set_active(id));
    }

    pub fn toggle_folder(&self, id: &str) {
        self.app_state.mirror.update(|m| m.toggle_folder(id));
    }

    /// Records a keystroke-level content change of the open note and
    /// (re)starts its quiet period.
    pub fn edit_content(&self, note_id: &str, content: String) {
        let is_active = self
            .app_state
            .mirror
            .with_untracked(|m| m.selection.active_note.as_deref() == Some(note_id));
        if !is_active {
            tracing::debug!(note_id, "content edit for a note that is not open");
            return;
        }

        self.app_state.mirror.update(|m| {
            if let Some(note) = m.find_note_mut(note_id) {
                note.content = content;
            }
            m.set_save_status(note_id, SaveStatus::Pending);
        });

        if self.autosave.borrow_mut().mark_dirty(note_id) {
            tracing::trace!(note_id, "edit queued behind the write in flight");
            return;
        }
        self.schedule_commit(note_id);
    }

    /// Starts a fresh quiet period for the note, replacing any armed timer.
    fn schedule_commit(&self, note_id: &str) {
        let (generation, stale) = {
            let mut channels = self.autosave.borrow_mut();
            (channels.next_generation(), channels.take_timer(note_id))
        };
        if let Some(timer) = stale {
            self.runtime.clear_timeout(timer);
        }

        let this = self.clone();
        let id = note_id.to_string();
        let timer = self.runtime.set_timeout(
            self.config.autosave_ms,
            Box::new(move || this.on_autosave_timer(id, generation)),
        );
        let replaced = self.autosave.borrow_mut().arm(note_id, generation, timer);
        if let Some(timer) = replaced {
            self.runtime.clear_timeout(timer);
        }
    }

    fn on_autosave_timer(&self, note_id: String, generation: u64) {
        let fired = self.autosave.borrow_mut().fire(&note_id, generation);
        let Fired::Commit { attempt } = fired else {
            tracing::trace!(note_id = %note_id, generation, "stale autosave timer");
            return;
        };
        let this = self.clone();
        self.runtime.spawn(
            async move { this.commit_content(note_id, generation, attempt).await }.boxed_local(),
        );
    }

    async fn commit_content(&self, note_id: String, generation: u64, attempt: u32) {
        if !self.autosave.borrow().is_committing(&note_id, generation) {
            return;
        }
        let content = self
            .app_state
            .mirror
            .with_untracked(|m| m.find_note(&note_id).map(|n| n.content.clone()));
        let Some(content) = content else {
            self.autosave.borrow_mut().teardown(&note_id);
            return;
        };

        self.set_save_status(&note_id, SaveStatus::Saving);
        let res = self
            .store
            .update_document(
                Collection::Notes,
                &note_id,
                NotePatch::Content(content).to_fields(),
            )
            .await;

        let err = match res {
            Ok(()) => {
                let settled = self.autosave.borrow_mut().succeeded(&note_id, generation);
                match settled {
                    Settled::Saved => self.set_save_status(&note_id, SaveStatus::Saved),
                    Settled::Rewrite => self.schedule_commit(&note_id),
                    Settled::Stale => {}
                }
                tracing::debug!(note_id = %note_id, attempt, "content saved");
                return;
            }
            Err(e) => e,
        };

        let retryable = !matches!(err, StoreError::NotFound(_));
        let verdict = self.autosave.borrow_mut().failed(
            &note_id,
            generation,
            self.config.retry_max_attempts,
            retryable,
        );
        let err = SyncError::from(err);

        match verdict {
            Failed::Retry { attempt: next } => {
                let delay = self.config.retry_delay_ms(attempt);
                tracing::warn!(note_id = %note_id, attempt, delay_ms = delay, error = %err, "content save failed, retrying");

                let this = self.clone();
                let id = note_id.clone();
                let timer = self.runtime.set_timeout(
                    delay,
                    Box::new(move || this.on_autosave_timer(id, generation)),
                );
                let armed = self
                    .autosave
                    .borrow_mut()
                    .arm_backoff(&note_id, generation, next, timer);
                if armed {
                    self.set_save_status(&note_id, SaveStatus::Retrying { attempt: next });
                } else {
                    self.runtime.clear_timeout(timer);
                }
            }
            Failed::GiveUp => {
                self.set_save_status(
                    &note_id,
                    SaveStatus::Unsaved {
                        reason: err.to_string(),
                    },
                );
                self.report("save note", &err, false);
            }
            Failed::Rewrite => {
                tracing::debug!(note_id = %note_id, error = %err, "save failed, newer content pending");
                self.schedule_commit(&note_id);
            }
            Failed::Stale => {
                tracing::debug!(note_id = %note_id, error = %err, "superseded save failed");
            }
        }
    }

    fn set_save_status(&self, note_id: &str, status: SaveStatus) {
        self.app_state
            .mirror
            .update(|m| m.set_save_status(note_id, status));
    }

    fn report(&self, context: &str, err: &SyncError, alert: bool) {
        tracing::warn!(error = %err, "{context} failed");
        self.app_state
            .last_error
            .set(Some(format!("{context}: {err}")));
        if alert {
            self.prompter.alert(&format!("Could not {context}: {err}"));
        }
    }
}

fn validate_name(name: &str) -> SyncResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SyncError::ValidationRejected("name must not be empty"));
    }
    Ok(name)
}
