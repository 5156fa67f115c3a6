use super::autosave::AutosaveChannels;
use super::{AppState, LocalMirror, RenameTarget, SyncError};
use crate::api::{Document, StoreResult};
use crate::models::{Note, NoteId};
use futures::{Stream, StreamExt};
use leptos::prelude::*;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Decodes what it can; a malformed document is skipped, not fatal.
pub(crate) fn decode_all<T>(docs: Vec<Document>) -> Vec<T>
where
    T: TryFrom<Document, Error = crate::api::StoreError>,
{
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        let id = doc.id.clone();
        match T::try_from(doc) {
            Ok(v) => out.push(v),
            Err(e) => tracing::warn!(doc_id = %id, error = %e, "skipping malformed document"),
        }
    }
    out
}

/// Replaces the mirror's notes with a server snapshot (newest first).
///
/// Local values survive in two places only: content of notes whose write
/// channel is busy, and the title of the note being renamed. `previous` holds
/// the ids of the last snapshot; an active note that was in it and is now gone
/// was deleted elsewhere, so selection falls back to the newest note.
/// Returns the ids of this snapshot.
pub(crate) fn apply_snapshot(
    mirror: &mut LocalMirror,
    mut incoming: Vec<Note>,
    content_in_flight: impl Fn(&str) -> bool,
    previous: &HashSet<NoteId>,
) -> HashSet<NoteId> {
    let renaming = match mirror.rename_target() {
        Some(RenameTarget::Note { id, .. }) => Some(id.clone()),
        _ => None,
    };

    for note in incoming.iter_mut() {
        let Some(local) = mirror.find_note(&note.id) else {
            continue;
        };
        if content_in_flight(&note.id) {
            note.content = local.content.clone();
        }
        if renaming.as_deref() == Some(note.id.as_str()) {
            note.title = local.title.clone();
        }
    }

    let ids: HashSet<NoteId> = incoming.iter().map(|n| n.id.clone()).collect();
    mirror.replace_notes(incoming);

    let active_deleted = mirror
        .selection
        .active_note
        .as_ref()
        .is_some_and(|id| previous.contains(id) && !ids.contains(id));
    if active_deleted || mirror.selection.active_note.is_none() {
        let newest = mirror.notes().first().map(|n| n.id.clone());
        mirror.set_active(newest);
    }

    ids
}

/// Drives one notes subscription until it ends or is aborted.
pub(crate) struct Reconciler {
    state: AppState,
    autosave: Rc<RefCell<AutosaveChannels>>,
    seen: HashSet<NoteId>,
}

impl Reconciler {
    pub fn new(state: AppState, autosave: Rc<RefCell<AutosaveChannels>>) -> Self {
        Self {
            state,
            autosave,
            seen: HashSet::new(),
        }
    }

    pub async fn run<S>(mut self, mut stream: S)
    where
        S: Stream<Item = StoreResult<Vec<Document>>> + Unpin,
    {
        while let Some(item) = stream.next().await {
            match item {
                Ok(docs) => self.apply(docs),
                Err(e) => {
                    // Keep the last good mirror; the store client owns reconnects.
                    let e = SyncError::Subscription(e.to_string());
                    tracing::warn!(error = %e, "notes change stream error");
                    self.state.last_error.set(Some(e.to_string()));
                }
            }
        }
        tracing::debug!("notes change stream closed");
    }

    fn apply(&mut self, docs: Vec<Document>) {
        let incoming: Vec<Note> = decode_all(docs);
        let count = incoming.len();
        let autosave = self.autosave.borrow();
        let previous = &self.seen;
        let mut seen = HashSet::new();
        self.state.mirror.update(|m| {
            seen = apply_snapshot(m, incoming, |id| !autosave.is_idle(id), previous);
        });
        drop(autosave);
        self.seen = seen;
        tracing::debug!(notes = count, "applied notes snapshot");
    }
}
