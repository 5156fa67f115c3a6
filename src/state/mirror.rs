use crate::models::{Folder, FolderId, Note, NoteId};
use std::collections::HashMap;

/// The single entity (if any) whose name is being edited inline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenameTarget {
    /// `original` is the title held when editing started; restored on cancel
    /// or empty commit.
    Note { id: NoteId, original: String },
    Folder { id: FolderId, original: String },
}

impl RenameTarget {
    pub fn id(&self) -> &str {
        match self {
            RenameTarget::Note { id, .. } | RenameTarget::Folder { id, .. } => id,
        }
    }
}

/// Persistence state of one note's content, as shown to the user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SaveStatus {
    #[default]
    Saved,
    Pending,
    Saving,
    Retrying {
        attempt: u32,
    },
    Unsaved {
        reason: String,
    },
}

/// Client-only selection state. Never persisted.
#[derive(Clone, Debug, Default)]
pub struct UiSelection {
    pub active_note: Option<NoteId>,

    /// Missing entries count as expanded.
    pub expanded: HashMap<FolderId, bool>,

    pub rename: Option<RenameTarget>,

    /// Mirrors the create-note latch so the view can disable its button.
    pub creating: bool,

    /// Missing entries count as `Saved`.
    pub save_status: HashMap<NoteId, SaveStatus>,
}

/// In-memory replica of the user's notes and folders.
///
/// Both collections keep arrival order and hold at most one entity per id.
#[derive(Clone, Debug, Default)]
pub struct LocalMirror {
    notes: Vec<Note>,
    folders: Vec<Folder>,
    pub selection: UiSelection,
}

impl LocalMirror {
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    pub fn upsert_note(&mut self, note: Note) {
        match self.notes.iter_mut().find(|n| n.id == note.id) {
            Some(slot) => *slot = note,
            None => self.notes.push(note),
        }
    }

    pub fn upsert_folder(&mut self, folder: Folder) {
        match self.folders.iter_mut().find(|f| f.id == folder.id) {
            Some(slot) => *slot = folder,
            None => self.folders.push(folder),
        }
    }

    pub fn remove_note(&mut self, id: &str) -> Option<Note> {
        let idx = self.notes.iter().position(|n| n.id == id)?;
        Some(self.notes.remove(idx))
    }

    pub fn remove_folder(&mut self, id: &str) -> Option<Folder> {
        let idx = self.folders.iter().position(|f| f.id == id)?;
        Some(self.folders.remove(idx))
    }

    pub fn find_note(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn find_note_mut(&mut self, id: &str) -> Option<&mut Note> {
        self.notes.iter_mut().find(|n| n.id == id)
    }

    pub fn find_folder(&self, id: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == id)
    }

    pub fn find_folder_mut(&mut self, id: &str) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.id == id)
    }

    /// Notes filed under `folder_id`; `None` lists unfiled notes, including
    /// those pointing at a folder that no longer exists.
    pub fn list_by_folder(&self, folder_id: Option<&str>) -> Vec<&Note> {
        match folder_id {
            Some(fid) => self
                .notes
                .iter()
                .filter(|n| n.folder_id.as_deref() == Some(fid))
                .collect(),
            None => self
                .notes
                .iter()
                .filter(|n| match n.folder_id.as_deref() {
                    None => true,
                    Some(fid) => self.find_folder(fid).is_none(),
                })
                .collect(),
        }
    }

    /// Replaces the note collection wholesale. Duplicate ids keep the first entry.
    pub fn replace_notes(&mut self, notes: Vec<Note>) {
        self.notes.clear();
        for note in notes {
            if self.find_note(&note.id).is_none() {
                self.notes.push(note);
            }
        }
    }

    pub fn active_note(&self) -> Option<&Note> {
        self.selection
            .active_note
            .as_deref()
            .and_then(|id| self.find_note(id))
    }

    pub fn set_active(&mut self, id: Option<NoteId>) {
        self.selection.active_note = id;
    }

    pub fn is_expanded(&self, folder_id: &str) -> bool {
        self.selection
            .expanded
            .get(folder_id)
            .copied()
            .unwrap_or(true)
    }

    pub fn toggle_folder(&mut self, folder_id: &str) {
        let next = !self.is_expanded(folder_id);
        self.selection.expanded.insert(folder_id.to_string(), next);
    }

    pub fn rename_target(&self) -> Option<&RenameTarget> {
        self.selection.rename.as_ref()
    }

    /// At most one inline rename at a time; a new target replaces the old.
    pub fn begin_rename(&mut self, target: RenameTarget) {
        self.selection.rename = Some(target);
    }

    /// Ends rename mode if `id` is the one being renamed.
    pub fn clear_rename(&mut self, id: &str) -> Option<RenameTarget> {
        if self.rename_target().is_some_and(|r| r.id() == id) {
            return self.selection.rename.take();
        }
        None
    }

    pub fn save_status(&self, note_id: &str) -> SaveStatus {
        self.selection
            .save_status
            .get(note_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_save_status(&mut self, note_id: &str, status: SaveStatus) {
        if status == SaveStatus::Saved {
            self.selection.save_status.remove(note_id);
        } else {
            self.selection
                .save_status
                .insert(note_id.to_string(), status);
        }
    }

    /// Drops every entity and all selection state except the create latch.
    pub fn clear(&mut self) {
        let creating = self.selection.creating;
        *self = Self::default();
        self.selection.creating = creating;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerTimestamp;

    fn note(id: &str, folder: Option<&str>) -> Note {
        Note {
            id: id.to_string(),
            owner_id: "u1".to_string(),
            title: id.to_uppercase(),
            content: String::new(),
            folder_id: folder.map(str::to_string),
            created_at: ServerTimestamp(1),
            updated_at: ServerTimestamp(1),
        }
    }

    fn folder(id: &str) -> Folder {
        Folder {
            id: id.to_string(),
            owner_id: "u1".to_string(),
            name: id.to_string(),
            created_at: ServerTimestamp(1),
        }
    }

    #[test]
    fn test_upsert_replaces_in_place_and_keeps_order() {
        let mut m = LocalMirror::default();
        m.upsert_note(note("a", None));
        m.upsert_note(note("b", None));
        let mut a2 = note("a", None);
        a2.title = "renamed".to_string();
        m.upsert_note(a2);

        let ids: Vec<&str> = m.notes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(m.find_note("a").map(|n| n.title.as_str()), Some("renamed"));
    }

    #[test]
    fn test_remove_returns_entity_once() {
        let mut m = LocalMirror::default();
        m.upsert_folder(folder("f1"));
        assert!(m.remove_folder("f1").is_some());
        assert!(m.remove_folder("f1").is_none());
        assert!(m.remove_note("missing").is_none());
    }

    #[test]
    fn test_list_by_folder_treats_dangling_as_unfiled() {
        let mut m = LocalMirror::default();
        m.upsert_folder(folder("f1"));
        m.upsert_note(note("a", None));
        m.upsert_note(note("b", Some("f1")));
        m.upsert_note(note("c", Some("gone")));

        let unfiled: Vec<&str> = m.list_by_folder(None).iter().map(|n| n.id.as_str()).collect();
        assert_eq!(unfiled, vec!["a", "c"]);

        let filed: Vec<&str> = m
            .list_by_folder(Some("f1"))
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(filed, vec!["b"]);
    }

    #[test]
    fn test_replace_notes_dedupes_ids() {
        let mut m = LocalMirror::default();
        m.upsert_note(note("old", None));
        m.replace_notes(vec![note("x", None), note("x", None), note("y", None)]);
        assert_eq!(m.notes().len(), 2);
        assert!(m.find_note("old").is_none());
    }

    #[test]
    fn test_folders_default_expanded_and_toggle() {
        let mut m = LocalMirror::default();
        assert!(m.is_expanded("f1"));
        m.toggle_folder("f1");
        assert!(!m.is_expanded("f1"));
        m.toggle_folder("f1");
        assert!(m.is_expanded("f1"));
    }

    #[test]
    fn test_active_note_resolves_only_existing() {
        let mut m = LocalMirror::default();
        m.set_active(Some("ghost".to_string()));
        assert!(m.active_note().is_none());
        m.upsert_note(note("ghost", None));
        assert_eq!(m.active_note().map(|n| n.id.as_str()), Some("ghost"));
    }

    #[test]
    fn test_saved_status_is_not_stored() {
        let mut m = LocalMirror::default();
        m.set_save_status("a", SaveStatus::Pending);
        assert_eq!(m.save_status("a"), SaveStatus::Pending);
        m.set_save_status("a", SaveStatus::Saved);
        assert!(m.selection.save_status.is_empty());
    }

    #[test]
    fn test_clear_keeps_creating_latch() {
        let mut m = LocalMirror::default();
        m.upsert_note(note("a", None));
        m.selection.creating = true;
        m.set_active(Some("a".to_string()));
        m.clear();
        assert!(m.notes().is_empty());
        assert!(m.selection.active_note.is_none());
        assert!(m.selection.creating);
    }

    #[test]
    fn test_clear_rename_only_for_current_target() {
        let mut m = LocalMirror::default();
        m.begin_rename(RenameTarget::Folder {
            id: "f1".to_string(),
            original: "Old".to_string(),
        });
        assert!(m.clear_rename("n1").is_none());
        assert_eq!(m.rename_target().map(|r| r.id()), Some("f1"));
        assert!(matches!(m.clear_rename("f1"), Some(RenameTarget::Folder { .. })));
        assert!(m.rename_target().is_none());
    }
}
