use crate::api::{Document, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type NoteId = String;
pub type FolderId = String;
pub type OwnerId = String;

/// Opaque, totally ordered timestamp issued by the remote store.
///
/// Never derived from a client clock; only compare it, don't interpret it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ServerTimestamp(pub u64);

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Note {
    pub id: NoteId,
    pub owner_id: OwnerId,
    pub title: String,
    pub content: String,

    /// Absent means unfiled. May dangle after a folder is deleted elsewhere.
    pub folder_id: Option<FolderId>,

    pub created_at: ServerTimestamp,
    pub updated_at: ServerTimestamp,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Folder {
    pub id: FolderId,
    pub owner_id: OwnerId,
    pub name: String,
    pub created_at: ServerTimestamp,
}

/// Document body of a note, without the store-owned metadata.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub(crate) struct NoteFields {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub folder_id: Option<FolderId>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub(crate) struct FolderFields {
    pub name: String,
}

pub(crate) fn to_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(value).map_err(StoreError::decode)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Decode(format!("expected an object, got {other}"))),
    }
}

impl TryFrom<Document> for Note {
    type Error = StoreError;

    fn try_from(doc: Document) -> Result<Self, Self::Error> {
        let fields: NoteFields =
            serde_json::from_value(Value::Object(doc.fields)).map_err(StoreError::decode)?;
        Ok(Note {
            id: doc.id,
            owner_id: doc.owner_id,
            title: fields.title,
            content: fields.content,
            folder_id: fields.folder_id.filter(|f| !f.trim().is_empty()),
            created_at: doc.create_time,
            updated_at: doc.update_time,
        })
    }
}

impl TryFrom<Document> for Folder {
    type Error = StoreError;

    fn try_from(doc: Document) -> Result<Self, Self::Error> {
        let fields: FolderFields =
            serde_json::from_value(Value::Object(doc.fields)).map_err(StoreError::decode)?;
        Ok(Folder {
            id: doc.id,
            owner_id: doc.owner_id,
            name: fields.name,
            created_at: doc.create_time,
        })
    }
}

/// The closed set of note mutations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotePatch {
    Title(String),
    Content(String),
    /// Reassign to a folder, or `None` to unfile.
    Folder(Option<FolderId>),
}

impl NotePatch {
    pub fn apply(&self, note: &mut Note) {
        match self {
            NotePatch::Title(title) => note.title = title.clone(),
            NotePatch::Content(content) => note.content = content.clone(),
            NotePatch::Folder(folder_id) => note.folder_id = folder_id.clone(),
        }
    }

    pub fn to_fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            NotePatch::Title(title) => {
                map.insert("title".to_string(), Value::String(title.clone()));
            }
            NotePatch::Content(content) => {
                map.insert("content".to_string(), Value::String(content.clone()));
            }
            NotePatch::Folder(folder_id) => {
                let v = folder_id.clone().map(Value::String).unwrap_or(Value::Null);
                map.insert("folder_id".to_string(), v);
            }
        }
        map
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FolderPatch {
    Name(String),
}

impl FolderPatch {
    pub fn apply(&self, folder: &mut Folder) {
        match self {
            FolderPatch::Name(name) => folder.name = name.clone(),
        }
    }

    pub fn to_fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            FolderPatch::Name(name) => {
                map.insert("name".to_string(), Value::String(name.clone()));
            }
        }
        map
    }
}
