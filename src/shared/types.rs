use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Maximum characters kept in a preview line
pub const PREVIEW_CHARS: usize = 100;

/// Opaque, stable identifier of a history record, snippet or folder.
///
/// Keys are UUID v4 strings, assigned at creation and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex SHA-256 of a normalized payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the kind tag followed by each part, length-prefixed so part
    /// boundaries cannot collide.
    pub fn compute(kind: PayloadKind, parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([kind.tag()]);
        for part in parts {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which store a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    History,
    Snippet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Text,
    RichText,
    Image,
    FileList,
}

impl PayloadKind {
    fn tag(self) -> u8 {
        match self {
            PayloadKind::Text => 0,
            PayloadKind::RichText => 1,
            PayloadKind::Image => 2,
            PayloadKind::FileList => 3,
        }
    }
}

/// Classified clipboard content, ready to store or paste.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayloadContent {
    Text {
        text: String,
    },
    RichText {
        rtf: Vec<u8>,
        /// Plain-text companion used for previews and plain pastes
        plain: String,
    },
    Image {
        /// Uniform type of the bytes, e.g. "png" or "tiff"
        format: String,
        bytes: Vec<u8>,
    },
    FileList {
        paths: Vec<PathBuf>,
    },
}

impl PayloadContent {
    pub fn kind(&self) -> PayloadKind {
        match self {
            PayloadContent::Text { .. } => PayloadKind::Text,
            PayloadContent::RichText { .. } => PayloadKind::RichText,
            PayloadContent::Image { .. } => PayloadKind::Image,
            PayloadContent::FileList { .. } => PayloadKind::FileList,
        }
    }

    /// Size of the content in bytes
    pub fn byte_len(&self) -> usize {
        match self {
            PayloadContent::Text { text } => text.len(),
            PayloadContent::RichText { rtf, plain } => rtf.len() + plain.len(),
            PayloadContent::Image { bytes, .. } => bytes.len(),
            PayloadContent::FileList { paths } => paths
                .iter()
                .map(|p| p.as_os_str().len())
                .sum(),
        }
    }

    /// Single-line, truncated description for menus
    pub fn preview(&self) -> String {
        match self {
            PayloadContent::Text { text } => preview_line(text),
            PayloadContent::RichText { plain, .. } => preview_line(plain),
            PayloadContent::Image { format, .. } => format!("[Image: {}]", format),
            PayloadContent::FileList { paths } => match paths.as_slice() {
                [single] => preview_line(&single.display().to_string()),
                many => format!("[{} files]", many.len()),
            },
        }
    }
}

fn preview_line(text: &str) -> String {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if first_line.chars().count() > PREVIEW_CHARS {
        let truncated: String = first_line.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", truncated)
    } else {
        first_line.to_string()
    }
}

/// Output of the classifier: typed content plus its dedup hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPayload {
    pub content: PayloadContent,
    pub source_app: Option<String>,
    pub content_hash: ContentHash,
}

impl CapturedPayload {
    pub fn kind(&self) -> PayloadKind {
        self.content.kind()
    }
}

/// A single clipboard history record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub key: RecordKey,
    pub payload: CapturedPayload,
    pub created_at: DateTime<Utc>,
    pub pinned: bool,
    /// Recency stamp; larger is more recent. Persisted ordering key.
    pub sequence: u64,
}

impl ClipRecord {
    pub fn content_hash(&self) -> &ContentHash {
        &self.payload.content_hash
    }

    pub fn preview(&self) -> String {
        self.payload.content.preview()
    }
}

/// A user-authored reusable text entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetRecord {
    pub key: RecordKey,
    pub title: String,
    pub content: String,
    pub folder_key: Option<RecordKey>,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
}

/// Grouping for snippets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetFolder {
    pub key: RecordKey,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
}

/// Content resolved for the paste-execution collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasteableContent {
    pub kind: RecordKind,
    pub key: RecordKey,
    pub content: PayloadContent,
}

/// One typed representation offered by the OS clipboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representation {
    PlainText(String),
    RichText(Vec<u8>),
    Image { format: String, bytes: Vec<u8> },
    FileUrls(Vec<PathBuf>),
    /// Anything the engine does not understand (PDF, custom pasteboard types, ...)
    Other { type_name: String, bytes: Vec<u8> },
}

/// Raw clipboard read: every representation currently on the clipboard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    pub change_count: u64,
    pub representations: Vec<Representation>,
    pub source_app: Option<String>,
}

impl ClipboardSnapshot {
    pub fn text(change_count: u64, text: impl Into<String>) -> Self {
        Self {
            change_count,
            representations: vec![Representation::PlainText(text.into())],
            source_app: None,
        }
    }
}
