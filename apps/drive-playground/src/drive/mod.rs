//! The remote storage collaborator.

mod google;
mod memory;

use async_trait::async_trait;
use bridge_guard::{AccessResult, RemoteResourceRef};

pub use google::GoogleDrive;
pub use memory::MemoryDrive;

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Drive's alias for the top of "My Drive".
pub const ROOT_FOLDER_ID: &str = "root";

/// Native document types that may be created without any content.
pub const NATIVE_DOCUMENT_MIMES: [&str; 3] = [
    "application/vnd.google-apps.document",
    "application/vnd.google-apps.spreadsheet",
    "application/vnd.google-apps.presentation",
];

#[derive(Debug, Clone, Default)]
pub struct FilePage {
    pub files: Vec<RemoteResourceRef>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait DriveApi: Send + Sync {
    /// `NotFound` when no resource has this id.
    async fn get_metadata(&self, id: &str) -> AccessResult<RemoteResourceRef>;

    /// One page of the folder's non-trashed children, ordered by name.
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> AccessResult<FilePage>;

    async fn find_child_by_name(
        &self,
        folder_id: &str,
        name: &str,
    ) -> AccessResult<Option<RemoteResourceRef>>;

    async fn find_folder(&self, parent_id: &str, name: &str) -> AccessResult<Option<String>>;

    /// Raw content; native documents come back exported as text.
    async fn download(&self, file: &RemoteResourceRef) -> AccessResult<Vec<u8>>;

    /// Returns the new resource's id.
    async fn create(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        media: Option<Vec<u8>>,
    ) -> AccessResult<String>;

    async fn update(&self, id: &str, name: &str, mime_type: &str, media: Vec<u8>)
    -> AccessResult<()>;
}

/// Export format for a native document, `None` for ordinary blobs.
pub(crate) fn export_mime_for(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "application/vnd.google-apps.document" => Some("text/plain"),
        "application/vnd.google-apps.spreadsheet" => Some("text/csv"),
        "application/vnd.google-apps.presentation" => Some("text/plain"),
        "application/vnd.google-apps.drawing" => Some("image/svg+xml"),
        "application/vnd.google-apps.script" => Some("application/vnd.google-apps.script+json"),
        _ => None,
    }
}

pub(crate) fn is_native(mime_type: &str) -> bool {
    mime_type.starts_with("application/vnd.google-apps.")
}

/// Quotes a value for a Drive search query.
pub(crate) fn quote_query(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}
