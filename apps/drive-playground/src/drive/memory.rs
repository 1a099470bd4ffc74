use std::collections::BTreeMap;

use async_trait::async_trait;
use bridge_guard::{AccessError, AccessResult, RemoteResourceRef};
use chrono::{SecondsFormat, Utc};
use tokio::sync::Mutex;

use super::{DriveApi, FOLDER_MIME, FilePage, ROOT_FOLDER_ID};

/// An in-process drive with Drive's listing semantics. Backs mock mode and
/// the service tests.
#[derive(Default)]
pub struct MemoryDrive {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, StoredFile>,
    next_id: u64,
}

struct StoredFile {
    meta: RemoteResourceRef,
    content: Vec<u8>,
}

impl MemoryState {
    fn insert(&mut self, parent: &str, name: &str, mime_type: &str, content: Vec<u8>) -> String {
        self.next_id += 1;
        let id = format!("mem-{}", self.next_id);
        let size = (mime_type != FOLDER_MIME).then_some(content.len() as u64);
        self.files.insert(
            id.clone(),
            StoredFile {
                meta: RemoteResourceRef {
                    id: id.clone(),
                    name: name.to_string(),
                    mime_type: mime_type.to_string(),
                    parents: vec![parent.to_string()],
                    size,
                    modified_time: Some(now()),
                },
                content,
            },
        );
        id
    }

    /// Children sorted by name, then id, as Drive's `orderBy=name` would.
    fn children(&self, folder_id: &str) -> Vec<&RemoteResourceRef> {
        let mut children = self
            .files
            .values()
            .map(|file| &file.meta)
            .filter(|meta| meta.has_parent(folder_id))
            .collect::<Vec<_>>();
        children.sort_by(|left, right| left.name.cmp(&right.name).then(left.id.cmp(&right.id)));
        children
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl MemoryDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_file(
        &self,
        parent: &str,
        name: &str,
        mime_type: &str,
        content: impl Into<Vec<u8>>,
    ) -> String {
        self.state
            .lock()
            .await
            .insert(parent, name, mime_type, content.into())
    }

    pub async fn insert_folder(&self, parent: &str, name: &str) -> String {
        self.insert_file(parent, name, FOLDER_MIME, Vec::new()).await
    }

    /// Creates any missing folders along `names` under the root and returns
    /// the id of the last one.
    pub async fn ensure_folder_path(&self, names: &[String]) -> String {
        let mut parent = ROOT_FOLDER_ID.to_string();
        for name in names {
            parent = match self.find_folder(&parent, name).await {
                Ok(Some(existing)) => existing,
                _ => self.insert_folder(&parent, name).await,
            };
        }
        parent
    }

    pub async fn content_of(&self, id: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .files
            .get(id)
            .map(|file| file.content.clone())
    }
}

#[async_trait]
impl DriveApi for MemoryDrive {
    async fn get_metadata(&self, id: &str) -> AccessResult<RemoteResourceRef> {
        self.state
            .lock()
            .await
            .files
            .get(id)
            .map(|file| file.meta.clone())
            .ok_or_else(|| AccessError::not_found(format!("File not found: {id}.")))
    }

    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> AccessResult<FilePage> {
        let offset = match page_token {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| AccessError::bad_request("invalid page token"))?,
        };
        let page_size = page_size as usize;

        let state = self.state.lock().await;
        let children = state.children(folder_id);
        let files = children
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|meta| (*meta).clone())
            .collect::<Vec<_>>();
        let next = offset + files.len();
        Ok(FilePage {
            files,
            next_page_token: (next < children.len()).then(|| next.to_string()),
        })
    }

    async fn find_child_by_name(
        &self,
        folder_id: &str,
        name: &str,
    ) -> AccessResult<Option<RemoteResourceRef>> {
        let state = self.state.lock().await;
        Ok(state
            .children(folder_id)
            .into_iter()
            .find(|meta| meta.name == name)
            .cloned())
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> AccessResult<Option<String>> {
        let state = self.state.lock().await;
        Ok(state
            .children(parent_id)
            .into_iter()
            .find(|meta| meta.name == name && meta.mime_type == FOLDER_MIME)
            .map(|meta| meta.id.clone()))
    }

    async fn download(&self, file: &RemoteResourceRef) -> AccessResult<Vec<u8>> {
        self.content_of(&file.id)
            .await
            .ok_or_else(|| AccessError::not_found(format!("File not found: {}.", file.id)))
    }

    async fn create(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        media: Option<Vec<u8>>,
    ) -> AccessResult<String> {
        let mut state = self.state.lock().await;
        if !state.files.contains_key(folder_id) && folder_id != ROOT_FOLDER_ID {
            return Err(AccessError::not_found(format!("File not found: {folder_id}.")));
        }
        Ok(state.insert(folder_id, name, mime_type, media.unwrap_or_default()))
    }

    async fn update(
        &self,
        id: &str,
        name: &str,
        mime_type: &str,
        media: Vec<u8>,
    ) -> AccessResult<()> {
        let mut state = self.state.lock().await;
        let file = state
            .files
            .get_mut(id)
            .ok_or_else(|| AccessError::not_found(format!("File not found: {id}.")))?;
        file.meta.name = name.to_string();
        file.meta.mime_type = mime_type.to_string();
        file.meta.size = Some(media.len() as u64);
        file.meta.modified_time = Some(now());
        file.content = media;
        Ok(())
    }
}
