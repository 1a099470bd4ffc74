use std::sync::Arc;

use bridge_guard::{
    AccessError, AccessResult, ApiKey, FolderGuard, RemoteResourceRef, ResourceGuard,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{DrivePlaygroundConfig, FolderSource};
use crate::drive::{DriveApi, FOLDER_MIME, NATIVE_DOCUMENT_MIMES, ROOT_FOLDER_ID};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderListing {
    pub files: Vec<RemoteResourceRef>,
    pub next_page_token: Option<String>,
    pub folder_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    pub name: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub folder_id: Option<String>,
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub id: String,
    pub action: WriteAction,
}

/// What a write will upload, decided before anything touches the drive.
enum Media {
    Inline(Vec<u8>),
    Fetch(Url),
    EmptyNative,
}

pub struct DrivePlaygroundService {
    api_key: ApiKey,
    drive: Arc<dyn DriveApi>,
    guard: FolderGuard,
    fetcher: reqwest::Client,
}

impl DrivePlaygroundService {
    pub fn new(
        api_key: ApiKey,
        drive: Arc<dyn DriveApi>,
        folder_id: impl Into<String>,
        fetcher: reqwest::Client,
    ) -> Self {
        Self {
            api_key,
            drive,
            guard: FolderGuard::new(folder_id),
            fetcher,
        }
    }

    /// Resolves the configured folder and checks that it is one.
    pub async fn connect(
        config: &DrivePlaygroundConfig,
        drive: Arc<dyn DriveApi>,
    ) -> Result<Self, AccessError> {
        let folder_id = resolve_folder(&config.folder, drive.as_ref()).await?;
        let fetcher = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(AccessError::internal)?;
        tracing::info!(folder_id = %folder_id, "playground folder resolved");
        Ok(Self::new(config.api_key.clone(), drive, folder_id, fetcher))
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    pub fn folder_id(&self) -> &str {
        self.guard.folder_id()
    }

    pub async fn list(
        &self,
        page_token: Option<&str>,
        page_size: Option<u32>,
    ) -> AccessResult<FolderListing> {
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(AccessError::bad_request(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        let page_token = page_token.map(str::trim).filter(|token| !token.is_empty());

        let page = self
            .drive
            .list_children(self.folder_id(), page_token, page_size)
            .await?;
        Ok(FolderListing {
            files: page.files,
            next_page_token: page.next_page_token,
            folder_id: self.folder_id().to_string(),
        })
    }

    pub async fn read(&self, id: &str) -> AccessResult<Vec<u8>> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AccessError::bad_request("file id is required"));
        }
        let metadata = self.drive.get_metadata(id).await?;
        self.guard.confine(&metadata)?;
        if metadata.mime_type == FOLDER_MIME {
            return Err(AccessError::bad_request("folders have no content"));
        }
        tracing::debug!(file_id = %metadata.id, mime_type = %metadata.mime_type, "reading file");
        self.drive.download(&metadata).await
    }

    pub async fn write(&self, request: WriteRequest) -> AccessResult<WriteOutcome> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AccessError::bad_request("name is required"));
        }
        let media = plan_media(&request)?;
        let folder = self.guard.confine_destination(request.folder_id.as_deref())?;

        let media = match media {
            Media::Inline(bytes) => Some(bytes),
            Media::Fetch(url) => Some(self.fetch(url).await?),
            Media::EmptyNative => None,
        };

        match self.drive.find_child_by_name(folder, name).await? {
            Some(existing) => {
                let Some(media) = media else {
                    return Err(AccessError::Conflict(
                        "a file with this name already exists; provide content or file_url to update it"
                            .to_string(),
                    ));
                };
                self.drive
                    .update(&existing.id, name, &request.mime_type, media)
                    .await?;
                tracing::info!(file_id = %existing.id, name, "updated file");
                Ok(WriteOutcome {
                    id: existing.id,
                    action: WriteAction::Updated,
                })
            }
            None => {
                let id = self
                    .drive
                    .create(folder, name, &request.mime_type, media)
                    .await?;
                tracing::info!(file_id = %id, name, "created file");
                Ok(WriteOutcome {
                    id,
                    action: WriteAction::Created,
                })
            }
        }
    }

    async fn fetch(&self, url: Url) -> AccessResult<Vec<u8>> {
        let host = url.host_str().unwrap_or_default().to_string();
        tracing::debug!(%host, "fetching file_url");
        let response = self
            .fetcher
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_error)?;
        let bytes = response.bytes().await.map_err(fetch_error)?;
        Ok(bytes.to_vec())
    }
}

fn plan_media(request: &WriteRequest) -> AccessResult<Media> {
    let file_url = request
        .file_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());

    match (&request.content, file_url) {
        (Some(_), Some(_)) => Err(AccessError::bad_request(
            "provide only one of 'content' or 'file_url'",
        )),
        (Some(content), None) => Ok(Media::Inline(content.as_bytes().to_vec())),
        (None, Some(raw)) => {
            let url = Url::parse(raw)
                .map_err(|error| AccessError::bad_request(format!("invalid file_url: {error}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(AccessError::bad_request("file_url must be http or https"));
            }
            Ok(Media::Fetch(url))
        }
        (None, None) if NATIVE_DOCUMENT_MIMES.contains(&request.mime_type.as_str()) => {
            Ok(Media::EmptyNative)
        }
        (None, None) => Err(AccessError::bad_request(
            "provide 'content', 'file_url', or a Google Doc/Sheet/Slide mime_type for an empty file",
        )),
    }
}

fn fetch_error(error: reqwest::Error) -> AccessError {
    if error.is_timeout() {
        return AccessError::Timeout("fetching file_url timed out".to_string());
    }
    AccessError::upstream(format!("failed to fetch file_url: {error}"))
}

/// Finds the playground folder id, walking names down from the drive root
/// when no id is configured. Returns the id Drive reports, so an alias such
/// as `root` resolves to the real folder id.
pub async fn resolve_folder(source: &FolderSource, drive: &dyn DriveApi) -> AccessResult<String> {
    let folder_id = match source {
        FolderSource::Id(id) => id.clone(),
        FolderSource::Path(names) => {
            let mut parent = ROOT_FOLDER_ID.to_string();
            for name in names {
                parent = drive.find_folder(&parent, name).await?.ok_or_else(|| {
                    AccessError::not_found(format!(
                        "folder not found: {}; missing after: {name}",
                        names.join(" / ")
                    ))
                })?;
            }
            parent
        }
    };

    let metadata = drive.get_metadata(&folder_id).await?;
    if metadata.mime_type != FOLDER_MIME {
        return Err(AccessError::bad_request(format!(
            "{folder_id} is not a folder"
        )));
    }
    Ok(metadata.id)
}
