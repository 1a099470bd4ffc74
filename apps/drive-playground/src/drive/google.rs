use std::sync::Arc;

use async_trait::async_trait;
use bridge_guard::{AccessError, AccessResult, RemoteResourceRef};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{DriveApi, FOLDER_MIME, FilePage, export_mime_for, is_native, quote_query};
use crate::oauth::TokenSource;

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FILE_FIELDS: &str = "id, name, mimeType, parents, size, modifiedTime";

/// Drive v3 over REST. Request timeouts come from the supplied client.
pub struct GoogleDrive {
    http: reqwest::Client,
    tokens: Arc<TokenSource>,
    api_base: String,
    upload_base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    parents: Vec<String>,
    /// Drive reports sizes as decimal strings.
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    modified_time: Option<String>,
}

impl From<DriveFile> for RemoteResourceRef {
    fn from(file: DriveFile) -> Self {
        RemoteResourceRef {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            parents: file.parents,
            size: file.size.and_then(|size| size.parse().ok()),
            modified_time: file.modified_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

impl GoogleDrive {
    pub fn new(http: reqwest::Client, tokens: Arc<TokenSource>) -> Self {
        Self::with_base_urls(http, tokens, DRIVE_API_BASE, DRIVE_UPLOAD_BASE)
    }

    pub fn with_base_urls(
        http: reqwest::Client,
        tokens: Arc<TokenSource>,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tokens,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.api_base, urlencoding::encode(id))
    }

    async fn send(&self, request: RequestBuilder) -> AccessResult<Response> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = drive_error_message(&body);
        tracing::debug!(status = status.as_u16(), %message, "drive api call failed");
        if status == StatusCode::NOT_FOUND {
            return Err(AccessError::NotFound(message));
        }
        Err(AccessError::Upstream(format!(
            "drive api returned {}: {message}",
            status.as_u16()
        )))
    }

    async fn search(&self, query: String, page_size: u32) -> AccessResult<DriveFileList> {
        let fields = format!("files({FILE_FIELDS})");
        let page_size = page_size.to_string();
        let request = self.http.get(format!("{}/files", self.api_base)).query(&[
            ("q", query.as_str()),
            ("fields", fields.as_str()),
            ("pageSize", page_size.as_str()),
            ("spaces", "drive"),
        ]);
        self.send(request).await?.json().await.map_err(decode_error)
    }

    /// Metadata and media in one `multipart/related` request. A failed upload
    /// leaves no file behind.
    async fn multipart_upload(
        &self,
        request: RequestBuilder,
        metadata: serde_json::Value,
        mime_type: &str,
        media: Vec<u8>,
    ) -> AccessResult<String> {
        let boundary = format!("drive-playground-{}", uuid::Uuid::new_v4().simple());
        let content_type = upload_content_type(mime_type);
        let body = multipart_related_body(&boundary, &metadata, content_type, media);
        let request = request
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);
        let uploaded: CreatedFile = self.send(request).await?.json().await.map_err(decode_error)?;
        Ok(uploaded.id)
    }
}

#[async_trait]
impl DriveApi for GoogleDrive {
    async fn get_metadata(&self, id: &str) -> AccessResult<RemoteResourceRef> {
        let request = self
            .http
            .get(self.file_url(id))
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")]);
        let file: DriveFile = self.send(request).await?.json().await.map_err(decode_error)?;
        Ok(file.into())
    }

    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> AccessResult<FilePage> {
        let query = format!("{} in parents and trashed = false", quote_query(folder_id));
        let fields = format!("nextPageToken, files({FILE_FIELDS})");
        let page_size = page_size.to_string();
        let mut request = self.http.get(format!("{}/files", self.api_base)).query(&[
            ("q", query.as_str()),
            ("fields", fields.as_str()),
            ("pageSize", page_size.as_str()),
            ("orderBy", "name"),
            ("spaces", "drive"),
        ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let list: DriveFileList = self.send(request).await?.json().await.map_err(decode_error)?;
        Ok(FilePage {
            files: list.files.into_iter().map(Into::into).collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn find_child_by_name(
        &self,
        folder_id: &str,
        name: &str,
    ) -> AccessResult<Option<RemoteResourceRef>> {
        let query = format!(
            "{} in parents and name = {} and trashed = false",
            quote_query(folder_id),
            quote_query(name)
        );
        let list = self.search(query, 1).await?;
        Ok(list.files.into_iter().next().map(Into::into))
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> AccessResult<Option<String>> {
        let query = format!(
            "{} in parents and name = {} and mimeType = {} and trashed = false",
            quote_query(parent_id),
            quote_query(name),
            quote_query(FOLDER_MIME)
        );
        let list = self.search(query, 1).await?;
        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    async fn download(&self, file: &RemoteResourceRef) -> AccessResult<Vec<u8>> {
        let request = if let Some(export) = export_mime_for(&file.mime_type) {
            self.http
                .get(format!("{}/export", self.file_url(&file.id)))
                .query(&[("mimeType", export)])
        } else if is_native(&file.mime_type) {
            return Err(AccessError::bad_request(format!(
                "{} cannot be downloaded as content",
                file.mime_type
            )));
        } else {
            self.http
                .get(self.file_url(&file.id))
                .query(&[("alt", "media"), ("supportsAllDrives", "true")])
        };
        let bytes = self
            .send(request)
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn create(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        media: Option<Vec<u8>>,
    ) -> AccessResult<String> {
        let metadata = json!({ "name": name, "mimeType": mime_type, "parents": [folder_id] });
        if let Some(media) = media {
            let request = self.http.post(format!("{}/files", self.upload_base));
            return self
                .multipart_upload(request, metadata, mime_type, media)
                .await;
        }

        // An empty native document has no media; metadata alone creates it.
        let request = self
            .http
            .post(format!("{}/files", self.api_base))
            .query(&[("fields", "id")])
            .json(&metadata);
        let created: CreatedFile = self.send(request).await?.json().await.map_err(decode_error)?;
        Ok(created.id)
    }

    async fn update(
        &self,
        id: &str,
        name: &str,
        mime_type: &str,
        media: Vec<u8>,
    ) -> AccessResult<()> {
        let request = self.http.patch(format!(
            "{}/files/{}",
            self.upload_base,
            urlencoding::encode(id)
        ));
        self.multipart_upload(
            request,
            json!({ "name": name, "mimeType": mime_type }),
            mime_type,
            media,
        )
        .await?;
        Ok(())
    }
}

/// Native documents are uploaded in their text export format and converted.
fn upload_content_type(mime_type: &str) -> &str {
    if is_native(mime_type) {
        export_mime_for(mime_type).unwrap_or("application/octet-stream")
    } else {
        mime_type
    }
}

fn multipart_related_body(
    boundary: &str,
    metadata: &serde_json::Value,
    content_type: &str,
    media: Vec<u8>,
) -> Vec<u8> {
    let mut body = Vec::with_capacity(media.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: {content_type}\r\n\r\n").as_bytes(),
    );
    body.extend(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn transport_error(error: reqwest::Error) -> AccessError {
    if error.is_timeout() {
        return AccessError::Timeout("drive api call timed out".to_string());
    }
    AccessError::upstream(format!("drive api unreachable: {error}"))
}

fn decode_error(error: reqwest::Error) -> AccessError {
    AccessError::upstream(format!("unexpected drive api response: {error}"))
}

fn drive_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        error: ErrorBody,
    }
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => body.trim().chars().take(200).collect(),
    }
}
