//! Containment of remote storage resources to one configured folder.

use serde::{Deserialize, Serialize};

use crate::error::{AccessError, AccessResult};
use crate::guard::ResourceGuard;

/// Metadata the storage collaborator reports for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteResourceRef {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
}

impl RemoteResourceRef {
    pub fn has_parent(&self, folder_id: &str) -> bool {
        self.parents.iter().any(|parent| parent == folder_id)
    }
}

#[derive(Debug, Clone)]
pub struct FolderGuard {
    folder_id: String,
}

impl FolderGuard {
    pub fn new(folder_id: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into(),
        }
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    /// Writes only ever land in the configured folder. A caller may name it
    /// explicitly; naming any other folder is refused.
    pub fn confine_destination(&self, requested: Option<&str>) -> AccessResult<&str> {
        match requested.map(str::trim).filter(|value| !value.is_empty()) {
            None => Ok(&self.folder_id),
            Some(folder) if folder == self.folder_id => Ok(&self.folder_id),
            Some(folder) => Err(AccessError::NotContained(folder.to_string())),
        }
    }
}

impl ResourceGuard for FolderGuard {
    type Candidate = RemoteResourceRef;
    type Confined = String;

    /// Accepts a resource only when the configured folder is one of its
    /// reported parents.
    fn confine(&self, resource: &RemoteResourceRef) -> AccessResult<String> {
        if resource.has_parent(&self.folder_id) {
            return Ok(resource.id.clone());
        }
        tracing::warn!(resource_id = %resource.id, "resource outside configured folder");
        Err(AccessError::NotContained(resource.id.clone()))
    }
}
