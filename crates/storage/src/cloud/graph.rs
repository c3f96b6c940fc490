//! Minimal client for a Graph-style document library
//! (sites → drives → drive items).

use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::settings::TokenProvider;
use crate::error::{StorageError, StorageResult};

/// A file or folder in a document library.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub folder: Option<serde_json::Value>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct Drive {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct Page<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl GraphClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { http: Client::new(), base_url: base_url.into(), tokens }
    }

    fn url<S: AsRef<str>>(&self, segments: &[S]) -> StorageResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StorageError::Config(format!("invalid graph base URL '{}': {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Config(format!("graph base URL '{}' cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `drives/{drive}/root:/a/b[:/action]`
    fn item_url(&self, drive_id: &str, path: &[&str], action: Option<&str>) -> StorageResult<Url> {
        let mut segments: Vec<String> = vec!["drives".into(), drive_id.into(), "root:".into()];
        segments.extend(path.iter().map(|s| s.to_string()));
        if let Some(action) = action {
            if let Some(last) = segments.last_mut() {
                last.push(':');
            }
            segments.push(action.to_string());
        }
        self.url(&segments)
    }

    async fn get(&self, url: Url) -> StorageResult<Response> {
        let token = self.tokens.token().await?;
        Ok(self.http.get(url).bearer_auth(token).send().await?)
    }

    /// Resolve a site web URL such as `https://contoso.sharepoint.com/sites/billing`.
    pub async fn site_id(&self, site_url: &str) -> StorageResult<String> {
        let parsed = Url::parse(site_url)
            .map_err(|e| StorageError::Config(format!("invalid site URL '{site_url}': {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| StorageError::Config(format!("site URL '{site_url}' has no host")))?;

        let mut segments = vec!["sites".to_string()];
        let path: Vec<&str> = parsed.path().split('/').filter(|s| !s.is_empty()).collect();
        if path.is_empty() {
            segments.push(host.to_string());
        } else {
            segments.push(format!("{host}:"));
            segments.extend(path.iter().map(|s| s.to_string()));
        }

        let response = self.get(self.url(&segments)?).await?;
        let response = expect_success(response, format!("resolving site {site_url}")).await?;
        Ok(response.json::<IdOnly>().await?.id)
    }

    /// Drive id of the library named `library_name` (case-insensitive).
    pub async fn drive_id(&self, site_id: &str, library_name: &str) -> StorageResult<String> {
        let url = self.url(&["sites", site_id, "drives"])?;
        let response = self.get(url).await?;
        let response = expect_success(response, format!("listing libraries of site {site_id}")).await?;
        let drives = response.json::<Page<Drive>>().await?.value;
        drives
            .into_iter()
            .find(|d| d.name.eq_ignore_ascii_case(library_name))
            .map(|d| d.id)
            .ok_or_else(|| StorageError::Config(format!("document library '{library_name}' not found")))
    }

    pub async fn get_item(&self, drive_id: &str, path: &[&str]) -> StorageResult<Option<DriveItem>> {
        let response = self.get(self.item_url(drive_id, path, None)?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_success(response, format!("reading item {}", path.join("/"))).await?;
        Ok(Some(response.json().await?))
    }

    /// Create a folder under the drive root. An existing folder of the same
    /// name (409) counts as success.
    pub async fn create_folder(&self, drive_id: &str, name: &str) -> StorageResult<()> {
        let token = self.tokens.token().await?;
        let url = self.url(&["drives", drive_id, "root", "children"])?;
        let body = json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "fail",
        });
        let response = self.http.post(url).bearer_auth(token).json(&body).send().await?;
        if response.status() == StatusCode::CONFLICT {
            debug!(folder = name, "folder already exists");
            return Ok(());
        }
        expect_success(response, format!("creating folder {name}")).await?;
        debug!(folder = name, "created folder");
        Ok(())
    }

    pub async fn upload(
        &self,
        drive_id: &str,
        path: &[&str],
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<DriveItem> {
        let token = self.tokens.token().await?;
        let url = self.item_url(drive_id, path, Some("content"))?;
        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        let response = expect_success(response, format!("uploading {}", path.join("/"))).await?;
        Ok(response.json().await?)
    }

    pub async fn download(&self, drive_id: &str, path: &[&str]) -> StorageResult<Option<Vec<u8>>> {
        let response = self.get(self.item_url(drive_id, path, Some("content"))?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_success(response, format!("downloading {}", path.join("/"))).await?;
        Ok(Some(response.bytes().await?.to_vec()))
    }

    /// `false` when the item did not exist.
    pub async fn delete(&self, drive_id: &str, path: &[&str]) -> StorageResult<bool> {
        let token = self.tokens.token().await?;
        let url = self.item_url(drive_id, path, None)?;
        let response = self.http.delete(url).bearer_auth(token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        expect_success(response, format!("deleting {}", path.join("/"))).await?;
        Ok(true)
    }

    /// Children of a folder, following paging links. `None` when the folder
    /// does not exist.
    pub async fn children(&self, drive_id: &str, folder: &str) -> StorageResult<Option<Vec<DriveItem>>> {
        let mut url = self.item_url(drive_id, &[folder], Some("children"))?;
        let mut items = Vec::new();
        loop {
            let response = self.get(url).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let response = expect_success(response, format!("listing folder {folder}")).await?;
            let page = response.json::<Page<DriveItem>>().await?;
            items.extend(page.value);
            match page.next_link {
                Some(next) => {
                    url = Url::parse(&next).map_err(|e| StorageError::Config(format!("invalid paging link: {e}")))?;
                }
                None => break,
            }
        }
        Ok(Some(items))
    }
}

async fn expect_success(response: Response, context: String) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), context = %context, body = %body, "document library request failed");
    Err(StorageError::Remote { status: status.as_u16(), context })
}
