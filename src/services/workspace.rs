//! Where generated artifacts end up. The controller only ever calls the
//! [`Persistence`] trait after a successful generation; whether that hits
//! disk, memory, or nothing at all is decided at startup.

use crate::core::io::Storage;
use crate::core::state::{ProjectState, WorkItem};
use crate::utils::text::sanitize_file_name;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use log::debug;
use std::path::Path;
use std::sync::Arc;

pub const PROJECT_FILE: &str = "project.json";

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_profile(&self, item: &WorkItem, text: &str) -> Result<()>;
    /// `image_ref` is either a `data:` URL or an http(s) URL to download.
    async fn save_asset(&self, item: &WorkItem, file_name: &str, image_ref: &str) -> Result<()>;
    async fn save_project_state(&self, state: &ProjectState) -> Result<()>;
    async fn load_project_state(&self) -> Result<Option<ProjectState>>;
}

/// File name for the `index`-th (0-based) image of an item.
pub fn asset_file_name(index: usize) -> String {
    format!("视图_{}.png", index + 1)
}

/// Workspace folder layout:
///
/// ```text
/// <root>/project.json
/// <root>/角色/<name>_<id>/角色设定.txt
/// <root>/角色/<name>_<id>/视图_1.png
/// <root>/场景/<name>_<id>/场景设定.txt
/// ```
pub struct WorkspacePersistence {
    root: String,
    storage: Arc<dyn Storage>,
    http: reqwest::Client,
}

impl WorkspacePersistence {
    pub fn new(root: &str, storage: Arc<dyn Storage>) -> Self {
        Self {
            root: root.to_string(),
            storage,
            http: reqwest::Client::new(),
        }
    }

    fn item_dir(&self, item: &WorkItem) -> std::path::PathBuf {
        let label = item.kind().label();
        Path::new(&self.root)
            .join(label)
            .join(format!("{}_{}", sanitize_file_name(&item.name), item.id))
    }

    fn project_path(&self) -> String {
        Path::new(&self.root).join(PROJECT_FILE).to_string_lossy().to_string()
    }

    async fn image_bytes(&self, image_ref: &str) -> Result<Vec<u8>> {
        if let Some(rest) = image_ref.strip_prefix("data:") {
            let (_, data) = rest
                .split_once(',')
                .ok_or_else(|| anyhow!("Malformed data URL"))?;
            return general_purpose::STANDARD
                .decode(data.trim())
                .context("Invalid base64 image data");
        }

        debug!("Downloading image {}", image_ref);
        let resp = self.http.get(image_ref).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Persistence for WorkspacePersistence {
    async fn save_profile(&self, item: &WorkItem, text: &str) -> Result<()> {
        let path = self
            .item_dir(item)
            .join(format!("{}设定.txt", item.kind().label()));
        let path_str = path.to_string_lossy();
        self.storage.write(&path_str, text.as_bytes()).await?;
        debug!("Profile saved: {}", path_str);
        Ok(())
    }

    async fn save_asset(&self, item: &WorkItem, file_name: &str, image_ref: &str) -> Result<()> {
        let bytes = self.image_bytes(image_ref).await?;
        let path = self.item_dir(item).join(sanitize_file_name(file_name));
        let path_str = path.to_string_lossy();
        self.storage.write(&path_str, &bytes).await?;
        debug!("Asset saved: {} ({} bytes)", path_str, bytes.len());
        Ok(())
    }

    async fn save_project_state(&self, state: &ProjectState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        self.storage.write(&self.project_path(), content.as_bytes()).await?;
        Ok(())
    }

    async fn load_project_state(&self) -> Result<Option<ProjectState>> {
        let path = self.project_path();
        if !self.storage.exists(&path).await? {
            return Ok(None);
        }
        let bytes = self.storage.read(&path).await?;
        let content = String::from_utf8(bytes)?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path))?;
        Ok(Some(state))
    }
}

/// No workspace selected: everything stays in memory for the session.
pub struct VirtualPersistence;

#[async_trait]
impl Persistence for VirtualPersistence {
    async fn save_profile(&self, _item: &WorkItem, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn save_asset(&self, _item: &WorkItem, _file_name: &str, _image_ref: &str) -> Result<()> {
        Ok(())
    }

    async fn save_project_state(&self, _state: &ProjectState) -> Result<()> {
        Ok(())
    }

    async fn load_project_state(&self) -> Result<Option<ProjectState>> {
        Ok(None)
    }
}
