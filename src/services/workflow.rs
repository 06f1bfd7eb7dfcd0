use crate::core::config::Config;
use crate::core::io::Storage;
use crate::core::project::SharedProject;
use crate::core::state::{EntityKind, GenerationHistoryItem, OverallStyle, WorkItem};
use crate::services::client::{UploadedFile, WorkflowClient};
use crate::services::document::{is_supported, DocumentExtractor, ScriptDocumentExtractor};
use crate::services::extract::{PromptGenerator, WorkflowExtractor};
use crate::services::queue::BulkPromptQueue;
use crate::services::workspace::{
    asset_file_name, Persistence, VirtualPersistence, WorkspacePersistence,
};
use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Result of one image generation call. Asset saves run in the
/// background; dropping `saves` detaches them.
pub struct GeneratedImages {
    pub urls: Vec<String>,
    pub saves: Vec<JoinHandle<()>>,
}

pub struct StoryboardManager {
    config: Config,
    project: SharedProject,
    extractor: Arc<WorkflowExtractor>,
    persistence: Arc<dyn Persistence>,
    documents: Box<dyn DocumentExtractor>,
    storage: Arc<dyn Storage>,
    queue: BulkPromptQueue,
}

impl StoryboardManager {
    pub async fn new(config: Config, client: Arc<dyn WorkflowClient>, storage: Arc<dyn Storage>) -> Result<Self> {
        let persistence: Arc<dyn Persistence> = if config.virtual_workspace {
            info!("Virtual workspace: generated files stay in memory");
            Arc::new(VirtualPersistence)
        } else {
            Arc::new(WorkspacePersistence::new(&config.workspace_folder, storage.clone()))
        };
        Self::with_persistence(config, client, storage, persistence).await
    }

    pub async fn with_persistence(
        config: Config,
        client: Arc<dyn WorkflowClient>,
        storage: Arc<dyn Storage>,
        persistence: Arc<dyn Persistence>,
    ) -> Result<Self> {
        let state = persistence
            .load_project_state()
            .await
            .context("Failed to load project state")?
            .unwrap_or_default();
        if !state.project_name.is_empty() {
            info!("Resuming project: {}", state.project_name);
        }

        let project = SharedProject::new(state);
        let extractor = Arc::new(WorkflowExtractor::new(
            client,
            config.workflows.clone(),
            &config.api_key,
        ));
        let queue = BulkPromptQueue::new(project.clone(), extractor.clone(), persistence.clone());

        Ok(Self {
            config,
            project,
            extractor,
            persistence,
            documents: Box::new(ScriptDocumentExtractor),
            storage,
            queue,
        })
    }

    pub fn project(&self) -> &SharedProject {
        &self.project
    }

    pub fn queue(&self) -> &BulkPromptQueue {
        &self.queue
    }

    pub async fn save(&self) -> Result<()> {
        self.persistence
            .save_project_state(&self.project.snapshot())
            .await
            .context("Failed to save project state")
    }

    /// First supported script file in the input folder, by name.
    pub async fn find_script(&self) -> Result<Option<String>> {
        let mut entries: Vec<String> = self
            .storage
            .list(&self.config.input_folder)
            .await?
            .into_iter()
            .filter(|e| is_supported(e))
            .collect();
        entries.sort();
        Ok(entries.into_iter().next())
    }

    /// Reads a script document into the project. The project takes the
    /// file's name unless it already has one.
    pub async fn load_script(&self, path: &str) -> Result<()> {
        let bytes = self
            .storage
            .read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))?;
        let file_name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string());
        let text = self.documents.extract_text(&file_name, &bytes)?;
        let stem = Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        info!("Loaded script {} ({} chars)", file_name, text.chars().count());
        self.project.update(|state| {
            state.script = text;
            if state.project_name.is_empty() {
                state.project_name = stem;
            }
        });
        Ok(())
    }

    /// Analyzes the script's overall style. An uploaded reference image
    /// survives re-analysis.
    pub async fn analyze_style(&self) -> Result<OverallStyle> {
        let script = self.project.read(|state| state.script.clone());
        if script.trim().is_empty() {
            bail!("请先上传剧本");
        }

        let mut style = self.extractor.analyze_style(&script).await?;
        let style = self.project.update(|state| {
            style.reference_image_id = state.style.reference_image_id.clone();
            style.reference_image_name = state.style.reference_image_name.clone();
            state.style = style;
            state.style.clone()
        });
        self.save().await?;
        Ok(style)
    }

    pub async fn upload_reference_image(&self, data: Vec<u8>, file_name: &str) -> Result<UploadedFile> {
        let uploaded = self.extractor.upload_reference(data, file_name).await?;
        info!("Reference image uploaded: {} ({})", uploaded.file_name, uploaded.id);
        self.project.update(|state| {
            state.style.reference_image_id = Some(uploaded.id.clone());
            state.style.reference_image_name = Some(uploaded.file_name.clone());
        });
        self.save().await?;
        Ok(uploaded)
    }

    pub fn clear_reference_image(&self) {
        self.project.update(|state| {
            state.style.reference_image_id = None;
            state.style.reference_image_name = None;
        });
    }

    /// Replaces both entity lists with what the workflow finds in the
    /// script. Returns `(characters, scenes)`.
    pub async fn extract_entities(&self) -> Result<(usize, usize)> {
        let (script, style) = self
            .project
            .read(|state| (state.script.clone(), state.style.clone()));
        if !style.is_configured() {
            bail!("请先完成风格分析");
        }

        let entities = self.extractor.extract_entities(&script, &style).await?;
        let counts = (entities.characters.len(), entities.scenes.len());
        self.project.update(|state| {
            state.characters = entities.characters;
            state.scenes = entities.scenes;
        });
        self.save().await?;
        Ok(counts)
    }

    async fn save_profile_logged(&self, item: &WorkItem) {
        if let Err(e) = self.persistence.save_profile(item, &item.profile_text()).await {
            warn!("Failed to save profile for {}: {:#}", item.name, e);
        }
    }

    /// Generates the visual prompt for a single item.
    pub async fn generate_prompt(&self, kind: EntityKind, id: &str) -> Result<String> {
        let item = self.project.update(|state| match state.find_mut(kind, id) {
            None => Err(anyhow!("{}不存在: {}", kind.label(), id)),
            Some(item) if item.flags.prompt_in_flight => {
                Err(anyhow!("{} 的提示词正在生成中", item.name))
            }
            Some(item) => {
                item.flags.prompt_in_flight = true;
                Ok(item.clone())
            }
        })?;
        let (style, script) = self
            .project
            .read(|state| (state.style.clone(), state.script.clone()));

        match self.extractor.generate_prompt(&item, &style, &script).await {
            Ok(prompt) => {
                if let Some(updated) = self.project.finish_prompt(kind, id, Some(prompt.clone())) {
                    self.save_profile_logged(&updated).await;
                }
                Ok(prompt)
            }
            Err(e) => {
                self.project.finish_prompt(kind, id, None);
                Err(e)
            }
        }
    }

    /// Generates images from the item's prompt. New images are appended to
    /// the item's gallery and recorded in the history; saving them to the
    /// workspace happens in the background.
    pub async fn generate_images(&self, kind: EntityKind, id: &str) -> Result<GeneratedImages> {
        let item = self.project.update(|state| match state.find_mut(kind, id) {
            None => Err(anyhow!("{}不存在: {}", kind.label(), id)),
            Some(item) if item.visual_prompt.trim().is_empty() => {
                Err(anyhow!("请先为 {} 生成提示词", item.name))
            }
            Some(item) if item.flags.image_in_flight => Err(anyhow!("{} 的图像正在生成中", item.name)),
            Some(item) => {
                item.flags.image_in_flight = true;
                Ok(item.clone())
            }
        })?;

        let urls = match self.extractor.generate_images(&item, &self.config.image_model).await {
            Ok(urls) => urls,
            Err(e) => {
                self.project.set_image_in_flight(kind, id, false);
                return Err(e);
            }
        };
        info!("{} image(s) generated for {}", urls.len(), item.name);

        let (current, offset) = self
            .project
            .update(|state| {
                let item = state.find_mut(kind, id)?;
                item.flags.image_in_flight = false;
                let offset = item.images.len();
                item.images.extend(urls.iter().cloned());
                Some((item.clone(), offset))
            })
            .unwrap_or((item, 0));
        self.project
            .push_history(GenerationHistoryItem::record(&current, &urls));

        let saves = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let persistence = self.persistence.clone();
                let item = current.clone();
                let file_name = asset_file_name(offset + i);
                let url = url.clone();
                tokio::spawn(async move {
                    if let Err(e) = persistence.save_asset(&item, &file_name, &url).await {
                        warn!("Failed to save {} for {}: {:#}", file_name, item.name, e);
                    }
                })
            })
            .collect();

        Ok(GeneratedImages { urls, saves })
    }
}
