use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const API_KEY_ENV: &str = "COZE_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub workflows: WorkflowIds,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default = "default_input")]
    pub input_folder: String,

    #[serde(default = "default_workspace")]
    pub workspace_folder: String,

    #[serde(default)]
    pub unattended: bool,

    /// Skip all disk writes for generated profiles, assets and project state.
    #[serde(default)]
    pub virtual_workspace: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkflowIds {
    #[serde(default = "default_style_workflow")]
    pub style: String,
    #[serde(default = "default_entities_workflow")]
    pub entities: String,
    #[serde(default = "default_character_prompt_workflow")]
    pub character_prompt: String,
    #[serde(default = "default_scene_prompt_workflow")]
    pub scene_prompt: String,
    #[serde(default = "default_image_workflow")]
    pub character_image: String,
    #[serde(default = "default_image_workflow")]
    pub scene_image: String,
}

impl Default for WorkflowIds {
    fn default() -> Self {
        Self {
            style: default_style_workflow(),
            entities: default_entities_workflow(),
            character_prompt: default_character_prompt_workflow(),
            scene_prompt: default_scene_prompt_workflow(),
            character_image: default_image_workflow(),
            scene_image: default_image_workflow(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            workflows: WorkflowIds::default(),
            image_model: default_image_model(),
            input_folder: default_input(),
            workspace_folder: default_workspace(),
            unattended: false,
            virtual_workspace: false,
        }
    }
}

fn default_base_url() -> String {
    "https://api.coze.cn".to_string()
}
fn default_image_model() -> String {
    "Doubao-Seedream-4.0".to_string()
}
fn default_input() -> String {
    "input".to_string()
}
fn default_workspace() -> String {
    "workspace".to_string()
}
fn default_style_workflow() -> String {
    "7582884589447151643".to_string()
}
fn default_entities_workflow() -> String {
    "7582889307032272930".to_string()
}
fn default_character_prompt_workflow() -> String {
    "7586528499697451062".to_string()
}
fn default_scene_prompt_workflow() -> String {
    "7584007850298228799".to_string()
}
fn default_image_workflow() -> String {
    "7586599921504010283".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new("config.yml");
        if !path.exists() {
            anyhow::bail!("config.yml not found. Please create one.");
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        let mut config = Self::from_yaml(&content)?;
        if config.api_key.trim().is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                config.api_key = key;
            }
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml_ng::from_str(content).context("Failed to parse config.yml")?;
        url::Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base_url: {}", config.base_url))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.input_folder)?;
        if !self.virtual_workspace {
            fs::create_dir_all(&self.workspace_folder)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml("api_key: secret\n").unwrap();
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.base_url, "https://api.coze.cn");
        assert_eq!(config.workflows, WorkflowIds::default());
        assert_eq!(config.image_model, "Doubao-Seedream-4.0");
        assert!(!config.virtual_workspace);
    }

    #[test]
    fn test_partial_workflow_override() {
        let yaml = "workflows:\n  style: \"123\"\nunattended: true\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.workflows.style, "123");
        assert_eq!(config.workflows.entities, default_entities_workflow());
        assert!(config.unattended);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(Config::from_yaml("base_url: not a url\n").is_err());
    }
}
