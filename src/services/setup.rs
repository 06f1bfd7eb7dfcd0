use crate::core::config::{Config, API_KEY_ENV};
use crate::core::io::Storage;
use anyhow::{bail, Result};
use inquire::{Confirm, Password, Select};
use std::path::Path;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];
const SKIP_OPTION: &str = "(不使用参考图)";

/// Makes sure a credential is available, asking for one interactively if
/// neither config.yml nor the environment provides it.
pub fn run_setup(config: &mut Config) -> Result<()> {
    if !config.api_key.trim().is_empty() {
        return Ok(());
    }
    if config.unattended {
        bail!(
            "No API key configured. Set api_key in config.yml or the {} environment variable.",
            API_KEY_ENV
        );
    }

    let key = Password::new("Coze API Key:")
        .without_confirmation()
        .prompt()?;
    if key.trim().is_empty() {
        bail!("请先在设置中配置 Coze API Key");
    }
    config.api_key = key.trim().to_string();

    let save = Confirm::new("Save the API key to config.yml?")
        .with_default(false)
        .prompt()?;
    if save {
        config.save()?;
    }
    Ok(())
}

fn is_image(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Offers the images in the input folder as a style reference.
pub async fn choose_reference_image(config: &Config, storage: &dyn Storage) -> Result<Option<String>> {
    if config.unattended {
        return Ok(None);
    }

    let mut candidates: Vec<String> = storage
        .list(&config.input_folder)
        .await?
        .into_iter()
        .filter(|p| is_image(p))
        .collect();
    if candidates.is_empty() {
        return Ok(None);
    }

    candidates.insert(0, SKIP_OPTION.to_string());
    let choice = Select::new("Style reference image:", candidates).prompt()?;
    if choice == SKIP_OPTION {
        Ok(None)
    } else {
        Ok(Some(choice))
    }
}
