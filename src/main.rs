use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, warn};
use script2storyboard::core::config::Config;
use script2storyboard::core::io::{NativeStorage, Storage};
use script2storyboard::core::state::EntityKind;
use script2storyboard::services::client::CozeClient;
use script2storyboard::services::queue::BatchOutcome;
use script2storyboard::services::setup;
use script2storyboard::services::workflow::StoryboardManager;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // 1. Load config
    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists.");
            return Err(e);
        }
    };
    config.ensure_directories()?;
    setup::run_setup(&mut config)?;

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let client = Arc::new(CozeClient::new(&config.base_url));
    let manager = StoryboardManager::new(config.clone(), client, storage.clone()).await?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        let handle = manager.queue().handle();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if interrupted.swap(true, Ordering::SeqCst) {
                    eprintln!("\nInterrupted.");
                    std::process::exit(130);
                }
                println!("\nStopping after the current item... (Ctrl-C again to quit now)");
                handle.stop();
            }
        });
    }

    // 2. Script
    let script_path = manager
        .find_script()
        .await?
        .with_context(|| format!("No script (.txt, .md, .epub) found in '{}'", config.input_folder))?;
    println!("Loading script: {}", script_path);
    manager.load_script(&script_path).await?;

    // 3. Style
    let saved_style = manager.project().read(|s| s.style.clone());
    if saved_style.is_configured() {
        println!("Using saved style: {}", saved_style.name);
    } else {
        if let Some(image) = setup::choose_reference_image(&config, storage.as_ref()).await? {
            let bytes = storage.read(&image).await?;
            let file_name = Path::new(&image)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| image.clone());
            manager.upload_reference_image(bytes, &file_name).await?;
        }
        println!("Analyzing style...");
        let style = manager.analyze_style().await?;
        println!("Style: {} / {}", style.name, style.painting_style);
    }

    // 4. Characters and scenes
    let has_entities = manager
        .project()
        .read(|s| !s.characters.is_empty() || !s.scenes.is_empty());
    if !has_entities {
        println!("Extracting characters and scenes...");
        let (characters, scenes) = manager.extract_entities().await?;
        println!("Found {} characters, {} scenes", characters, scenes);
    }

    // 5. Prompts, characters first
    for kind in [EntityKind::Character, EntityKind::Scene] {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        let (total, done) = prompt_progress(&manager, kind);
        if done == total {
            continue;
        }

        if !config.unattended {
            let ans = inquire::Confirm::new(&format!(
                "Generate {} {} prompts?",
                total - done,
                kind.label()
            ))
            .with_default(true)
            .prompt();
            if !matches!(ans, Ok(true)) {
                continue;
            }
        }

        manager.project().set_active_tab(kind);
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        pb.set_message(kind.label());
        pb.set_position(done as u64);

        let run = manager.queue().run();
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(Duration::from_millis(250));
        let outcome = loop {
            tokio::select! {
                res = &mut run => break res,
                _ = ticker.tick() => pb.set_position(prompt_progress(&manager, kind).1 as u64),
            }
        };
        pb.set_position(prompt_progress(&manager, kind).1 as u64);
        pb.finish();
        manager.save().await?;

        match outcome {
            Ok(BatchOutcome::Completed { generated }) => {
                println!("{} prompts generated: {}", kind.label(), generated)
            }
            Ok(BatchOutcome::Stopped { generated }) => {
                println!("Stopped after {} {} prompts", generated, kind.label())
            }
            // Already logged by the queue.
            Err(e) => return Err(e),
        }
    }

    // 6. Images, on request only
    if !config.unattended && !interrupted.load(Ordering::SeqCst) {
        let ans = inquire::Confirm::new("Generate images for every item with a prompt?")
            .with_default(false)
            .prompt();
        if matches!(ans, Ok(true)) {
            generate_all_images(&manager, &interrupted).await?;
        }
    }

    manager.save().await?;
    println!("Done! Workspace: {}", config.workspace_folder);
    Ok(())
}

fn prompt_progress(manager: &StoryboardManager, kind: EntityKind) -> (usize, usize) {
    manager.project().read(|s| {
        let list = s.list(kind);
        let done = list.iter().filter(|i| !i.visual_prompt.is_empty()).count();
        (list.len(), done)
    })
}

async fn generate_all_images(manager: &StoryboardManager, interrupted: &AtomicBool) -> Result<()> {
    for kind in [EntityKind::Character, EntityKind::Scene] {
        let targets: Vec<(String, String)> = manager.project().read(|s| {
            s.list(kind)
                .iter()
                .filter(|i| !i.visual_prompt.is_empty() && i.images.is_empty())
                .map(|i| (i.id.clone(), i.name.clone()))
                .collect()
        });

        for (id, name) in targets {
            if interrupted.load(Ordering::SeqCst) {
                return Ok(());
            }
            println!("Generating images: {} {}", kind.label(), name);
            match manager.generate_images(kind, &id).await {
                Ok(generated) => {
                    for save in generated.saves {
                        if let Err(e) = save.await {
                            warn!("Asset save task failed: {}", e);
                        }
                    }
                }
                Err(e) => error!("{:#}", e),
            }
            manager.save().await?;
        }
    }
    Ok(())
}
