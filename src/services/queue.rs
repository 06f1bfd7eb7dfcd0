//! Bulk prompt generation.
//!
//! One prompt call at a time. Every iteration re-reads which list is
//! active and what it contains, so edits, deletions and tab switches made
//! while a batch runs take effect on the next pick.

use crate::core::project::SharedProject;
use crate::services::extract::PromptGenerator;
use crate::services::workspace::Persistence;
use anyhow::{bail, Result};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// No eligible item left in the active list.
    Completed { generated: usize },
    /// Stopped by the user; the item in flight at that moment was still
    /// written back.
    Stopped { generated: usize },
}

/// Cheap handle for stopping a batch from elsewhere (Ctrl-C, UI).
#[derive(Clone)]
pub struct QueueHandle {
    running: Arc<AtomicBool>,
}

impl QueueHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct BulkPromptQueue {
    project: SharedProject,
    generator: Arc<dyn PromptGenerator>,
    persistence: Arc<dyn Persistence>,
    running: Arc<AtomicBool>,
    // Set while a `run` loop is alive, including after a stop request
    // until the in-flight call resolves.
    active: AtomicBool,
}

impl BulkPromptQueue {
    pub fn new(
        project: SharedProject,
        generator: Arc<dyn PromptGenerator>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            project,
            generator,
            persistence,
            running: Arc::new(AtomicBool::new(false)),
            active: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            running: self.running.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.handle().stop();
    }

    /// Runs until the active list has no item awaiting a prompt, the user
    /// stops the batch, or one call fails. A failure ends the batch; the
    /// next run resumes at the first item still without a prompt.
    pub async fn run(&self) -> Result<BatchOutcome> {
        if self.active.swap(true, Ordering::SeqCst) {
            bail!("批量生成已在运行中");
        }
        self.running.store(true, Ordering::SeqCst);

        let outcome = self.run_loop().await;

        self.running.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_loop(&self) -> Result<BatchOutcome> {
        let mut generated = 0;

        loop {
            if !self.is_running() {
                info!("Bulk generation stopped after {} prompts", generated);
                return Ok(BatchOutcome::Stopped { generated });
            }

            let kind = self.project.active_tab();
            let Some(item) = self.project.claim_next_pending(kind) else {
                info!("Bulk generation complete: {} prompts", generated);
                return Ok(BatchOutcome::Completed { generated });
            };
            info!("Generating {} prompt: {}", kind.label(), item.name);

            let (style, script) = self
                .project
                .read(|state| (state.style.clone(), state.script.clone()));

            let result = self
                .generator
                .generate_prompt(&item, &style, &script)
                .await
                .and_then(|prompt| {
                    if prompt.trim().is_empty() {
                        bail!("{}提示词为空: {}", kind.label(), item.name);
                    }
                    Ok(prompt)
                });

            match result {
                Ok(prompt) => match self.project.finish_prompt(kind, &item.id, Some(prompt)) {
                    Some(updated) => {
                        generated += 1;
                        if let Err(e) = self
                            .persistence
                            .save_profile(&updated, &updated.profile_text())
                            .await
                        {
                            warn!("Failed to save profile for {}: {:#}", updated.name, e);
                        }
                    }
                    None => debug!("{} was deleted during generation, result dropped", item.id),
                },
                Err(e) => {
                    self.project.finish_prompt(kind, &item.id, None);
                    error!("Bulk generation halted at {}: {:#}", item.name, e);
                    return Err(e);
                }
            }
        }
    }
}
