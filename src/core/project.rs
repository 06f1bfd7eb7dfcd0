//! The open project as live shared state.
//!
//! Every accessor takes the lock for a single read or mutation and never
//! holds it across an `.await`. The bulk queue and editor actions therefore
//! always see the latest lists, never a snapshot taken earlier.

use crate::core::state::{EntityKind, GenerationHistoryItem, ProjectState, WorkItem};
use std::sync::{Arc, Mutex, MutexGuard};

struct Session {
    state: ProjectState,
    active_tab: EntityKind,
}

/// Live, shared view of the open project. Clones share the same session.
#[derive(Clone)]
pub struct SharedProject {
    inner: Arc<Mutex<Session>>,
}

impl SharedProject {
    pub fn new(state: ProjectState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Session {
                state,
                active_tab: EntityKind::Character,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> ProjectState {
        self.lock().state.clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&ProjectState) -> R) -> R {
        f(&self.lock().state)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ProjectState) -> R) -> R {
        f(&mut self.lock().state)
    }

    pub fn active_tab(&self) -> EntityKind {
        self.lock().active_tab
    }

    pub fn set_active_tab(&self, kind: EntityKind) {
        self.lock().active_tab = kind;
    }

    pub fn item(&self, kind: EntityKind, id: &str) -> Option<WorkItem> {
        self.read(|state| state.find(kind, id).cloned())
    }

    /// Applies `f` to the item with `id`. Returns `false` when the item no
    /// longer exists.
    pub fn update_item(&self, kind: EntityKind, id: &str, f: impl FnOnce(&mut WorkItem)) -> bool {
        self.update(|state| match state.find_mut(kind, id) {
            Some(item) => {
                f(item);
                true
            }
            None => false,
        })
    }

    /// Picks the first item of `kind` that has no prompt and is not already
    /// being generated, and marks it in flight under the same lock.
    pub fn claim_next_pending(&self, kind: EntityKind) -> Option<WorkItem> {
        self.update(|state| {
            let item = state.list_mut(kind).iter_mut().find(|item| item.awaits_prompt())?;
            item.flags.prompt_in_flight = true;
            Some(item.clone())
        })
    }

    /// Releases the prompt flag and stores `prompt` if one was produced.
    /// Returns the updated item, or `None` if it was deleted meanwhile.
    pub fn finish_prompt(&self, kind: EntityKind, id: &str, prompt: Option<String>) -> Option<WorkItem> {
        self.update(|state| {
            let item = state.find_mut(kind, id)?;
            item.flags.prompt_in_flight = false;
            if let Some(prompt) = prompt {
                item.visual_prompt = prompt;
            }
            Some(item.clone())
        })
    }

    pub fn set_image_in_flight(&self, kind: EntityKind, id: &str, in_flight: bool) -> bool {
        self.update_item(kind, id, |item| item.flags.image_in_flight = in_flight)
    }

    pub fn add_item(&self, kind: EntityKind) -> String {
        let item = WorkItem::placeholder(kind);
        let id = item.id.clone();
        self.update(|state| state.list_mut(kind).push(item));
        id
    }

    pub fn remove_item(&self, kind: EntityKind, id: &str) -> bool {
        self.update(|state| {
            let list = state.list_mut(kind);
            let before = list.len();
            list.retain(|item| item.id != id);
            list.len() != before
        })
    }

    /// Drag-reorder: moves the item at `from` to position `to`.
    pub fn move_item(&self, kind: EntityKind, from: usize, to: usize) -> bool {
        self.update(|state| {
            let list = state.list_mut(kind);
            if from >= list.len() || to >= list.len() {
                return false;
            }
            let item = list.remove(from);
            list.insert(to, item);
            true
        })
    }

    pub fn push_history(&self, entry: GenerationHistoryItem) {
        self.update(|state| state.history.push(entry));
    }

    pub fn remove_history(&self, id: &str) -> bool {
        self.update(|state| {
            let before = state.history.len();
            state.history.retain(|h| h.id != id);
            state.history.len() != before
        })
    }
}
