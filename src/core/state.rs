use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

// Process-wide sequence; ids minted in the same millisecond stay distinct.
static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Character,
    Scene,
}

impl EntityKind {
    /// Label used for folder names and user-facing messages.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Character => "角色",
            EntityKind::Scene => "场景",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            EntityKind::Character => "char",
            EntityKind::Scene => "scene",
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct OverallStyle {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub painting_style: String,
    #[serde(default)]
    pub reference_image_id: Option<String>,
    #[serde(default)]
    pub reference_image_name: Option<String>,
}

impl OverallStyle {
    pub fn is_configured(&self) -> bool {
        !self.name.trim().is_empty()
    }

    /// `name\ncontent`, the shape every downstream workflow expects for `style`.
    pub fn summary(&self) -> String {
        format!("{}\n{}", self.name, self.content)
    }
}

/// Transient per-item generation markers. Never persisted: a reloaded
/// project must not come back with items stuck in flight.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenerationFlags {
    pub prompt_in_flight: bool,
    pub image_in_flight: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityDetails {
    Character {
        #[serde(default)]
        role: String,
        #[serde(default)]
        setting: String,
    },
    Scene {
        #[serde(default)]
        location: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WorkItem {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub details: EntityDetails,
    #[serde(default)]
    pub traits: String,
    #[serde(default)]
    pub visual_prompt: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(skip)]
    pub flags: GenerationFlags,
}

impl WorkItem {
    pub fn character(name: &str, role: &str, setting: &str, traits: &str) -> Self {
        Self {
            id: new_entity_id(EntityKind::Character),
            name: name.to_string(),
            details: EntityDetails::Character {
                role: role.to_string(),
                setting: setting.to_string(),
            },
            traits: traits.to_string(),
            visual_prompt: String::new(),
            images: Vec::new(),
            flags: GenerationFlags::default(),
        }
    }

    pub fn scene(name: &str, location: &str, traits: &str) -> Self {
        Self {
            id: new_entity_id(EntityKind::Scene),
            name: name.to_string(),
            details: EntityDetails::Scene {
                location: location.to_string(),
            },
            traits: traits.to_string(),
            visual_prompt: String::new(),
            images: Vec::new(),
            flags: GenerationFlags::default(),
        }
    }

    /// Blank item created by the "add" action in the editor.
    pub fn placeholder(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Character => Self::character("新角色", "待定", "", ""),
            EntityKind::Scene => Self::scene("新场景", "待定", ""),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self.details {
            EntityDetails::Character { .. } => EntityKind::Character,
            EntityDetails::Scene { .. } => EntityKind::Scene,
        }
    }

    pub fn role_or_location(&self) -> &str {
        match &self.details {
            EntityDetails::Character { role, .. } => role,
            EntityDetails::Scene { location } => location,
        }
    }

    pub fn description(&self) -> &str {
        match &self.details {
            EntityDetails::Character { setting, .. } => setting,
            EntityDetails::Scene { .. } => "",
        }
    }

    /// Eligible for a bulk prompt run.
    pub fn awaits_prompt(&self) -> bool {
        self.visual_prompt.is_empty() && !self.flags.prompt_in_flight
    }

    /// Human-readable profile written next to the item's images.
    pub fn profile_text(&self) -> String {
        let mut text = format!("【名称】\n{}\n\n", self.name);
        match &self.details {
            EntityDetails::Character { role, setting } => {
                text.push_str(&format!("【定位】\n{}\n\n【设定】\n{}\n\n", role, setting));
            }
            EntityDetails::Scene { location } => {
                text.push_str(&format!("【地点】\n{}\n\n", location));
            }
        }
        text.push_str(&format!("【特征】\n{}\n\n【提示词】\n{}", self.traits, self.visual_prompt));
        text
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GenerationHistoryItem {
    pub id: String,
    pub timestamp: u64,
    pub kind: EntityKind,
    pub name: String,
    pub role_or_location: String,
    pub description: String,
    pub traits: String,
    pub prompt: String,
    pub images: Vec<String>,
}

impl GenerationHistoryItem {
    pub fn record(item: &WorkItem, images: &[String]) -> Self {
        let timestamp = now_millis();
        Self {
            id: unique_id("hist", timestamp),
            timestamp,
            kind: item.kind(),
            name: item.name.clone(),
            role_or_location: item.role_or_location().to_string(),
            description: item.description().to_string(),
            traits: item.traits.clone(),
            prompt: item.visual_prompt.clone(),
            images: images.to_vec(),
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct ProjectState {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub style: OverallStyle,
    #[serde(default)]
    pub characters: Vec<WorkItem>,
    #[serde(default)]
    pub scenes: Vec<WorkItem>,
    #[serde(default)]
    pub history: Vec<GenerationHistoryItem>,
}

impl ProjectState {
    pub fn list(&self, kind: EntityKind) -> &Vec<WorkItem> {
        match kind {
            EntityKind::Character => &self.characters,
            EntityKind::Scene => &self.scenes,
        }
    }

    pub fn list_mut(&mut self, kind: EntityKind) -> &mut Vec<WorkItem> {
        match kind {
            EntityKind::Character => &mut self.characters,
            EntityKind::Scene => &mut self.scenes,
        }
    }

    pub fn find(&self, kind: EntityKind, id: &str) -> Option<&WorkItem> {
        self.list(kind).iter().find(|item| item.id == id)
    }

    pub fn find_mut(&mut self, kind: EntityKind, id: &str) -> Option<&mut WorkItem> {
        self.list_mut(kind).iter_mut().find(|item| item.id == id)
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// `<prefix>-<millis>-<sequence>-<random>`. The random tail keeps ids from
/// separate runs apart when a saved project is reopened.
fn unique_id(prefix: &str, timestamp: u64) -> String {
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}-{:04x}", prefix, timestamp, seq, rand::random::<u16>())
}

fn new_entity_id(kind: EntityKind) -> String {
    unique_id(kind.id_prefix(), now_millis())
}
