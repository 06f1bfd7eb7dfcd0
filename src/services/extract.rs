//! Domain adapters: each workflow answer is mapped onto the project data
//! model through the field normalizer, with fixed defaults where a field
//! cannot be found.

use crate::core::config::WorkflowIds;
use crate::core::state::{EntityDetails, EntityKind, OverallStyle, WorkItem};
use crate::services::client::{UploadedFile, WorkflowClient, WorkflowError, WorkflowRequest};
use crate::services::normalize::{
    deep_find, embedded_json, first_present, repair_escapes, resolve, Payload, Rule, Strategy,
};
use crate::utils::text::strip_code_blocks;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_STYLE_NAME: &str = "自定义风格";
pub const DEFAULT_STYLE_CONTENT: &str = "暂无风格描述";
const UNKNOWN_NAME: &str = "未知";
const DEFAULT_ROLE: &str = "配角";

const STYLE_NAME_KEYS: &[&str] = &["风格名称", "name", "style_name"];
const PAINTING_STYLE_KEYS: &[&str] = &["视觉画风", "画风", "painting_style", "visual_style", "画面风格"];
const STYLE_CONTENT_KEYS: &[&str] = &["风格内容", "content", "style_content"];

const STYLE_NAME_RULES: &[Rule<'static>] = &[
    Rule::new(STYLE_NAME_KEYS, Strategy::DeepKey),
    Rule::new(STYLE_NAME_KEYS, Strategy::JsonLiteral),
    Rule::new(&["风格名称"], Strategy::LabeledLine),
];

const PAINTING_STYLE_RULES: &[Rule<'static>] = &[
    Rule::new(PAINTING_STYLE_KEYS, Strategy::DeepKey),
    Rule::new(&["视觉画风", "画风", "painting_style", "visual_style"], Strategy::JsonLiteral),
    Rule::new(&["视觉画风", "画风", "画面风格", "美术风格"], Strategy::LabeledLine),
];

const STYLE_CONTENT_RULES: &[Rule<'static>] = &[
    Rule::new(STYLE_CONTENT_KEYS, Strategy::DeepKey),
    Rule::new(STYLE_CONTENT_KEYS, Strategy::JsonLiteral),
    Rule::new(&["风格内容"], Strategy::LabeledBlock),
    Rule::new(
        &[],
        Strategy::WholeObject {
            container: Some("style"),
            exclude: &["风格名称", "视觉画风", "画风", "_rawString"],
        },
    ),
    Rule::new(&[], Strategy::RawText),
];

const CHARACTER_PROMPT_KEYS: &[&str] = &["role_promty", "role_prompty", "role_prompt"];
const SCENE_PROMPT_KEYS: &[&str] = &["scene_prompt"];

const CHARACTER_PROMPT_RULES: &[Rule<'static>] = &[
    Rule::new(CHARACTER_PROMPT_KEYS, Strategy::DeepKey),
    Rule::new(CHARACTER_PROMPT_KEYS, Strategy::JsonLiteral),
];

const SCENE_PROMPT_RULES: &[Rule<'static>] = &[
    Rule::new(SCENE_PROMPT_KEYS, Strategy::DeepKey),
    Rule::new(SCENE_PROMPT_KEYS, Strategy::JsonLiteral),
];

fn decode_unicode_escapes(s: String) -> String {
    if s.contains("\\u") {
        repair_escapes(s)
    } else {
        s
    }
}

// --- Style ---

pub fn parse_style(raw: &str) -> OverallStyle {
    let payload = Payload::parse(raw);

    let name = resolve(&payload, STYLE_NAME_RULES)
        .map(|v| decode_unicode_escapes(v.into_text(" ")))
        .unwrap_or_else(|| DEFAULT_STYLE_NAME.to_string());
    let painting_style = resolve(&payload, PAINTING_STYLE_RULES)
        .map(|v| decode_unicode_escapes(v.into_text("，")))
        .unwrap_or_default();
    let content = resolve(&payload, STYLE_CONTENT_RULES)
        .map(|v| v.into_text("\n"))
        .unwrap_or_else(|| DEFAULT_STYLE_CONTENT.to_string());

    OverallStyle {
        name,
        content,
        painting_style,
        ..Default::default()
    }
}

// --- Entities ---

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExtractedEntities {
    pub characters: Vec<WorkItem>,
    pub scenes: Vec<WorkItem>,
}

/// The entity lists live under `role_scenes` (an object or a JSON string,
/// possibly code-fenced); older workflow versions put them at the root.
fn locate_container(root: &Value) -> Value {
    match deep_find(root, &["role_scenes"]) {
        Some(Value::String(s)) => embedded_json(&s).unwrap_or_else(|| {
            warn!("role_scenes is not valid JSON, searching the whole payload");
            root.clone()
        }),
        Some(found @ Value::Object(_)) | Some(found @ Value::Array(_)) => found,
        _ => root.clone(),
    }
}

fn records(container: &Value, keys: &[&str]) -> Vec<Value> {
    match deep_find(container, keys) {
        Some(Value::Array(items)) => items,
        Some(Value::String(s)) => match embedded_json(&s) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn record_field(record: &Value, keys: &[&str]) -> Option<String> {
    match record {
        Value::Object(_) => first_present(record, keys),
        _ => None,
    }
}

fn record_name(record: &Value, keys: &[&str]) -> String {
    match record {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => record_field(record, keys).unwrap_or_else(|| UNKNOWN_NAME.to_string()),
    }
}

fn character_from_record(record: &Value) -> WorkItem {
    WorkItem::character(
        &record_name(record, &["name", "姓名"]),
        &record_field(record, &["position", "身份", "role"]).unwrap_or_else(|| DEFAULT_ROLE.to_string()),
        &record_field(record, &["background", "背景", "setting"]).unwrap_or_default(),
        &record_field(record, &["features", "特征", "traits"]).unwrap_or_default(),
    )
}

fn scene_from_record(record: &Value) -> WorkItem {
    WorkItem::scene(
        &record_name(record, &["name", "名称"]),
        &record_field(record, &["location", "地点"]).unwrap_or_default(),
        &record_field(record, &["features", "特征", "traits"]).unwrap_or_default(),
    )
}

/// Keeps the first item for every distinct name (exact comparison).
pub fn dedup_by_name(items: Vec<WorkItem>) -> Vec<WorkItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.name.clone()))
        .collect()
}

pub fn parse_entities(raw: &str) -> ExtractedEntities {
    let payload = Payload::parse(raw);
    let Some(root) = payload.json() else {
        warn!("Entity payload is not JSON; nothing extracted");
        return ExtractedEntities::default();
    };

    let container = locate_container(root);
    let characters = records(&container, &["角色信息", "characters"])
        .iter()
        .map(character_from_record)
        .collect();
    let scenes = records(&container, &["场景信息", "scenes"])
        .iter()
        .map(scene_from_record)
        .collect();

    ExtractedEntities {
        characters: dedup_by_name(characters),
        scenes: dedup_by_name(scenes),
    }
}

// --- Prompts ---

/// Pulls the prompt out of a prompt workflow answer. A blank match falls
/// back to the raw answer; `None` means there is nothing to store.
pub fn parse_prompt(kind: EntityKind, raw: &str) -> Option<String> {
    let rules = match kind {
        EntityKind::Character => CHARACTER_PROMPT_RULES,
        EntityKind::Scene => SCENE_PROMPT_RULES,
    };
    resolve(&Payload::parse(raw), rules)
        .map(|value| strip_code_blocks(&value.into_text("\n")))
        .filter(|prompt| !prompt.trim().is_empty())
        .or_else(|| Some(strip_code_blocks(raw)))
        .filter(|prompt| !prompt.trim().is_empty())
}

// --- Images ---

fn looks_like_image_ref(s: &str) -> bool {
    let s = s.trim();
    if s.starts_with("data:image/") {
        return true;
    }
    s.starts_with("http") && url::Url::parse(s).is_ok()
}

fn url_entries(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(_) => first_present(item, &["url", "image_url", "image"]),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn urls_from_value(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => {
            if let Some(inner) = embedded_json(s) {
                return urls_from_value(&inner);
            }
            looks_like_image_ref(s).then(|| vec![s.trim().to_string()])
        }
        Value::Array(items) => Some(url_entries(items)).filter(|urls| !urls.is_empty()),
        Value::Object(map) => {
            if let Some(urls) = map.get("output").and_then(urls_from_value) {
                return Some(urls);
            }
            for key in ["image_url", "url", "image"] {
                match map.get(key) {
                    Some(Value::String(s)) if !s.trim().is_empty() => return Some(vec![s.trim().to_string()]),
                    Some(other @ Value::Array(_)) => {
                        if let Some(urls) = urls_from_value(other) {
                            return Some(urls);
                        }
                    }
                    _ => {}
                }
            }
            match map.get("data") {
                Some(Value::Array(items)) => Some(url_entries(items)).filter(|urls| !urls.is_empty()),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Image URLs from any of the known response shapes: an `output` array, an
/// `output` holding a JSON-encoded array or nested `output`, a bare URL
/// field, a `data` list, or a plain-text URL with no JSON around it.
pub fn extract_image_urls(raw: &str) -> Option<Vec<String>> {
    let trimmed = raw.trim();
    match Payload::parse(trimmed).json() {
        Some(json) => urls_from_value(json),
        None => looks_like_image_ref(trimmed).then(|| vec![trimmed.to_string()]),
    }
}

// --- Workflow parameters ---

pub fn style_parameters(script: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("script".to_string(), json!(script));
    params
}

pub fn entity_parameters(style: &OverallStyle, script: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("style".to_string(), json!(style.summary()));
    params.insert("script".to_string(), json!(script));
    params
}

pub fn prompt_parameters(item: &WorkItem, style: &OverallStyle, script: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("painting_style".to_string(), json!(style.painting_style));
    params.insert("style".to_string(), json!(style.summary()));
    params.insert("script".to_string(), json!(script));
    if let Some(file_id) = &style.reference_image_id {
        params.insert(
            "reference_image".to_string(),
            json!(json!({ "file_id": file_id }).to_string()),
        );
    }

    match &item.details {
        EntityDetails::Character { role, setting } => {
            params.insert(
                "role_info".to_string(),
                json!(format!(
                    "名称: {}\n定位: {}\n背景设定: {}\n特征: {}",
                    item.name, role, setting, item.traits
                )),
            );
        }
        EntityDetails::Scene { location } => {
            params.insert(
                "scene_info".to_string(),
                json!(format!("名称: {}\n地点: {}\n特征: {}", item.name, location, item.traits)),
            );
        }
    }
    params
}

/// Output size per entity kind; 3.0 models top out around 2k.
pub fn image_dimensions(kind: EntityKind, model: &str) -> (u32, u32) {
    match kind {
        EntityKind::Character => (2048, 2048),
        EntityKind::Scene if model.contains("3.0") => (2048, 1152),
        EntityKind::Scene => (2560, 1440),
    }
}

pub fn image_parameters(kind: EntityKind, prompt: &str, model: &str) -> Map<String, Value> {
    let (width, height) = image_dimensions(kind, model);
    let mut params = Map::new();
    params.insert("prompt".to_string(), json!(prompt));
    params.insert("model".to_string(), json!(model));
    params.insert("width".to_string(), json!(width));
    params.insert("height".to_string(), json!(height));
    params
}

// --- Adapters ---

/// Produces a visual prompt for one work item. The bulk queue depends on
/// this seam only.
#[async_trait]
pub trait PromptGenerator: Send + Sync {
    async fn generate_prompt(&self, item: &WorkItem, style: &OverallStyle, script: &str) -> Result<String>;
}

pub struct WorkflowExtractor {
    client: Arc<dyn WorkflowClient>,
    workflows: WorkflowIds,
    credential: String,
}

impl WorkflowExtractor {
    pub fn new(client: Arc<dyn WorkflowClient>, workflows: WorkflowIds, credential: &str) -> Self {
        Self {
            client,
            workflows,
            credential: credential.to_string(),
        }
    }

    async fn run(&self, workflow_id: &str, parameters: Map<String, Value>) -> Result<String, WorkflowError> {
        self.client
            .invoke(WorkflowRequest::new(workflow_id, parameters, &self.credential))
            .await
    }

    pub async fn analyze_style(&self, script: &str) -> Result<OverallStyle> {
        let raw = self
            .run(&self.workflows.style, style_parameters(script))
            .await
            .context("风格分析失败")?;
        let style = parse_style(&raw);
        info!("Style analyzed: {}", style.name);
        Ok(style)
    }

    pub async fn extract_entities(&self, script: &str, style: &OverallStyle) -> Result<ExtractedEntities> {
        let raw = self
            .run(&self.workflows.entities, entity_parameters(style, script))
            .await
            .context("角色与场景提取失败")?;
        let entities = parse_entities(&raw);
        info!(
            "Extracted {} characters and {} scenes",
            entities.characters.len(),
            entities.scenes.len()
        );
        Ok(entities)
    }

    pub async fn generate_images(&self, item: &WorkItem, model: &str) -> Result<Vec<String>> {
        let kind = item.kind();
        let workflow_id = match kind {
            EntityKind::Character => &self.workflows.character_image,
            EntityKind::Scene => &self.workflows.scene_image,
        };
        let raw = self
            .run(workflow_id, image_parameters(kind, &item.visual_prompt, model))
            .await
            .with_context(|| format!("{}图像生成失败: {}", kind.label(), item.name))?;

        extract_image_urls(&raw)
            .ok_or_else(|| WorkflowError::ImageUrlMissing(raw))
            .with_context(|| format!("{}图像生成失败: {}", kind.label(), item.name))
    }

    pub async fn upload_reference(&self, data: Vec<u8>, file_name: &str) -> Result<UploadedFile> {
        let uploaded = self
            .client
            .upload_file(data, file_name, &self.credential)
            .await
            .context("参考图上传失败")?;
        Ok(uploaded)
    }
}

#[async_trait]
impl PromptGenerator for WorkflowExtractor {
    async fn generate_prompt(&self, item: &WorkItem, style: &OverallStyle, script: &str) -> Result<String> {
        let kind = item.kind();
        let workflow_id = match kind {
            EntityKind::Character => &self.workflows.character_prompt,
            EntityKind::Scene => &self.workflows.scene_prompt,
        };
        let raw = self
            .run(workflow_id, prompt_parameters(item, style, script))
            .await
            .with_context(|| format!("{}提示词生成失败: {}", kind.label(), item.name))?;
        parse_prompt(kind, &raw)
            .ok_or_else(|| WorkflowError::EmptyPrompt(raw))
            .with_context(|| format!("{}提示词生成失败: {}", kind.label(), item.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_style_from_nested_json_string() {
        let raw = r#"{"output": "{\"风格名称\": \"赛博朋克\", \"视觉画风\": \"霓虹厚涂\", \"风格内容\": [\"高对比\", \"雨夜\"]}"}"#;
        let style = parse_style(raw);
        assert_eq!(style.name, "赛博朋克");
        assert_eq!(style.painting_style, "霓虹厚涂");
        assert_eq!(style.content, "高对比\n雨夜");
    }

    #[test]
    fn test_style_from_markdown() {
        let raw = "## 分析\n**风格名称**: 赛博朋克\n**视觉画风**：霓虹\n**风格内容**: 冷色调\n雨夜街景\n- 结束";
        let style = parse_style(raw);
        assert_eq!(style.name, "赛博朋克");
        assert_eq!(style.painting_style, "霓虹");
        assert_eq!(style.content, "冷色调\n雨夜街景");
    }

    #[test]
    fn test_style_defaults_and_object_dump() {
        let raw = r#"{"风格名称": "", "色调": "暖", "节奏": "舒缓"}"#;
        let style = parse_style(raw);
        assert_eq!(style.name, DEFAULT_STYLE_NAME);
        assert_eq!(style.painting_style, "");
        assert!(style.content.contains("色调"));
        assert!(!style.content.contains("风格名称"));
    }

    #[test]
    fn test_style_from_truncated_json() {
        let raw = r#"broken {"风格名称": "赛博", "#;
        let style = parse_style(raw);
        assert_eq!(style.name, "赛博");
    }

    #[test]
    fn test_style_plain_text_content_fallback() {
        let style = parse_style("这是一段没有结构的描述");
        assert_eq!(style.name, DEFAULT_STYLE_NAME);
        assert_eq!(style.content, "这是一段没有结构的描述");
    }

    #[test]
    fn test_entities_from_fenced_role_scenes() {
        let inner = r#"```json
{"角色信息": [
  {"name": "林黛玉", "position": "主角", "background": "贾府", "features": "体弱"},
  {"姓名": "贾宝玉"},
  {"name": "林黛玉", "position": "重复"}
],
"场景信息": [{"名称": "大观园", "地点": "贾府", "特征": "园林"}]}
```"#;
        let raw = json!({ "role_scenes": inner }).to_string();

        let entities = parse_entities(&raw);
        assert_eq!(entities.characters.len(), 2);
        assert_eq!(entities.characters[0].name, "林黛玉");
        assert_eq!(entities.characters[0].role_or_location(), "主角");
        assert_eq!(entities.characters[0].description(), "贾府");
        assert_eq!(entities.characters[1].name, "贾宝玉");
        assert_eq!(entities.characters[1].role_or_location(), DEFAULT_ROLE);

        assert_eq!(entities.scenes.len(), 1);
        assert_eq!(entities.scenes[0].role_or_location(), "贾府");
        assert_eq!(entities.scenes[0].traits, "园林");
    }

    #[test]
    fn test_entities_at_root_and_garbage() {
        let raw = r#"{"characters": ["甲", {"name": "乙"}], "scenes": []}"#;
        let entities = parse_entities(raw);
        let names: Vec<&str> = entities.characters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["甲", "乙"]);
        assert!(entities.scenes.is_empty());

        assert_eq!(parse_entities("not json"), ExtractedEntities::default());
    }

    #[test]
    fn test_dedup_first_occurrence_wins() {
        let items = vec![
            WorkItem::scene("码头", "东", "first"),
            WorkItem::scene("码头", "西", "second"),
            WorkItem::scene("码头 ", "南", "different name"),
        ];
        let unique = dedup_by_name(items);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].traits, "first");
    }

    fn prompt(kind: EntityKind, raw: &str) -> String {
        parse_prompt(kind, raw).unwrap_or_default()
    }

    #[test]
    fn test_character_prompt_variants() {
        assert_eq!(
            prompt(EntityKind::Character, r#"{"role_promty": "```json\n{\"a\": 1}\n```"}"#),
            "{\"a\": 1}"
        );
        assert_eq!(prompt(EntityKind::Character, r#"{"role_prompt": "少女，白裙"}"#), "少女，白裙");
        assert!(prompt(EntityKind::Character, r#"{"role_prompty": {"pose": "站立"}}"#).contains("站立"));
        assert_eq!(prompt(EntityKind::Character, "```\nraw prompt\n```"), "raw prompt");
    }

    #[test]
    fn test_scene_prompt_fallback_to_raw() {
        assert_eq!(prompt(EntityKind::Scene, r#"{"scene_prompt": "雨夜街道"}"#), "雨夜街道");
        assert_eq!(prompt(EntityKind::Scene, "清晨的码头"), "清晨的码头");
    }

    #[test]
    fn test_blank_prompt_falls_back_then_fails() {
        let fenced_empty = r#"{"role_prompt": "```json\n```"}"#;
        assert_eq!(parse_prompt(EntityKind::Character, fenced_empty), Some(fenced_empty.to_string()));
        assert_eq!(parse_prompt(EntityKind::Scene, r#"{"scene_prompt": "   "}"#), Some(r#"{"scene_prompt": "   "}"#.to_string()));
        assert_eq!(parse_prompt(EntityKind::Character, "```json\n```"), None);
        assert_eq!(parse_prompt(EntityKind::Scene, "  \n "), None);
    }

    #[test]
    fn test_image_url_shapes() {
        let expected = Some(vec!["https://img.example.com/a.png".to_string()]);

        assert_eq!(extract_image_urls(r#"{"output": ["https://img.example.com/a.png"]}"#), expected);
        assert_eq!(extract_image_urls(r#"{"output": "[\"https://img.example.com/a.png\"]"}"#), expected);
        assert_eq!(
            extract_image_urls(r#"{"output": "{\"output\": [\"https://img.example.com/a.png\"]}"}"#),
            expected
        );
        assert_eq!(extract_image_urls(r#"{"output": "https://img.example.com/a.png"}"#), expected);
        assert_eq!(extract_image_urls(r#"{"image_url": "https://img.example.com/a.png"}"#), expected);
        assert_eq!(
            extract_image_urls(r#"{"data": [{"url": "https://img.example.com/a.png"}]}"#),
            expected
        );
        assert_eq!(extract_image_urls("  https://img.example.com/a.png\n"), expected);
    }

    #[test]
    fn test_image_url_missing() {
        assert_eq!(extract_image_urls(r#"{"msg": "queued"}"#), None);
        assert_eq!(extract_image_urls("generation failed"), None);
        assert_eq!(extract_image_urls(r#"{"output": []}"#), None);
    }

    #[test]
    fn test_prompt_parameters() {
        let item = WorkItem::character("林黛玉", "主角", "贾府", "体弱");
        let style = OverallStyle {
            name: "国风".to_string(),
            content: "水墨".to_string(),
            painting_style: "工笔".to_string(),
            reference_image_id: Some("file-1".to_string()),
            reference_image_name: None,
        };
        let params = prompt_parameters(&item, &style, "剧本");
        assert_eq!(params["style"], json!("国风\n水墨"));
        assert_eq!(params["painting_style"], json!("工笔"));
        assert_eq!(params["reference_image"], json!(r#"{"file_id":"file-1"}"#));
        assert_eq!(params["role_info"], json!("名称: 林黛玉\n定位: 主角\n背景设定: 贾府\n特征: 体弱"));

        let scene = WorkItem::scene("大观园", "贾府", "园林");
        let params = prompt_parameters(&scene, &OverallStyle::default(), "剧本");
        assert!(params.get("reference_image").is_none());
        assert_eq!(params["scene_info"], json!("名称: 大观园\n地点: 贾府\n特征: 园林"));
    }

    #[test]
    fn test_image_dimensions() {
        assert_eq!(image_dimensions(EntityKind::Character, "Doubao-Seedream-3.0"), (2048, 2048));
        assert_eq!(image_dimensions(EntityKind::Scene, "Doubao-Seedream-3.0"), (2048, 1152));
        assert_eq!(image_dimensions(EntityKind::Scene, "Doubao-Seedream-4.0"), (2560, 1440));
    }

    // Mock client recording requests
    struct RecordingClient {
        response: String,
        requests: Mutex<Vec<WorkflowRequest>>,
    }

    #[async_trait]
    impl WorkflowClient for RecordingClient {
        async fn invoke(&self, request: WorkflowRequest) -> Result<String, WorkflowError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }

        async fn upload_file(&self, _: Vec<u8>, file_name: &str, _: &str) -> Result<UploadedFile, WorkflowError> {
            Ok(UploadedFile { id: "f".to_string(), file_name: file_name.to_string() })
        }
    }

    #[tokio::test]
    async fn test_generate_prompt_uses_kind_workflow() -> Result<()> {
        let client = Arc::new(RecordingClient {
            response: r#"{"scene_prompt": "黄昏"}"#.to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let workflows = WorkflowIds::default();
        let extractor = WorkflowExtractor::new(client.clone(), workflows.clone(), "key");

        let scene = WorkItem::scene("码头", "东", "");
        let prompt = extractor.generate_prompt(&scene, &OverallStyle::default(), "剧本").await?;
        assert_eq!(prompt, "黄昏");

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].workflow_id, workflows.scene_prompt);
        assert_eq!(requests[0].credential, "key");
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_prompt_answer_is_error() {
        let client = Arc::new(RecordingClient {
            response: "```json\n```".to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let extractor = WorkflowExtractor::new(client, WorkflowIds::default(), "key");
        let item = WorkItem::character("甲", "主角", "", "");

        let err = extractor
            .generate_prompt(&item, &OverallStyle::default(), "剧本")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::EmptyPrompt(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_images_without_urls_is_error() {
        let client = Arc::new(RecordingClient {
            response: r#"{"status": "pending"}"#.to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let extractor = WorkflowExtractor::new(client, WorkflowIds::default(), "key");
        let mut item = WorkItem::character("甲", "主角", "", "");
        item.visual_prompt = "prompt".to_string();

        let err = extractor.generate_images(&item, "Doubao-Seedream-4.0").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkflowError>(),
            Some(WorkflowError::ImageUrlMissing(_))
        ));
    }
}
