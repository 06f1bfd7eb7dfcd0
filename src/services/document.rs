use epub::doc::EpubDoc;
use log::debug;
use std::io::Cursor;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("不支持的文件格式: {0}")]
    UnsupportedFormat(String),

    #[error("未能从文件中提取到文本")]
    EmptyExtraction,

    #[error("文本编码错误: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("EPUB 解析失败: {0}")]
    Epub(String),
}

/// Turns an uploaded script file into plain text.
pub trait DocumentExtractor: Send + Sync {
    fn extract_text(&self, file_name: &str, bytes: &[u8]) -> Result<String, DocumentError>;
}

const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];
const EPUB_EXTENSION: &str = "epub";
const HTML_WIDTH: usize = 500;

fn extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub fn is_supported(file_name: &str) -> bool {
    let ext = extension(file_name);
    TEXT_EXTENSIONS.contains(&ext.as_str()) || ext == EPUB_EXTENSION
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptDocumentExtractor;

impl ScriptDocumentExtractor {
    fn epub_text(bytes: &[u8]) -> Result<String, DocumentError> {
        let mut doc = EpubDoc::from_reader(Cursor::new(bytes.to_vec()))
            .map_err(|e| DocumentError::Epub(e.to_string()))?;

        let mut chapters = Vec::new();
        loop {
            if let Some((content, mime)) = doc.get_current_str() {
                match mime.as_str() {
                    "application/xhtml+xml" | "text/html" => {
                        let text = html2text::from_read(content.as_bytes(), HTML_WIDTH)
                            .map_err(|e| DocumentError::Epub(e.to_string()))?;
                        if !text.trim().is_empty() {
                            chapters.push(text.trim().to_string());
                        }
                    }
                    other => debug!("Skipping non-HTML chapter ({})", other),
                }
            }
            if !doc.go_next() {
                break;
            }
        }
        Ok(chapters.join("\n\n"))
    }
}

impl DocumentExtractor for ScriptDocumentExtractor {
    fn extract_text(&self, file_name: &str, bytes: &[u8]) -> Result<String, DocumentError> {
        let ext = extension(file_name);
        let text = if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            let text = String::from_utf8(bytes.to_vec())?;
            text.trim_start_matches('\u{feff}').to_string()
        } else if ext == EPUB_EXTENSION {
            Self::epub_text(bytes)?
        } else {
            return Err(DocumentError::UnsupportedFormat(file_name.to_string()));
        };

        if text.trim().is_empty() {
            return Err(DocumentError::EmptyExtraction);
        }
        Ok(text)
    }
}
