//! The document model produced by conversion engines and its exports.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::datamodel::convert::ImageRefMode;

/// Schema identifier carried by every document.
pub const SCHEMA_NAME: &str = "DoclingDocument";

/// Schema version carried by every document.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Provenance of the converted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DocumentOrigin {
    pub mimetype: String,
    pub binary_hash: u64,
    pub filename: String,
}

/// One content item of a document body, in reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "label", rename_all = "snake_case")]
pub enum DocItem {
    Title { text: String },
    SectionHeader { level: u8, text: String },
    Paragraph { text: String },
    Code { text: String },
    Picture { caption: Option<String> },
    PageBreak,
}

/// A converted document: typed body items plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DoclingDocument {
    pub schema_name: String,
    pub version: String,
    pub name: String,
    pub origin: DocumentOrigin,
    pub num_pages: u32,
    pub body: Vec<DocItem>,
}

impl DoclingDocument {
    /// Create an empty document with the given name and origin.
    #[must_use]
    pub fn new(name: impl Into<String>, origin: DocumentOrigin) -> Self {
        Self {
            schema_name: SCHEMA_NAME.to_string(),
            version: SCHEMA_VERSION.to_string(),
            name: name.into(),
            origin,
            num_pages: 1,
            body: Vec::new(),
        }
    }

    /// Export to Markdown.
    ///
    /// `strict_text` drops all markup (used for the text output format).
    /// The page-break placeholder, when non-empty, is inserted between pages.
    #[must_use]
    pub fn export_to_markdown(
        &self,
        image_mode: ImageRefMode,
        page_break_placeholder: Option<&str>,
        strict_text: bool,
    ) -> String {
        let mut out: Vec<String> = Vec::new();
        for item in &self.body {
            match item {
                DocItem::Title { text } => {
                    if strict_text {
                        out.push(text.clone());
                    } else {
                        out.push(format!("# {text}"));
                    }
                }
                DocItem::SectionHeader { level, text } => {
                    if strict_text {
                        out.push(text.clone());
                    } else {
                        let hashes = "#".repeat(usize::from(*level).clamp(1, 6));
                        out.push(format!("{hashes} {text}"));
                    }
                }
                DocItem::Paragraph { text } => out.push(text.clone()),
                DocItem::Code { text } => {
                    if strict_text {
                        out.push(text.clone());
                    } else {
                        out.push(format!("```\n{text}\n```"));
                    }
                }
                DocItem::Picture { caption } => {
                    if !strict_text {
                        out.push(Self::picture_markdown(image_mode, caption.as_deref()));
                    }
                }
                DocItem::PageBreak => {
                    if let Some(placeholder) = page_break_placeholder {
                        if !placeholder.is_empty() {
                            out.push(placeholder.to_string());
                        }
                    }
                }
            }
        }
        let mut text = out.join("\n\n");
        text.push('\n');
        text
    }

    fn picture_markdown(image_mode: ImageRefMode, caption: Option<&str>) -> String {
        let alt = caption.unwrap_or("image");
        match image_mode {
            ImageRefMode::Placeholder => "<!-- image -->".to_string(),
            ImageRefMode::Embedded => format!("![{alt}](data:image/png;base64,)"),
            ImageRefMode::Referenced => format!("![{alt}]({alt}.png)"),
        }
    }

    /// Export to HTML.
    #[must_use]
    pub fn export_to_html(&self, image_mode: ImageRefMode) -> String {
        let mut out = String::from("<!DOCTYPE html>\n<html>\n<body>\n");
        for item in &self.body {
            match item {
                DocItem::Title { text } => out.push_str(&format!("<h1>{text}</h1>\n")),
                DocItem::SectionHeader { level, text } => {
                    let level = usize::from(*level).clamp(1, 6) + 1;
                    out.push_str(&format!("<h{level}>{text}</h{level}>\n"));
                }
                DocItem::Paragraph { text } => out.push_str(&format!("<p>{text}</p>\n")),
                DocItem::Code { text } => out.push_str(&format!("<pre><code>{text}</code></pre>\n")),
                DocItem::Picture { caption } => {
                    let alt = caption.as_deref().unwrap_or("image");
                    match image_mode {
                        ImageRefMode::Placeholder => out.push_str("<!-- image -->\n"),
                        ImageRefMode::Embedded => out.push_str(&format!(
                            "<img alt=\"{alt}\" src=\"data:image/png;base64,\"/>\n"
                        )),
                        ImageRefMode::Referenced => {
                            out.push_str(&format!("<img alt=\"{alt}\" src=\"{alt}.png\"/>\n"));
                        }
                    }
                }
                DocItem::PageBreak => out.push_str("<hr/>\n"),
            }
        }
        out.push_str("</body>\n</html>\n");
        out
    }

    /// Export to document tags.
    #[must_use]
    pub fn export_to_doctags(&self) -> String {
        let mut out = String::from("<doctag>");
        for item in &self.body {
            match item {
                DocItem::Title { text } => out.push_str(&format!("<title>{text}</title>")),
                DocItem::SectionHeader { level, text } => {
                    out.push_str(&format!("<section_header_level_{level}>{text}</section_header_level_{level}>"));
                }
                DocItem::Paragraph { text } => out.push_str(&format!("<text>{text}</text>")),
                DocItem::Code { text } => out.push_str(&format!("<code>{text}</code>")),
                DocItem::Picture { .. } => out.push_str("<picture/>"),
                DocItem::PageBreak => out.push_str("<page_break/>"),
            }
        }
        out.push_str("</doctag>");
        out
    }
}
