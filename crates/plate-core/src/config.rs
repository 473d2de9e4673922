use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::document::{ElementKind, ListType, TextFormat};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub max_undo: usize,
    pub export_debounce_ms: u64,
    pub default_font_size: String,
    pub font_sizes: FontSizes,
    /// Codepoints removed from exported HTML.
    pub strip_codepoints: Vec<CodepointRange>,
    pub theme: HtmlTheme,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_undo: 200,
            export_debounce_ms: 1000,
            default_font_size: "14px".to_string(),
            font_sizes: FontSizes::default(),
            strip_codepoints: Vec::new(),
            theme: HtmlTheme::default(),
        }
    }
}

impl EditorConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("failed to parse editor config")?;
        Ok(config.with_defaults())
    }

    /// Fills zeroed or blank fields back in.
    pub fn with_defaults(mut self) -> Self {
        if self.max_undo == 0 {
            self.max_undo = 200;
        }
        if self.default_font_size.trim().is_empty() {
            self.default_font_size = self.font_sizes.standard.clone();
        }
        self
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.export_debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FontSizes {
    pub standard: String,
    pub large: String,
    pub extra_large: String,
}

impl Default for FontSizes {
    fn default() -> Self {
        Self {
            standard: "14px".to_string(),
            large: "18px".to_string(),
            extra_large: "24px".to_string(),
        }
    }
}

impl FontSizes {
    /// `(label, value)` pairs in dropdown order.
    pub fn options(&self) -> [(&'static str, &str); 3] {
        [
            ("standard", self.standard.as_str()),
            ("large", self.large.as_str()),
            ("extraLarge", self.extra_large.as_str()),
        ]
    }

    /// Resolves a dropdown label to its size; raw sizes pass through.
    pub fn resolve<'a>(&'a self, label_or_value: &'a str) -> &'a str {
        self.options()
            .into_iter()
            .find(|(label, _)| label.eq_ignore_ascii_case(label_or_value))
            .map(|(_, value)| value)
            .unwrap_or(label_or_value)
    }
}

/// Inclusive range of Unicode scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodepointRange {
    pub start: u32,
    pub end: u32,
}

impl CodepointRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn single(codepoint: u32) -> Self {
        Self::new(codepoint, codepoint)
    }

    pub fn contains(&self, ch: char) -> bool {
        (self.start..=self.end).contains(&u32::from(ch))
    }
}

/// CSS class names written on exported elements and runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HtmlTheme {
    pub paragraph: String,
    pub headings: Vec<String>,
    pub list_ul: String,
    pub list_ol: String,
    pub list_item: String,
    pub nested_list_item: String,
    pub text_bold: String,
    pub text_italic: String,
    pub text_underline: String,
    pub text_strikethrough: String,
    pub text_underline_strikethrough: String,
}

impl Default for HtmlTheme {
    fn default() -> Self {
        Self {
            paragraph: "editor-paragraph".to_string(),
            headings: (1..=ElementKind::MAX_HEADING_LEVEL)
                .map(|level| format!("editor-heading-h{level}"))
                .collect(),
            list_ul: "editor-list-ul".to_string(),
            list_ol: "editor-list-ol".to_string(),
            list_item: "editor-listitem".to_string(),
            nested_list_item: "editor-nested-listitem".to_string(),
            text_bold: "editor-text-bold".to_string(),
            text_italic: "editor-text-italic".to_string(),
            text_underline: "editor-text-underline".to_string(),
            text_strikethrough: "editor-text-strikethrough".to_string(),
            text_underline_strikethrough: "editor-text-underlineStrikethrough".to_string(),
        }
    }
}

impl HtmlTheme {
    pub fn heading(&self, level: u8) -> &str {
        self.headings
            .get(usize::from(level.saturating_sub(1)))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn list(&self, list_type: ListType) -> &str {
        match list_type {
            ListType::Bullet => &self.list_ul,
            ListType::Number => &self.list_ol,
        }
    }

    /// Classes for a run. Underline together with strikethrough uses the
    /// combined class instead of the two separate ones.
    pub fn text_classes(&self, format: TextFormat) -> Vec<&str> {
        let mut classes = Vec::new();
        if format.contains(TextFormat::BOLD) {
            classes.push(self.text_bold.as_str());
        }
        if format.contains(TextFormat::ITALIC) {
            classes.push(self.text_italic.as_str());
        }
        let underline = format.contains(TextFormat::UNDERLINE);
        let strike = format.contains(TextFormat::STRIKETHROUGH);
        match (underline, strike) {
            (true, true) => classes.push(self.text_underline_strikethrough.as_str()),
            (true, false) => classes.push(self.text_underline.as_str()),
            (false, true) => classes.push(self.text_strikethrough.as_str()),
            (false, false) => {}
        }
        classes.retain(|class| !class.is_empty());
        classes
    }
}
