use serde::{Deserialize, Serialize};

/// Reserved key assigned to posts from must-read accounts. Never offered to the model.
pub const MUST_READ: &str = "must_read";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub key: String,
    pub label: String,
    pub color: String,
    #[serde(default = "default_expanded")]
    pub expanded_by_default: bool,
    #[serde(default)]
    pub description_for_llm: String,
}

fn default_expanded() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MustReadAccount {
    pub handle: String,
}

impl MustReadAccount {
    pub fn normalized(&self) -> String {
        normalize_handle(&self.handle).to_lowercase()
    }
}

/// Trims whitespace and a single leading `@`.
pub fn normalize_handle(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('@')
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

fn category(key: &str, label: &str, color: &str, expanded: bool, description: &str) -> CategoryDef {
    CategoryDef {
        key: key.to_string(),
        label: label.to_string(),
        color: color.to_string(),
        expanded_by_default: expanded,
        description_for_llm: description.to_string(),
    }
}

pub fn default_categories() -> Vec<CategoryDef> {
    vec![
        category(
            MUST_READ,
            "Must Read",
            "#e74c3c",
            true,
            "High-signal tweets from key accounts. Important market news, breaking developments, or insights you can't afford to miss.",
        ),
        category(
            "stock_ideas",
            "Stock Ideas",
            "#3498db",
            true,
            "Specific stock picks, trade ideas, earnings analysis, or investment theses worth evaluating.",
        ),
        category(
            "viral",
            "Viral / Trending",
            "#9b59b6",
            true,
            "Widely shared or discussed tweets. Hot takes, viral threads, or trending topics getting significant engagement.",
        ),
        category(
            "charts",
            "Charts & Data",
            "#2ecc71",
            true,
            "Technical analysis, data visualizations, charts, or statistical insights. Often has media attachments.",
        ),
        category(
            "funny",
            "Funny / Entertainment",
            "#f39c12",
            false,
            "Humor, memes, entertaining content. Good for a laugh but not actionable.",
        ),
        category(
            "skip",
            "Skip",
            "#95a5a6",
            false,
            "Low-value content: self-promotion, ads, engagement bait, repetitive commentary, or anything not worth reading. Be liberal with this category.",
        ),
    ]
}
