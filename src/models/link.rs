//! Quick links shown on the home page

use serde::{Deserialize, Serialize};

use super::object::Record;

pub const LINK_CLASS: &str = "Link";

pub const DEFAULT_LINK_TITLE: &str = "未命名链接";
pub const DEFAULT_LINK_ICON: &str = "fas fa-link";
pub const DEFAULT_LINK_CATEGORY: &str = "其他";
pub const DEFAULT_LINK_ORDER: &str = "999";

/// Categories in display order; anything else is shown after these.
pub const LINK_CATEGORIES: [&str; 5] = ["系统工具", "报关平台", "物流查询", "办公协作", "其他"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_category")]
    pub category: String,
    /// Sort key, kept as text for compatibility with stored data
    #[serde(default = "default_order")]
    pub order: String,
}

fn default_title() -> String {
    DEFAULT_LINK_TITLE.to_string()
}

fn default_icon() -> String {
    DEFAULT_LINK_ICON.to_string()
}

fn default_category() -> String {
    DEFAULT_LINK_CATEGORY.to_string()
}

fn default_order() -> String {
    DEFAULT_LINK_ORDER.to_string()
}

impl Default for QuickLink {
    fn default() -> Self {
        Self {
            object_id: None,
            title: default_title(),
            url: String::new(),
            description: String::new(),
            icon: default_icon(),
            category: default_category(),
            order: default_order(),
        }
    }
}

impl Record for QuickLink {
    const CLASS_NAME: &'static str = LINK_CLASS;

    fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }
}

impl QuickLink {
    /// Numeric sort key; non-numeric orders sort last
    pub fn order_key(&self) -> (u64, &str) {
        (self.order.trim().parse().unwrap_or(u64::MAX), self.order.as_str())
    }

    /// Position of the category in [`LINK_CATEGORIES`], unknown ones last
    pub fn category_rank(&self) -> usize {
        LINK_CATEGORIES
            .iter()
            .position(|c| *c == self.category)
            .unwrap_or(LINK_CATEGORIES.len())
    }
}
