use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Extra key/value data a source attaches to a page URL.
pub type PageContext = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageContent {
    Url {
        url: String,
        context: Option<PageContext>,
    },
    Text(String),
    /// Arena handle of an image resource.
    Image(i32),
    ZipFile {
        url: String,
        file_path: String,
    },
}

impl PageContent {
    /// Arena handle the content refers to, if any.
    #[must_use]
    pub const fn image_handle(&self) -> Option<i32> {
        match self {
            Self::Image(handle) => Some(*handle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Page {
    pub content: PageContent,
    pub thumbnail: Option<String>,
    pub has_description: bool,
    pub description: Option<String>,
}

impl Page {
    #[must_use]
    pub const fn new(content: PageContent) -> Self {
        Self {
            content,
            thumbnail: None,
            has_description: false,
            description: None,
        }
    }
}
