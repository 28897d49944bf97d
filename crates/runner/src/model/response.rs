use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Listing;

/// The request that produced an [`ImageResponse`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub url: Option<String>,
    pub headers: BTreeMap<String, String>,
}

/// A fetched page image handed to `process_page_image`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub code: u16,
    pub headers: BTreeMap<String, String>,
    pub request: ImageRequest,
    /// Arena handle of the image resource.
    pub image: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepLinkResult {
    pub manga_id: Option<String>,
    pub chapter_id: Option<String>,
    pub listing: Option<Listing>,
}

/// Which identifier `handle_id_migration` is asked to translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Manga,
    Chapter,
}

impl IdKind {
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Manga => 0,
            Self::Chapter => 1,
        }
    }
}
