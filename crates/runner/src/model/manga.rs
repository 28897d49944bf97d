use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MangaStatus {
    #[default]
    Unknown,
    Ongoing,
    Completed,
    Cancelled,
    Hiatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentRating {
    #[default]
    Unknown,
    Safe,
    Suggestive,
    Nsfw,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Viewer {
    #[default]
    Unknown,
    LeftToRight,
    RightToLeft,
    Vertical,
    Webtoon,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateStrategy {
    #[default]
    Always,
    Never,
}

/// A catalog entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manga {
    /// Owning source; host-side only, never on the wire.
    #[serde(skip)]
    pub source_key: String,
    pub key: String,
    pub title: String,
    pub cover: Option<String>,
    pub artists: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub tags: Option<Vec<String>>,
    pub status: MangaStatus,
    pub content_rating: ContentRating,
    pub viewer: Viewer,
    pub update_strategy: UpdateStrategy,
    /// Unix seconds.
    pub next_update_time: Option<i64>,
    pub chapters: Option<Vec<Chapter>>,
}

impl Manga {
    #[must_use]
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Overlay `update` on `self`: present fields of `update` win, absent
    /// ones keep the current value. Enumerations always come from `update`.
    #[must_use]
    pub fn merged_with(&self, update: Self) -> Self {
        fn pick(new: String, old: &str) -> String {
            if new.is_empty() { old.to_string() } else { new }
        }
        Self {
            source_key: pick(update.source_key, &self.source_key),
            key: pick(update.key, &self.key),
            title: pick(update.title, &self.title),
            cover: update.cover.or_else(|| self.cover.clone()),
            artists: update.artists.or_else(|| self.artists.clone()),
            authors: update.authors.or_else(|| self.authors.clone()),
            description: update.description.or_else(|| self.description.clone()),
            url: update.url.or_else(|| self.url.clone()),
            tags: update.tags.or_else(|| self.tags.clone()),
            status: update.status,
            content_rating: update.content_rating,
            viewer: update.viewer,
            update_strategy: update.update_strategy,
            next_update_time: update.next_update_time,
            chapters: update.chapters.or_else(|| self.chapters.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub key: String,
    pub title: Option<String>,
    pub chapter_number: Option<f32>,
    pub volume_number: Option<f32>,
    #[serde(with = "super::epoch_seconds")]
    pub date_uploaded: Option<DateTime<Utc>>,
    pub scanlators: Option<Vec<String>>,
    pub url: Option<String>,
    pub language: Option<String>,
    pub thumbnail: Option<String>,
    pub locked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MangaPageResult {
    pub entries: Vec<Manga>,
    pub has_next_page: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MangaWithChapter {
    pub manga: Manga,
    pub chapter: Chapter,
}
