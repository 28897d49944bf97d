use serde::{Deserialize, Serialize};

use super::{FilterValue, Listing, Manga, MangaWithChapter};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Home {
    pub components: Vec<HomeComponent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeComponent {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub value: HomeComponentValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HomeComponentValue {
    ImageScroller {
        links: Vec<Link>,
        auto_scroll_interval: Option<f32>,
        width: Option<i64>,
        height: Option<i64>,
    },
    BigScroller {
        entries: Vec<Manga>,
        auto_scroll_interval: Option<f32>,
    },
    Scroller {
        entries: Vec<Link>,
        listing: Option<Listing>,
    },
    MangaList {
        ranking: bool,
        page_size: Option<i64>,
        entries: Vec<Link>,
        listing: Option<Listing>,
    },
    MangaChapterList {
        page_size: Option<i64>,
        entries: Vec<MangaWithChapter>,
        listing: Option<Listing>,
    },
    Filters(Vec<FilterItem>),
    Links(Vec<Link>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterItem {
    pub title: String,
    pub values: Option<Vec<FilterValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub title: String,
    pub subtitle: Option<String>,
    pub image_url: Option<String>,
    pub value: Option<LinkValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkValue {
    Url(String),
    Listing(Listing),
    Manga(Manga),
}

/// A streamed update to the home screen being assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HomePartialResult {
    /// Replaces the whole layout.
    Layout(Home),
    /// Replaces the component with the same title, or is appended.
    Component(HomeComponent),
}

impl Home {
    /// Apply a streamed update.
    pub fn apply(&mut self, partial: HomePartialResult) {
        match partial {
            HomePartialResult::Layout(home) => *self = home,
            HomePartialResult::Component(component) => {
                match self
                    .components
                    .iter_mut()
                    .find(|existing| existing.title == component.title)
                {
                    Some(existing) => *existing = component,
                    None => self.components.push(component),
                }
            }
        }
    }

    /// Stamp the owning source on every embedded manga.
    pub fn set_source_key(&mut self, source_key: &str) {
        for component in &mut self.components {
            component.set_source_key(source_key);
        }
    }
}

impl HomeComponent {
    pub fn set_source_key(&mut self, source_key: &str) {
        let stamp_links = |links: &mut Vec<Link>| {
            for link in links {
                if let Some(LinkValue::Manga(manga)) = &mut link.value {
                    manga.source_key = source_key.to_string();
                }
            }
        };
        match &mut self.value {
            HomeComponentValue::ImageScroller { links, .. } => stamp_links(links),
            HomeComponentValue::Scroller { entries, .. }
            | HomeComponentValue::MangaList { entries, .. } => stamp_links(entries),
            HomeComponentValue::Links(links) => stamp_links(links),
            HomeComponentValue::BigScroller { entries, .. } => {
                for manga in entries {
                    manga.source_key = source_key.to_string();
                }
            }
            HomeComponentValue::MangaChapterList { entries, .. } => {
                for entry in entries {
                    entry.manga.source_key = source_key.to_string();
                }
            }
            HomeComponentValue::Filters(_) => {}
        }
    }
}
