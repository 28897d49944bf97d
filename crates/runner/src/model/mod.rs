//! Values exchanged with guest entry points. Field order is wire order.

mod filter;
mod home;
mod listing;
mod manga;
mod page;
mod response;

pub use filter::FilterValue;
pub use home::{
    FilterItem, Home, HomeComponent, HomeComponentValue, HomePartialResult, Link, LinkValue,
};
pub use listing::{Listing, ListingKind};
pub use manga::{
    Chapter, ContentRating, Manga, MangaPageResult, MangaStatus, MangaWithChapter, UpdateStrategy,
    Viewer,
};
pub use page::{Page, PageContent, PageContext};
pub use response::{DeepLinkResult, IdKind, ImageRequest, ImageResponse};

/// Optional timestamps carried as whole unix seconds.
pub(crate) mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.map(|date| date.timestamp()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<i64>::deserialize(deserializer)?
            .map(|secs| {
                DateTime::from_timestamp(secs, 0)
                    .ok_or_else(|| D::Error::custom(format!("timestamp {secs} out of range")))
            })
            .transpose()
    }
}
