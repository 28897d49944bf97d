use serde::{Deserialize, Serialize};

/// A filter selection sent with a search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterValue {
    Text {
        id: String,
        value: String,
    },
    Sort {
        id: String,
        index: i32,
        ascending: bool,
    },
    Check {
        id: String,
        value: i64,
    },
    Select {
        id: String,
        value: String,
    },
    MultiSelect {
        id: String,
        included: Vec<String>,
        excluded: Vec<String>,
    },
}

impl FilterValue {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Text { id, .. }
            | Self::Sort { id, .. }
            | Self::Check { id, .. }
            | Self::Select { id, .. }
            | Self::MultiSelect { id, .. } => id,
        }
    }
}
