use feed_msg::Post;
use serde_derive::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortMode {
    #[default]
    NewestFirst,
    OldestFirst,
    MostReacted,
}

impl SortMode {
    /// Total order over posts; ties fall back to recency, then id.
    pub fn compare(&self, a: &Post, b: &Post) -> Ordering {
        let newest_first = b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id));
        match self {
            SortMode::NewestFirst => newest_first,
            SortMode::OldestFirst => a
                .created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id)),
            SortMode::MostReacted => b
                .reaction_counts
                .total()
                .cmp(&a.reaction_counts.total())
                .then(newest_first),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub sort: SortMode,
    /// Queue a background re-fetch of the touched slice after every
    /// confirmed mutation.
    pub refresh_after_success: bool,
    /// Sort each post's comments by creation time before building threads.
    pub chronological_comments: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sort: SortMode::NewestFirst,
            refresh_after_success: false,
            chronological_comments: true,
        }
    }
}
