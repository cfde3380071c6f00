use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::link::normalize_link;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(rename = "feedURLs", default)]
    pub feed_urls: BTreeSet<String>,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            feed_urls: BTreeSet::new(),
        }
    }

    pub fn contains_feed(&self, url: &str) -> bool {
        self.feed_urls.contains(&normalize_link(url))
    }
}
