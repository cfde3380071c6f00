use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A subscription as stored under the `rssFeeds` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRecord {
    pub url: String,
    pub title: String,
    pub last_updated: DateTime<Utc>,
}
