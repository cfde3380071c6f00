//! Per-feed archive of article summaries, one record per feed.

use crate::error::Result;
use crate::link::normalize_link;
use crate::models::{cap_articles, ArticleSummary, MAX_ARCHIVED_ARTICLES};

use super::codec;
use super::keys::articles_record_id;
use super::SyncCoordinator;

const ARTICLES_FIELD: &str = "articles";

impl SyncCoordinator {
    /// Stores the newest summaries for `feed_url` locally and, with remote
    /// sync on, in the feed's record. Returns how many were kept.
    pub async fn save_feed_articles(
        &self,
        feed_url: &str,
        articles: Vec<ArticleSummary>,
    ) -> Result<usize> {
        let record_id = articles_record_id(feed_url);
        let articles: Vec<ArticleSummary> = cap_articles(articles, MAX_ARCHIVED_ARTICLES)
            .into_iter()
            .map(|mut a| {
                a.link = normalize_link(&a.link);
                a
            })
            .collect();

        let encoded = codec::encode(&record_id, &articles)?;
        self.local().set(&record_id, encoded.clone().into_bytes()).await?;

        if self.push_record_field(&record_id, ARTICLES_FIELD, &encoded).await? {
            tracing::debug!("Archived {} articles for {}", articles.len(), feed_url);
        }
        Ok(articles.len())
    }

    /// Remote archive when available, else the local copy, else empty.
    pub async fn load_feed_articles(&self, feed_url: &str) -> Result<Vec<ArticleSummary>> {
        let record_id = articles_record_id(feed_url);

        if let Some(record) = self.fetch_record(&record_id).await? {
            if let Some(articles) = codec::decode_field(&record, ARTICLES_FIELD)? {
                return Ok(articles);
            }
        }

        match self.local().get(&record_id).await? {
            Some(bytes) => codec::decode_bytes(&record_id, &bytes),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use crate::db::MemoryStore;
    use crate::models::ArticleSummary;
    use crate::sync::SyncCoordinator;

    #[tokio::test]
    async fn test_archive_caps_and_normalizes() {
        let sync = SyncCoordinator::local_only(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        let articles: Vec<ArticleSummary> = (0..5010)
            .map(|i| ArticleSummary {
                title: format!("Post {i}"),
                link: format!("http://a.com/{i}/"),
                published_at: Some(now - Duration::minutes(i)),
            })
            .collect();

        let kept = sync.save_feed_articles("http://a.com/feed", articles).await.unwrap();
        assert_eq!(kept, 5000);

        let loaded = sync.load_feed_articles("https://a.com/feed/").await.unwrap();
        assert_eq!(loaded.len(), 5000);
        assert_eq!(loaded[0].link, "https://a.com/0");
        assert!(loaded.iter().all(|a| a.title != "Post 5005"));
    }

    #[tokio::test]
    async fn test_unknown_feed_is_empty() {
        let sync = SyncCoordinator::local_only(Arc::new(MemoryStore::new()));
        assert!(sync.load_feed_articles("https://none.com").await.unwrap().is_empty());
    }
}
