use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_ARCHIVED_ARTICLES: usize = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleSummary {
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Keeps the `max` most recently published summaries, newest first.
/// Undated summaries sort as the oldest.
pub fn cap_articles(mut articles: Vec<ArticleSummary>, max: usize) -> Vec<ArticleSummary> {
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    articles.truncate(max);
    articles
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary(link: &str, day: Option<u32>) -> ArticleSummary {
        ArticleSummary {
            title: link.to_uppercase(),
            link: link.to_string(),
            published_at: day.map(|d| Utc.with_ymd_and_hms(2026, 1, d, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_cap_drops_oldest() {
        let articles = vec![
            summary("a", Some(3)),
            summary("b", None),
            summary("c", Some(9)),
            summary("d", Some(1)),
        ];
        let capped = cap_articles(articles, 2);
        let links: Vec<&str> = capped.iter().map(|a| a.link.as_str()).collect();
        assert_eq!(links, vec!["c", "a"]);
    }

    #[test]
    fn test_cap_under_limit_keeps_all() {
        let capped = cap_articles(vec![summary("a", None), summary("b", Some(2))], 10);
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].link, "b");
    }
}
