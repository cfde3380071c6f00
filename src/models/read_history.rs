use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::link::normalize_link;

pub const MAX_HISTORY_AGE_DAYS: i64 = 30;
pub const MAX_HISTORY_ENTRIES: usize = 5000;

/// When each link was last read. Pruning is independent of set merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadHistory {
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl ReadHistory {
    pub fn record(&mut self, link: &str, read_at: DateTime<Utc>) {
        self.entries.insert(normalize_link(link), read_at);
    }

    pub fn read_at(&self, link: &str) -> Option<DateTime<Utc>> {
        self.entries.get(&normalize_link(link)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops entries older than the age limit, then the oldest entries beyond
    /// the count limit. Returns how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let cutoff = now - Duration::days(MAX_HISTORY_AGE_DAYS);
        self.entries.retain(|_, read_at| *read_at >= cutoff);

        if self.entries.len() > MAX_HISTORY_ENTRIES {
            let mut by_age: Vec<(String, DateTime<Utc>)> =
                std::mem::take(&mut self.entries).into_iter().collect();
            by_age.sort_by(|a, b| b.1.cmp(&a.1));
            by_age.truncate(MAX_HISTORY_ENTRIES);
            self.entries = by_age.into_iter().collect();
        }

        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_normalizes() {
        let mut history = ReadHistory::default();
        let now = Utc::now();
        history.record("http://a.com/1/", now);
        assert_eq!(history.read_at("https://a.com/1"), Some(now));
    }

    #[test]
    fn test_prune_by_age() {
        let mut history = ReadHistory::default();
        let now = Utc::now();
        history.record("https://a.com/old", now - Duration::days(31));
        history.record("https://a.com/new", now - Duration::days(2));
        assert_eq!(history.prune(now), 1);
        assert!(history.read_at("https://a.com/old").is_none());
        assert!(history.read_at("https://a.com/new").is_some());
    }

    #[test]
    fn test_prune_by_count_keeps_newest() {
        let mut history = ReadHistory::default();
        let now = Utc::now();
        for i in 0..(MAX_HISTORY_ENTRIES + 10) {
            history.record(
                &format!("https://a.com/{i}"),
                now - Duration::seconds(i as i64),
            );
        }
        assert_eq!(history.prune(now), 10);
        assert_eq!(history.len(), MAX_HISTORY_ENTRIES);
        assert!(history.read_at("https://a.com/0").is_some());
        assert!(history.read_at(&format!("https://a.com/{}", MAX_HISTORY_ENTRIES)).is_none());
    }
}
