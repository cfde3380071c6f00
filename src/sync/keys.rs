//! Logical keys and remote record ids.

/// Record holding one field per synced collection.
pub const SHARED_RECORD_ID: &str = "userData";

pub const READ_ITEMS: &str = "readItems";
pub const BOOKMARKED_ITEMS: &str = "bookmarkedItems";
pub const HEARTED_ITEMS: &str = "heartedItems";
pub const FEED_FOLDERS: &str = "feedFolders";
pub const RSS_FEEDS: &str = "rssFeeds";
pub const READ_HISTORY: &str = "readHistory";

/// Keys stored as fields of the shared record.
pub const SYNCED_KEYS: [&str; 5] = [READ_ITEMS, BOOKMARKED_ITEMS, HEARTED_ITEMS, FEED_FOLDERS, RSS_FEEDS];

/// Keys that are reset to empty instead of failing when their stored value
/// cannot be decoded.
pub const SELF_HEALING_KEYS: [&str; 3] = [READ_ITEMS, BOOKMARKED_ITEMS, HEARTED_ITEMS];

pub fn is_self_healing(key: &str) -> bool {
    SELF_HEALING_KEYS.contains(&key)
}

pub fn articles_record_id(feed_url: &str) -> String {
    format!("articles_{}", crate::link::normalize_link(feed_url))
}
