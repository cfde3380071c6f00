mod article;
mod chunk;
mod feed;
mod folder;
mod read_history;

pub use article::{cap_articles, ArticleSummary, MAX_ARCHIVED_ARTICLES};
pub use chunk::{Chunk, ChunkMetadata};
pub use feed::FeedRecord;
pub use folder::Folder;
pub use read_history::{ReadHistory, MAX_HISTORY_AGE_DAYS, MAX_HISTORY_ENTRIES};
