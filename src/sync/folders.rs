//! Folder management over the `feedFolders` key.
//!
//! Additions go through the merging save. Renames and removals are written
//! with a replacing push after a fresh load, otherwise the union merge would
//! restore what was just removed and the remote name would undo a rename.

use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::link::normalize_link;
use crate::models::Folder;

use super::keys::FEED_FOLDERS;
use super::SyncCoordinator;

impl SyncCoordinator {
    /// All folders, sorted by name.
    pub async fn get_folders(&self) -> Result<Vec<Folder>> {
        let mut folders: Vec<Folder> = self.load(FEED_FOLDERS).await?;
        folders.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(folders)
    }

    pub async fn create_folder(&self, name: &str) -> Result<Folder> {
        let mut folders: Vec<Folder> = self.load(FEED_FOLDERS).await?;
        let folder = Folder::new(name.trim());
        folders.push(folder.clone());

        self.save(&folders, FEED_FOLDERS).await?;
        self.events().publish(SyncEvent::FoldersChanged);
        tracing::info!("Created folder {} ({})", folder.name, folder.id);
        Ok(folder)
    }

    /// Replaces the name and feed URLs of the folder with `folder.id`.
    pub async fn update_folder(&self, folder: &Folder) -> Result<()> {
        let mut folders: Vec<Folder> = self.load(FEED_FOLDERS).await?;
        let existing = folders
            .iter_mut()
            .find(|f| f.id == folder.id)
            .ok_or_else(|| SyncError::FolderNotFound(folder.id.clone()))?;

        existing.name = folder.name.clone();
        existing.feed_urls = folder.feed_urls.iter().map(|u| normalize_link(u)).collect();

        self.save_replacing(&folders, FEED_FOLDERS).await?;
        self.events().publish(SyncEvent::FoldersChanged);
        Ok(())
    }

    pub async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        let mut folders: Vec<Folder> = self.load(FEED_FOLDERS).await?;
        let before = folders.len();
        folders.retain(|f| f.id != folder_id);
        if folders.len() == before {
            return Err(SyncError::FolderNotFound(folder_id.to_string()));
        }

        self.save_replacing(&folders, FEED_FOLDERS).await?;
        self.events().publish(SyncEvent::FoldersChanged);
        tracing::info!("Deleted folder {}", folder_id);
        Ok(())
    }

    pub async fn add_feed_to_folder(&self, feed_url: &str, folder_id: &str) -> Result<()> {
        let mut folders: Vec<Folder> = self.load(FEED_FOLDERS).await?;
        let folder = folders
            .iter_mut()
            .find(|f| f.id == folder_id)
            .ok_or_else(|| SyncError::FolderNotFound(folder_id.to_string()))?;

        if !folder.feed_urls.insert(normalize_link(feed_url)) {
            return Ok(());
        }

        self.save(&folders, FEED_FOLDERS).await?;
        self.events().publish(SyncEvent::FoldersChanged);
        Ok(())
    }

    pub async fn remove_feed_from_folder(&self, feed_url: &str, folder_id: &str) -> Result<()> {
        let mut folders: Vec<Folder> = self.load(FEED_FOLDERS).await?;
        let folder = folders
            .iter_mut()
            .find(|f| f.id == folder_id)
            .ok_or_else(|| SyncError::FolderNotFound(folder_id.to_string()))?;

        if !folder.feed_urls.remove(&normalize_link(feed_url)) {
            return Ok(());
        }

        self.save_replacing(&folders, FEED_FOLDERS).await?;
        self.events().publish(SyncEvent::FoldersChanged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::db::MemoryStore;
    use crate::sync::SyncCoordinator;

    fn coordinator() -> SyncCoordinator {
        SyncCoordinator::local_only(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_folder_crud() {
        let sync = coordinator();
        let tech = sync.create_folder("Tech").await.unwrap();
        let news = sync.create_folder(" news ").await.unwrap();
        assert_eq!(news.name, "news");

        sync.add_feed_to_folder("http://x.com/feed/", &tech.id).await.unwrap();
        sync.add_feed_to_folder("https://y.com", &tech.id).await.unwrap();
        sync.remove_feed_from_folder("https://y.com/", &tech.id).await.unwrap();

        let folders = sync.get_folders().await.unwrap();
        let names: Vec<&str> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["news", "Tech"]);
        assert!(folders[1].contains_feed("https://x.com/feed"));
        assert_eq!(folders[1].feed_urls.len(), 1);

        let mut renamed = folders[1].clone();
        renamed.name = "Technology".into();
        sync.update_folder(&renamed).await.unwrap();

        sync.delete_folder(&news.id).await.unwrap();
        let folders = sync.get_folders().await.unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "Technology");
        assert_eq!(folders[0].id, tech.id);
    }

    #[tokio::test]
    async fn test_unknown_folder() {
        let sync = coordinator();
        let err = sync.add_feed_to_folder("x.com", "missing").await.unwrap_err();
        assert!(matches!(err, crate::SyncError::FolderNotFound(_)));
        assert!(sync.delete_folder("missing").await.is_err());
    }
}
