//! Flat key/value store of raw page bodies.
//!
//! Entries never expire: historical race pages do not change once published,
//! so a cached body is treated as permanently valid. Callers that need a
//! fresh copy use `DocumentFetcher::invalidate`.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use url::Url;

/// Key for a URL whose path ends in `/` (or is empty). Braces are always
/// percent-encoded in URL paths, so no real page segment can produce it.
const INDEX_KEY: &str = "{index}";

/// Marker prefixed to every directory segment of a cache key.
const DIR_MARKER: char = '_';

/// Storage for raw page bodies, keyed by `cache_key`.
///
/// Implementations must allow concurrent reads, and writes to distinct keys
/// must not block each other.
#[async_trait]
pub trait DocumentCache: Send + Sync {
    async fn get(&self, key: &str) -> io::Result<Option<String>>;

    async fn put(&self, key: &str, content: &str) -> io::Result<()>;

    async fn delete(&self, key: &str) -> io::Result<()>;
}

/// Derive the cache key for a URL.
///
/// The path (and query, if any) loses its leading `/`, and every directory
/// segment except the last gets a `_` prefix:
/// `race/tour-de-france/2025/stage-1` → `_race/_tour-de-france/_2025/stage-1`.
/// A page (`race/x`) and a page nested under a same-named directory
/// (`race/x/result`) therefore never map to the same file.
pub fn cache_key(url: &Url) -> String {
    let mut file = url.path().trim_start_matches('/').to_string();
    if let Some(query) = url.query() {
        file.push('?');
        file.push_str(query);
    }
    if file.is_empty() {
        return INDEX_KEY.to_string();
    }

    let segments: Vec<&str> = file.split('/').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return INDEX_KEY.to_string(),
    };

    let mut key = String::with_capacity(file.len() + parents.len());
    for parent in parents {
        key.push(DIR_MARKER);
        key.push_str(parent);
        key.push('/');
    }
    key.push_str(if last.is_empty() { INDEX_KEY } else { last });
    key
}

/// Cache stored as one file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FsDocumentCache {
    root: PathBuf,
}

impl FsDocumentCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        let relative = Path::new(key);
        let escapes_root = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes_root {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid cache key '{}'", key),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentCache for FsDocumentCache {
    async fn get(&self, key: &str) -> io::Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: &str, content: &str) -> io::Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await
    }

    async fn delete(&self, key: &str) -> io::Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// In-process cache, sharded per key.
#[derive(Debug, Default)]
pub struct MemoryDocumentCache {
    entries: DashMap<String, String>,
}

impl MemoryDocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DocumentCache for MemoryDocumentCache {
    async fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, content: &str) -> io::Result<()> {
        self.entries.insert(key.to_string(), content.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> io::Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key(url: &str) -> String {
        cache_key(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_cache_key_single_segment() {
        assert_eq!(key("https://www.procyclingstats.com/teams.php"), "teams.php");
    }

    #[test]
    fn test_cache_key_nested() {
        assert_eq!(
            key("https://www.procyclingstats.com/race/tour-de-france/2025/stage-1"),
            "_race/_tour-de-france/_2025/stage-1"
        );
    }

    #[test]
    fn test_cache_key_keeps_query() {
        assert_eq!(
            key("https://www.procyclingstats.com/races.php?season=2025&category=1"),
            "races.php?season=2025&category=1"
        );
    }

    #[test]
    fn test_cache_key_root() {
        assert_eq!(key("https://www.procyclingstats.com/"), "{index}");
    }

    #[test]
    fn test_cache_key_trailing_slash_is_not_index_page() {
        let dir = key("https://x.test/race/x/");
        let page = key("https://x.test/race/x/index");
        assert_eq!(dir, "_race/_x/{index}");
        assert_eq!(page, "_race/_x/index");
        assert_ne!(key("https://x.test/"), key("https://x.test/index"));
    }

    #[test]
    fn test_cache_key_page_and_directory_do_not_collide() {
        let page = key("https://www.procyclingstats.com/race/paris-roubaix/2025");
        let nested = key("https://www.procyclingstats.com/race/paris-roubaix/2025/result");
        assert_eq!(page, "_race/_paris-roubaix/2025");
        assert_eq!(nested, "_race/_paris-roubaix/_2025/result");
        // The page's file must not be the nested page's parent directory.
        assert!(!nested.starts_with(&format!("{}/", page)));
    }

    #[test]
    fn test_cache_key_distinct_depths_are_distinct() {
        let urls = [
            "https://x.test/a",
            "https://x.test/a/b",
            "https://x.test/a/b/c",
            "https://x.test/_a/b",
            "https://x.test/b",
            "https://x.test/a/a",
        ];
        let keys: HashSet<String> = urls.iter().map(|u| key(u)).collect();
        assert_eq!(keys.len(), urls.len());
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let cache = MemoryDocumentCache::new();
        cache.put("_race/x", "<html>x</html>").await.unwrap();
        assert_eq!(
            cache.get("_race/x").await.unwrap().as_deref(),
            Some("<html>x</html>")
        );
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let cache = MemoryDocumentCache::new();
        cache.put("k", "v").await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.delete("k").await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_fs_round_trip_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsDocumentCache::new(dir.path());
        let k = key("https://www.procyclingstats.com/race/tour-de-france/2025/stage-1");
        cache.put(&k, "<html>stage</html>").await.unwrap();
        assert_eq!(
            cache.get(&k).await.unwrap().as_deref(),
            Some("<html>stage</html>")
        );
        assert!(dir.path().join("_race/_tour-de-france/_2025/stage-1").exists());
    }

    #[tokio::test]
    async fn test_fs_page_and_nested_page_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsDocumentCache::new(dir.path());
        let page = key("https://www.procyclingstats.com/race/paris-roubaix/2025");
        let nested = key("https://www.procyclingstats.com/race/paris-roubaix/2025/result");
        cache.put(&page, "race").await.unwrap();
        cache.put(&nested, "result").await.unwrap();
        assert_eq!(cache.get(&page).await.unwrap().as_deref(), Some("race"));
        assert_eq!(cache.get(&nested).await.unwrap().as_deref(), Some("result"));
    }

    #[tokio::test]
    async fn test_fs_missing_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsDocumentCache::new(dir.path());
        assert_eq!(cache.get("nothing").await.unwrap(), None);
        cache.delete("nothing").await.unwrap();
        cache.put("page", "x").await.unwrap();
        cache.delete("page").await.unwrap();
        assert_eq!(cache.get("page").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsDocumentCache::new(dir.path());
        let err = cache.put("../outside", "x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(cache.get("/etc/passwd").await.is_err());
    }
}
