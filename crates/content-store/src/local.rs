use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::{ContentAddress, ContentError, ContentStore, Object};

const BLOBS_DIR: &str = "blobs";
const PINS_DIR: &str = "pins";

/// Filesystem store: `blobs/<aa>/<address>` for objects, `pins/<address>` markers.
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ContentError> {
        let root = root.into();
        fs::create_dir_all(root.join(BLOBS_DIR)).await?;
        fs::create_dir_all(root.join(PINS_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, address: &ContentAddress) -> PathBuf {
        let hex = address.to_hex();
        self.root.join(BLOBS_DIR).join(&hex[..2]).join(hex)
    }

    fn pin_path(&self, address: &ContentAddress) -> PathBuf {
        self.root.join(PINS_DIR).join(address.to_hex())
    }

    /// Addresses currently pinned, sorted.
    pub async fn pinned(&self) -> Result<Vec<ContentAddress>, ContentError> {
        let mut out = Vec::new();
        let mut dir = fs::read_dir(self.root.join(PINS_DIR)).await?;
        while let Some(entry) = dir.next_entry().await? {
            if let Some(name) = entry.file_name().to_str()
                && let Ok(address) = name.parse()
            {
                out.push(address);
            }
        }
        out.sort();
        Ok(out)
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn get_object(&self, address: &ContentAddress) -> Result<Vec<u8>, ContentError> {
        let encoded = match fs::read(self.object_path(address)).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ContentError::NotFound(*address));
            }
            Err(err) => return Err(err.into()),
        };
        let actual = ContentAddress::of(&encoded);
        if actual != *address {
            return Err(ContentError::IntegrityMismatch {
                expected: *address,
                actual,
            });
        }
        Ok(encoded)
    }

    async fn put_object(&self, encoded: &[u8]) -> Result<ContentAddress, ContentError> {
        let address = ContentAddress::of(encoded);
        let path = self.object_path(&address);
        if fs::try_exists(&path).await? {
            return Ok(address);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = temp_path(&path);
        fs::write(&temp, encoded).await?;
        fs::rename(&temp, &path).await?;
        debug!(%address, size = encoded.len(), "stored object");
        Ok(address)
    }

    async fn has_object(&self, address: &ContentAddress) -> Result<bool, ContentError> {
        Ok(fs::try_exists(self.object_path(address)).await?)
    }

    async fn pin(&self, address: &ContentAddress) -> Result<(), ContentError> {
        let mut pending = vec![*address];
        while let Some(next) = pending.pop() {
            if let Object::Dir(entries) = self.get(&next).await? {
                pending.extend(entries.iter().map(|entry| entry.hash));
            }
        }
        fs::write(self.pin_path(address), b"").await?;
        info!(%address, "pinned content");
        Ok(())
    }

    async fn is_pinned(&self, address: &ContentAddress) -> Result<bool, ContentError> {
        Ok(fs::try_exists(self.pin_path(address)).await?)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("object");
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let mut temp_path = path.to_path_buf();
    temp_path.set_file_name(format!("{file_name}.tmp.{pid}.{nanos}"));
    temp_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentNode, NodeKind, replicate};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "content-store-{name}-{}-{nanos}",
            std::process::id()
        ))
    }

    fn sample_tree() -> ContentNode {
        ContentNode::dir()
            .with("VERSION", ContentNode::file("1"))
            .with(
                "tables",
                ContentNode::dir().with(
                    "MarketCreated",
                    ContentNode::dir().with("index", ContentNode::file("{\"a\":1}\n")),
                ),
            )
    }

    #[tokio::test]
    async fn add_cat_and_ls() {
        let dir = temp_dir("add");
        let store = LocalContentStore::open(&dir).await.unwrap();
        let root = store.add(&sample_tree()).await.unwrap();

        assert_eq!(store.cat(&root.hash, "VERSION").await.unwrap(), b"1");
        assert_eq!(
            store
                .cat(&root.hash, "/tables/MarketCreated/index")
                .await
                .unwrap(),
            b"{\"a\":1}\n"
        );
        let entries = store.ls(&root.hash, "").await.unwrap();
        let listing: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            listing,
            [("VERSION", NodeKind::File), ("tables", NodeKind::Dir)]
        );

        assert!(matches!(
            store.ls(&root.hash, "VERSION").await,
            Err(ContentError::NotADirectory(_))
        ));
        assert!(matches!(
            store.cat(&root.hash, "tables").await,
            Err(ContentError::IsADirectory(_))
        ));
        assert!(matches!(
            store.cat(&root.hash, "missing").await,
            Err(ContentError::NoSuchEntry { .. })
        ));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn adding_twice_is_deduplicated() {
        let dir = temp_dir("dedup");
        let store = LocalContentStore::open(&dir).await.unwrap();
        let first = store.add(&sample_tree()).await.unwrap();
        let second = store.add(&sample_tree()).await.unwrap();
        assert_eq!(first.hash, second.hash);

        let mut blobs = 0;
        for shard in std::fs::read_dir(dir.join(BLOBS_DIR)).unwrap() {
            blobs += std::fs::read_dir(shard.unwrap().path()).unwrap().count();
        }
        assert_eq!(blobs, 5);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn pin_requires_the_whole_graph() {
        let dir = temp_dir("pin");
        let store = LocalContentStore::open(&dir).await.unwrap();
        let missing = ContentAddress::of(b"fnot stored");
        assert!(matches!(
            store.pin(&missing).await,
            Err(ContentError::NotFound(_))
        ));
        assert!(!store.is_pinned(&missing).await.unwrap());

        let root = store.add(&sample_tree()).await.unwrap();
        store.pin(&root.hash).await.unwrap();
        assert!(store.is_pinned(&root.hash).await.unwrap());
        assert_eq!(store.pinned().await.unwrap(), vec![root.hash]);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn replicate_copies_and_verifies() {
        let src_dir = temp_dir("replicate-src");
        let dst_dir = temp_dir("replicate-dst");
        let source = LocalContentStore::open(&src_dir).await.unwrap();
        let destination = LocalContentStore::open(&dst_dir).await.unwrap();
        let root = source.add(&sample_tree()).await.unwrap();

        assert_eq!(replicate(&source, &destination, &root.hash).await.unwrap(), 5);
        assert_eq!(replicate(&source, &destination, &root.hash).await.unwrap(), 0);
        assert_eq!(destination.cat(&root.hash, "VERSION").await.unwrap(), b"1");

        let _ = std::fs::remove_dir_all(src_dir);
        let _ = std::fs::remove_dir_all(dst_dir);
    }
}
