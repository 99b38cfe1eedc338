//! Content-addressed object storage.
//!
//! Objects are immutable and addressed by the sha256 of their encoding, so writing the same
//! bytes twice is a no-op and any reader can check what it received. Directories are
//! manifests of named entries; paths like `<root>/markets/index` are resolved by walking
//! manifests from a root address.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;

mod gateway;
mod local;
mod object;

pub use gateway::{GatewayContentStore, parse_gateway_url};
pub use local::LocalContentStore;
pub use object::{ContentAddress, ContentNode, DirEntry, NodeKind, Object};

use object::{encode_tree, path_segments};

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("content not found: {0}")]
    NotFound(ContentAddress),
    #[error("no entry {name} under {parent}")]
    NoSuchEntry {
        parent: ContentAddress,
        name: String,
    },
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("{0} is a directory")]
    IsADirectory(String),
    #[error("invalid content address: {0}")]
    InvalidAddress(String),
    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),
    #[error("content {expected} failed integrity check, got {actual}")]
    IntegrityMismatch {
        expected: ContentAddress,
        actual: ContentAddress,
    },
    #[error("corrupt object: {0}")]
    Corrupt(String),
    #[error("store is read-only")]
    ReadOnly,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Encoded bytes of an object.
    async fn get_object(&self, address: &ContentAddress) -> Result<Vec<u8>, ContentError>;

    /// Stores encoded bytes and returns their address.
    async fn put_object(&self, encoded: &[u8]) -> Result<ContentAddress, ContentError>;

    async fn has_object(&self, address: &ContentAddress) -> Result<bool, ContentError>;

    /// Marks an object graph as retained. Fails if any object in it is missing.
    async fn pin(&self, address: &ContentAddress) -> Result<(), ContentError>;

    async fn is_pinned(&self, address: &ContentAddress) -> Result<bool, ContentError>;

    /// Writes a whole tree, children first, and returns the root entry.
    async fn add(&self, node: &ContentNode) -> Result<DirEntry, ContentError> {
        let (root, objects) = encode_tree(node)?;
        for encoded in &objects {
            self.put_object(encoded).await?;
        }
        debug!(root = %root.hash, objects = objects.len(), "added content tree");
        Ok(root)
    }

    async fn get(&self, address: &ContentAddress) -> Result<Object, ContentError> {
        Object::decode(&self.get_object(address).await?)
    }

    /// Walks `path` from `root`, returning the address of the entry it names.
    async fn resolve(
        &self,
        root: &ContentAddress,
        path: &str,
    ) -> Result<ContentAddress, ContentError> {
        let mut current = *root;
        for segment in path_segments(path) {
            let Object::Dir(entries) = self.get(&current).await? else {
                return Err(ContentError::NotADirectory(path.to_string()));
            };
            current = entries
                .iter()
                .find(|entry| entry.name == segment)
                .map(|entry| entry.hash)
                .ok_or_else(|| ContentError::NoSuchEntry {
                    parent: current,
                    name: segment.to_string(),
                })?;
        }
        Ok(current)
    }

    /// File contents at `root/path`.
    async fn cat(&self, root: &ContentAddress, path: &str) -> Result<Vec<u8>, ContentError> {
        let address = self.resolve(root, path).await?;
        match self.get(&address).await? {
            Object::File(bytes) => Ok(bytes),
            Object::Dir(_) => Err(ContentError::IsADirectory(path.to_string())),
        }
    }

    /// Directory entries at `root/path`, sorted by name.
    async fn ls(&self, root: &ContentAddress, path: &str) -> Result<Vec<DirEntry>, ContentError> {
        let address = self.resolve(root, path).await?;
        match self.get(&address).await? {
            Object::Dir(entries) => Ok(entries),
            Object::File(_) => Err(ContentError::NotADirectory(path.to_string())),
        }
    }
}

/// Copies the object graph under `root` from `source` into `destination`, verifying every
/// object against its address. Children are written before their parents, so a directory
/// present in the destination always has its entries too. Returns the number of objects
/// copied.
pub async fn replicate(
    source: &dyn ContentStore,
    destination: &dyn ContentStore,
    root: &ContentAddress,
) -> Result<usize, ContentError> {
    let mut pending = vec![*root];
    let mut seen = HashSet::new();
    let mut fetched = Vec::new();
    while let Some(address) = pending.pop() {
        if !seen.insert(address) || destination.has_object(&address).await? {
            continue;
        }
        let encoded = source.get_object(&address).await?;
        let actual = ContentAddress::of(&encoded);
        if actual != address {
            return Err(ContentError::IntegrityMismatch {
                expected: address,
                actual,
            });
        }
        if let Object::Dir(entries) = Object::decode(&encoded)? {
            pending.extend(entries.iter().map(|entry| entry.hash));
        }
        fetched.push(encoded);
    }
    for encoded in fetched.iter().rev() {
        destination.put_object(encoded).await?;
    }
    debug!(%root, copied = fetched.len(), "replicated content");
    Ok(fetched.len())
}
