use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::ContentError;

const FILE_TAG: u8 = b'f';
const DIR_TAG: u8 = b'd';

/// sha256 of an encoded object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentAddress([u8; 32]);

impl ContentAddress {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn of(encoded: &[u8]) -> Self {
        Self(Sha256::digest(encoded).into())
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentAddress({})", self.to_hex())
    }
}

impl FromStr for ContentAddress {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ContentError::InvalidAddress(s.to_string());
        if s.len() != 64 {
            return Err(invalid());
        }
        let bytes = hex::decode(s).map_err(|_| invalid())?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(bytes))
    }
}

impl Serialize for ContentAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub hash: ContentAddress,
    pub kind: NodeKind,
    pub size: u64,
}

/// A stored object: raw file bytes, or a directory manifest sorted by entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    File(Vec<u8>),
    Dir(Vec<DirEntry>),
}

impl Object {
    pub fn encode(&self) -> Result<Vec<u8>, ContentError> {
        match self {
            Object::File(bytes) => {
                let mut out = Vec::with_capacity(bytes.len() + 1);
                out.push(FILE_TAG);
                out.extend_from_slice(bytes);
                Ok(out)
            }
            Object::Dir(entries) => {
                let mut out = vec![DIR_TAG];
                serde_json::to_writer(&mut out, entries)?;
                Ok(out)
            }
        }
    }

    pub fn decode(encoded: &[u8]) -> Result<Self, ContentError> {
        match encoded.split_first() {
            Some((&FILE_TAG, rest)) => Ok(Object::File(rest.to_vec())),
            Some((&DIR_TAG, rest)) => Ok(Object::Dir(serde_json::from_slice(rest)?)),
            Some((tag, _)) => Err(ContentError::Corrupt(format!("unknown object tag {tag:#x}"))),
            None => Err(ContentError::Corrupt("empty object".to_string())),
        }
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Object::File(_) => NodeKind::File,
            Object::Dir(_) => NodeKind::Dir,
        }
    }

    /// Logical size: file length, or the sum of entry sizes for a directory.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Object::File(bytes) => bytes.len() as u64,
            Object::Dir(entries) => entries.iter().map(|e| e.size).sum(),
        }
    }
}

/// Tree handed to [`crate::ContentStore::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentNode {
    File(Vec<u8>),
    Dir(BTreeMap<String, ContentNode>),
    /// An object already in the store, referenced by address.
    Link {
        hash: ContentAddress,
        kind: NodeKind,
        size: u64,
    },
}

impl ContentNode {
    #[must_use]
    pub fn file(bytes: impl Into<Vec<u8>>) -> Self {
        ContentNode::File(bytes.into())
    }

    #[must_use]
    pub fn dir() -> Self {
        ContentNode::Dir(BTreeMap::new())
    }

    /// Inserts a child into a directory node. Has no effect on files and links.
    pub fn insert(&mut self, name: impl Into<String>, child: ContentNode) {
        if let ContentNode::Dir(children) = self {
            children.insert(name.into(), child);
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, child: ContentNode) -> Self {
        self.insert(name, child);
        self
    }
}

/// Encodes a tree bottom-up. Returns the root entry and every encoded object, children
/// before their parents.
pub(crate) fn encode_tree(node: &ContentNode) -> Result<(DirEntry, Vec<Vec<u8>>), ContentError> {
    let mut objects = Vec::new();
    let root = encode_node(String::new(), node, &mut objects)?;
    Ok((root, objects))
}

fn encode_node(
    name: String,
    node: &ContentNode,
    objects: &mut Vec<Vec<u8>>,
) -> Result<DirEntry, ContentError> {
    let object = match node {
        ContentNode::Link { hash, kind, size } => {
            return Ok(DirEntry {
                name,
                hash: *hash,
                kind: *kind,
                size: *size,
            });
        }
        ContentNode::File(bytes) => Object::File(bytes.clone()),
        ContentNode::Dir(children) => {
            let entries = children
                .iter()
                .map(|(child_name, child)| encode_node(child_name.clone(), child, objects))
                .collect::<Result<Vec<_>, _>>()?;
            Object::Dir(entries)
        }
    };
    let encoded = object.encode()?;
    let entry = DirEntry {
        name,
        hash: ContentAddress::of(&encoded),
        kind: object.kind(),
        size: object.size(),
    };
    objects.push(encoded);
    Ok(entry)
}

/// Splits `a/b/c` into segments; empty segments are ignored so `""` and `"/"` are the root.
pub(crate) fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parses_only_full_hex() {
        let addr = ContentAddress::of(b"fhello");
        assert_eq!(addr.to_hex().parse::<ContentAddress>().unwrap(), addr);
        assert!("abc".parse::<ContentAddress>().is_err());
        assert!("zz".repeat(32).parse::<ContentAddress>().is_err());
    }

    #[test]
    fn identical_trees_share_addresses() {
        let tree = ContentNode::dir()
            .with("VERSION", ContentNode::file("1"))
            .with("tables", ContentNode::dir().with("a", ContentNode::file("x")));
        let (first, objects) = encode_tree(&tree).unwrap();
        let (second, _) = encode_tree(&tree.clone()).unwrap();
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.kind, NodeKind::Dir);
        assert_eq!(first.size, 2);
        assert_eq!(objects.len(), 4);
        assert_eq!(ContentAddress::of(objects.last().unwrap()), first.hash);
    }

    #[test]
    fn manifest_entries_are_sorted() {
        let tree = ContentNode::dir()
            .with("b", ContentNode::file("2"))
            .with("a", ContentNode::file("1"));
        let (_, objects) = encode_tree(&tree).unwrap();
        let Object::Dir(entries) = Object::decode(objects.last().unwrap()).unwrap() else {
            panic!("root is a directory");
        };
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
