//! The block trie.
//!
//! A [`Block`] is either a [`Leaf`] container file or a [`Directory`] that
//! fans out over the next hash byte. Each trie level is one path segment on
//! disk, named by the byte in lowercase hex.

use std::{
    collections::HashMap,
    fmt,
    path::{Component, Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::RwLock;
use strata_primitives::HASH_LENGTH;

pub(crate) mod header;
mod leaf;
pub(crate) mod scan;

pub(crate) use leaf::{Cleanup, Leaf, LeafState, PutMode, SlotLocation};

use crate::constants::{BACKUP_SUFFIX, DUPLICATE_SUFFIX, MERGE_SUFFIX, REPAIR_SUFFIX};

/// Hash bytes consumed to reach a trie node.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub(crate) struct BlockPrefix(Vec<u8>);

impl BlockPrefix {
    pub(crate) fn root() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub(crate) fn child(&self, byte: u8) -> Self {
        let mut bytes = self.0.clone();
        bytes.push(byte);
        Self(bytes)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether a leaf here may still become a directory.
    pub(crate) fn can_split(&self) -> bool {
        self.depth() < HASH_LENGTH
    }

    /// Path relative to a volume root.
    pub(crate) fn relative_path(&self) -> PathBuf {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    /// Parse a path relative to a volume root into a prefix and the
    /// container suffix of its last segment.
    pub(crate) fn from_relative(path: &Path) -> Option<(Self, Option<String>)> {
        let mut bytes = Vec::new();
        let mut suffix = None;
        let mut components = path.components().peekable();
        while let Some(component) = components.next() {
            let Component::Normal(name) = component else {
                return None;
            };
            let name = name.to_str()?;
            if components.peek().is_some() {
                bytes.push(parse_segment(name)?);
            } else {
                let (byte, tail) = parse_container_name(name)?;
                bytes.push(byte);
                suffix = tail.map(str::to_owned);
            }
        }
        if bytes.is_empty() || bytes.len() > HASH_LENGTH {
            return None;
        }
        Some((Self(bytes), suffix))
    }
}

impl fmt::Display for BlockPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for BlockPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockPrefix({self})")
    }
}

fn parse_segment(name: &str) -> Option<u8> {
    let valid = name.len() == 2
        && name
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !valid {
        return None;
    }
    u8::from_str_radix(name, 16).ok()
}

/// Split a container file name into its byte and optional shadow suffix.
pub(crate) fn parse_container_name(name: &str) -> Option<(u8, Option<&str>)> {
    let head = name.get(..2)?;
    let byte = parse_segment(head)?;
    match name.get(2..)? {
        "" => Some((byte, None)),
        tail => {
            let suffix = tail.strip_prefix('.')?;
            let known = suffix == MERGE_SUFFIX
                || suffix == BACKUP_SUFFIX
                || suffix.starts_with(&format!("{DUPLICATE_SUFFIX}-"))
                || suffix.starts_with(&format!("{REPAIR_SUFFIX}-"));
            known.then_some((byte, Some(suffix)))
        }
    }
}

/// `path` with `.suffix` appended to its file name.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// A sibling name no other caller in this process will produce.
pub(crate) fn unique_sibling(path: &Path, suffix: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    sibling(path, &format!("{suffix}-{nanos}-{n}"))
}

/// A trie node.
#[derive(Clone, Debug)]
pub(crate) enum Block {
    Leaf(Arc<Leaf>),
    Directory(Arc<Directory>),
}

/// Interior trie node.
///
/// Children are materialized on first access only. While a split is being
/// drained the old container hangs off the directory as its shadow.
#[derive(Debug)]
pub(crate) struct Directory {
    prefix: BlockPrefix,
    children: RwLock<HashMap<u8, Block>>,
    shadow: RwLock<Option<Arc<Leaf>>>,
}

impl Directory {
    pub(crate) fn new(prefix: BlockPrefix) -> Self {
        Self {
            prefix,
            children: RwLock::new(HashMap::new()),
            shadow: RwLock::new(None),
        }
    }

    pub(crate) fn prefix(&self) -> &BlockPrefix {
        &self.prefix
    }

    pub(crate) fn child(&self, byte: u8) -> Option<Block> {
        self.children.read().get(&byte).cloned()
    }

    /// Callers hold the store's structural lock.
    pub(crate) fn insert_child(&self, byte: u8, block: Block) {
        self.children.write().insert(byte, block);
    }

    /// Snapshot of the materialized children, ordered by byte.
    pub(crate) fn children(&self) -> Vec<(u8, Block)> {
        let mut children: Vec<_> = self
            .children
            .read()
            .iter()
            .map(|(byte, block)| (*byte, block.clone()))
            .collect();
        children.sort_unstable_by_key(|(byte, _)| *byte);
        children
    }

    pub(crate) fn shadow(&self) -> Option<Arc<Leaf>> {
        self.shadow.read().clone()
    }

    pub(crate) fn set_shadow(&self, leaf: Arc<Leaf>) {
        *self.shadow.write() = Some(leaf);
    }

    /// Detach `leaf` if it is still the shadow.
    pub(crate) fn clear_shadow(&self, leaf: &Arc<Leaf>) {
        let mut shadow = self.shadow.write();
        if shadow.as_ref().is_some_and(|current| Arc::ptr_eq(current, leaf)) {
            *shadow = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_paths() {
        let prefix = BlockPrefix::root().child(0xab).child(0x01);
        assert_eq!(prefix.relative_path(), Path::new("ab").join("01"));
        assert_eq!(prefix.to_string(), "ab/01");
        assert_eq!(prefix.depth(), 2);
        assert!(prefix.can_split());
        assert!(!BlockPrefix::from_bytes(&[7; HASH_LENGTH]).can_split());
    }

    #[test]
    fn test_parse_relative() {
        let (prefix, suffix) = BlockPrefix::from_relative(Path::new("ab/01")).unwrap();
        assert_eq!(prefix.bytes(), &[0xab, 0x01]);
        assert_eq!(suffix, None);

        let (prefix, suffix) = BlockPrefix::from_relative(Path::new("ab/ff.merge")).unwrap();
        assert_eq!(prefix.bytes(), &[0xab, 0xff]);
        assert_eq!(suffix.as_deref(), Some("merge"));

        assert!(BlockPrefix::from_relative(Path::new("ab.merge/01")).is_none());
        assert!(BlockPrefix::from_relative(Path::new("AB")).is_none());
        assert!(BlockPrefix::from_relative(Path::new("ab.tmp")).is_none());
        assert!(BlockPrefix::from_relative(Path::new("")).is_none());
    }

    #[test]
    fn test_container_names() {
        assert_eq!(parse_container_name("0f"), Some((0x0f, None)));
        assert_eq!(parse_container_name("0f.backup"), Some((0x0f, Some("backup"))));
        assert_eq!(parse_container_name("0f.dup-1-2"), Some((0x0f, Some("dup-1-2"))));
        assert_eq!(parse_container_name("0f.repair-9-0"), Some((0x0f, Some("repair-9-0"))));
        assert_eq!(parse_container_name("0f.dup"), None);
        assert_eq!(parse_container_name("0"), None);
        assert_eq!(parse_container_name("zz"), None);
    }

    #[test]
    fn test_siblings() {
        let path = Path::new("/v/ab/01");
        assert_eq!(sibling(path, "merge"), Path::new("/v/ab/01.merge"));
        let a = unique_sibling(path, "dup");
        let b = unique_sibling(path, "dup");
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(parse_container_name(name).is_some());
    }
}
