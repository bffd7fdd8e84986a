//! Versioned binary snapshots of the cache.
//!
//! A snapshot lets a restarted process serve answers immediately instead of
//! re-crawling every repository. The format is little-endian throughout,
//! with `u32` lengths and a hard version gate: any version mismatch or
//! structural damage rejects the snapshot and the cache starts cold. That
//! is always safe, because a snapshot is only ever an accelerator.

use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{debug, warn};
use treestat_types::{NormalizedPath, StatusKind};

use crate::entry::StatusEntry;
use crate::error::{CacheError, CacheResult};
use crate::node::DirectoryNode;
use crate::registry::StatusCache;

/// Format version written and accepted by this build. Bump on any layout
/// change; there is no cross-version migration.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Ceiling on any serialized string length, as a corruption tripwire.
const MAX_PATH_LEN: usize = 4096;

fn write_u32<W: Write>(writer: &mut W, value: u32) -> CacheResult<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R) -> CacheResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_str<W: Write>(writer: &mut W, value: &str) -> CacheResult<()> {
    if value.len() > MAX_PATH_LEN {
        return Err(CacheError::PathTooLong(value.len()));
    }
    write_u32(writer, value.len() as u32)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> CacheResult<String> {
    let len = read_u32(reader)? as usize;
    if len > MAX_PATH_LEN {
        return Err(CacheError::PathTooLong(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| CacheError::Snapshot("non-UTF-8 path".into()))
}

/// Serialize one node.
///
/// Layout: `u32` version; `u32` file entry count, then per entry a `u32`
/// key length, the key bytes, and the entry record; `u32` child directory
/// count, then per child a length-prefixed path and a `u8` status kind;
/// the node's own length-prefixed path; the own-status record; `u8`
/// current full status; `u8` most important file status.
///
/// Directory paths are written in their preserved spelling so a restored
/// cache can stat the filesystem on case-sensitive systems.
pub fn save_node<W: Write>(node: &DirectoryNode, writer: &mut W) -> CacheResult<()> {
    write_u32(writer, SNAPSHOT_VERSION)?;

    let entries = node.entry_snapshot();
    write_u32(writer, entries.len() as u32)?;
    for (key, entry) in &entries {
        // An empty key should not exist; write the length only so the
        // reader can skip it.
        if key.is_empty() {
            write_u32(writer, 0)?;
            continue;
        }
        write_str(writer, key)?;
        entry.write_to(writer)?;
    }

    let children = node.child_directory_statuses();
    write_u32(writer, children.len() as u32)?;
    for (path, status) in &children {
        write_str(writer, path.raw())?;
        writer.write_all(&[status.as_u8()])?;
    }

    write_str(writer, node.path().raw())?;
    node.own_status_snapshot().write_to(writer)?;
    writer.write_all(&[
        node.current_full_status().as_u8(),
        node.most_important_file_status().as_u8(),
    ])?;
    Ok(())
}

/// Deserialize one node. The node is fully built before it becomes
/// visible; any failure leaves nothing behind.
pub fn load_node<R: Read>(reader: &mut R) -> CacheResult<DirectoryNode> {
    let version = read_u32(reader)?;
    if version != SNAPSHOT_VERSION {
        return Err(CacheError::SnapshotVersion {
            found: version,
            expected: SNAPSHOT_VERSION,
        });
    }

    let entry_count = read_u32(reader)?;
    let mut entry_cache = std::collections::BTreeMap::new();
    for _ in 0..entry_count {
        let key = read_string(reader)?;
        if key.is_empty() {
            continue;
        }
        let entry = StatusEntry::read_from(reader)?;
        entry_cache.insert(key, entry);
    }

    let child_count = read_u32(reader)?;
    let mut child_directories = std::collections::BTreeMap::new();
    for _ in 0..child_count {
        let path = NormalizedPath::new(&read_string(reader)?);
        let mut kind = [0u8; 1];
        reader.read_exact(&mut kind)?;
        child_directories.insert(path, StatusKind::from_u8(kind[0])?);
    }

    let path = read_string(reader)?;
    if path.is_empty() {
        return Err(CacheError::Snapshot("empty node path".into()));
    }
    let path = NormalizedPath::new(&path);
    let own_status = StatusEntry::read_from(reader)?;
    let mut tail = [0u8; 2];
    reader.read_exact(&mut tail)?;
    let current = StatusKind::from_u8(tail[0])?;
    let most_important = StatusKind::from_u8(tail[1])?;

    Ok(DirectoryNode::from_parts(
        path,
        entry_cache,
        child_directories,
        own_status,
        current,
        most_important,
    ))
}

impl StatusCache {
    /// Serialize every node. Returns the number of nodes written.
    pub fn save_all<W: Write>(&self, writer: &mut W) -> CacheResult<usize> {
        let paths = self.node_paths();
        write_u32(writer, paths.len() as u32)?;
        let mut written = 0;
        for path in paths {
            if let Some(node) = self.lookup_existing(&path) {
                save_node(&node, writer)?;
                written += 1;
            }
        }
        debug!(nodes = written, "snapshot saved");
        Ok(written)
    }

    /// Restore nodes from a snapshot, replacing any node already cached at
    /// the same path. Returns the number of nodes restored.
    ///
    /// On error the cache keeps whatever was restored before the damage;
    /// those nodes are complete and the rest will be re-crawled on demand.
    pub fn load_all<R: Read>(&self, reader: &mut R) -> CacheResult<usize> {
        let count = read_u32(reader)?;
        for restored in 0..count {
            let node = match load_node(reader) {
                Ok(node) => node,
                Err(err) => {
                    warn!(restored, error = %err, "snapshot truncated, starting cold for the rest");
                    return Err(err);
                }
            };
            self.restore_node(Arc::new(node));
        }
        debug!(nodes = count, "snapshot restored");
        Ok(count as usize)
    }
}
