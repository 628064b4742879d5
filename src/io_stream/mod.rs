//! Member engine.
//!
//! # Writer
//! [`write_member`] pulls a byte stream in payload-sized chunks, places each
//! chunk in a block handed out by the allocator, and links every block to
//! its successor by patching the previous block's link after the new block
//! is on disk.  An empty member owns no blocks and starts at `NO_BLOCK`.
//!
//! # Reader
//! [`copy_member`] follows a chain and emits exactly the recorded number of
//! bytes.  It stops early when the recorded length is used up, even if the
//! chain continues, and fails when the chain ends first.
//!
//! # Removal
//! [`remove_member`] returns a member's chain to the free list and drops its
//! entry, keeping the remaining entries in order.
//!
//! All functions take the header by `&mut`/`&` and never persist it; the
//! caller writes it back once the whole operation is done.

use std::io::{Read, Write};

use tracing::debug;

use crate::alloc::{allocate_block, reclaim_chain};
use crate::block::{Block, BlockStore, Storage};
use crate::error::{Result, StarError};
use crate::header::{FileEntry, Header, NO_BLOCK};

// ── Writer ───────────────────────────────────────────────────────────────────

/// Store `length` bytes from `reader` as a new member called `name`.
///
/// Capacity and name collisions are checked before anything is allocated,
/// so those failures leave the archive untouched.  A `reader` that runs dry
/// before `length` bytes is an I/O error.
pub fn write_member<S: Storage, R: Read>(
    store:      &mut BlockStore<S>,
    header:     &mut Header,
    name:       &str,
    mut reader: R,
    length:     u64,
) -> Result<FileEntry> {
    if header.is_full() {
        return Err(StarError::CapacityExceeded { capacity: header.geometry.max_entries });
    }
    let name = header.geometry.stored_name(name).to_owned();
    if header.find(&name).is_some() {
        return Err(StarError::DuplicateName(name));
    }

    let geometry  = *store.geometry();
    let payload   = geometry.payload_size();
    let mut chunk = vec![0u8; payload];

    let mut start     = NO_BLOCK;
    let mut prev      = NO_BLOCK;
    let mut remaining = length;
    let mut blocks    = 0usize;

    while remaining > 0 {
        let n = remaining.min(payload as u64) as usize;
        reader.read_exact(&mut chunk[..n])?;

        let index = allocate_block(store, header)?;
        store.write_block(index, &Block::with_data(&geometry, &chunk[..n]))?;
        if prev == NO_BLOCK {
            start = index;
        } else {
            store.write_link(prev, index)?;
        }

        prev = index;
        remaining -= n as u64;
        blocks += 1;
    }

    let entry = FileEntry { name, size: length, start_block: start };
    header.push_entry(entry.clone())?;
    debug!(name = %entry.name, size = length, start_block = start, blocks, "member written");
    Ok(entry)
}

/// Convenience wrapper over [`write_member`] for in-memory data.
pub fn write_member_bytes<S: Storage>(
    store:  &mut BlockStore<S>,
    header: &mut Header,
    name:   &str,
    data:   &[u8],
) -> Result<FileEntry> {
    write_member(store, header, name, data, data.len() as u64)
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Stream the contents of `entry` into `out`.  Returns the bytes written,
/// which always equals `entry.size` on success.
pub fn copy_member<S: Storage, W: Write>(
    store:   &mut BlockStore<S>,
    entry:   &FileEntry,
    mut out: W,
) -> Result<u64> {
    let payload = store.geometry().payload_size() as u64;
    let mut remaining = entry.size;
    let mut current   = entry.start_block;

    while remaining > 0 {
        if current == NO_BLOCK {
            return Err(StarError::ChainTooShort { name: entry.name.clone(), missing: remaining });
        }
        let block = store.read_block(current)?;
        let n = remaining.min(payload) as usize;
        out.write_all(&block.payload[..n])?;
        remaining -= n as u64;
        current = block.next;
    }
    Ok(entry.size)
}

/// The full contents of `entry`.
pub fn read_member<S: Storage>(store: &mut BlockStore<S>, entry: &FileEntry) -> Result<Vec<u8>> {
    // A corrupt size must not turn into a huge allocation up front.
    let ceiling = store.block_count() as u64 * store.geometry().payload_size() as u64;
    let mut out = Vec::with_capacity(entry.size.min(ceiling) as usize);
    copy_member(store, entry, &mut out)?;
    Ok(out)
}

// ── Removal ──────────────────────────────────────────────────────────────────

/// Reclaim the member called `name`.  Returns `false` when no such member
/// exists.
pub fn remove_member<S: Storage>(
    store:  &mut BlockStore<S>,
    header: &mut Header,
    name:   &str,
) -> Result<bool> {
    let Some(index) = header.find(name) else {
        return Ok(false);
    };

    let start = header.entries()[index].start_block;
    let freed = if start == NO_BLOCK { 0 } else { reclaim_chain(store, header, start)? };
    let entry = header.remove_entry(index);
    debug!(name = %entry.name, freed, free_head = header.free_head, "member removed");
    Ok(true)
}
