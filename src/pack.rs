//! In-place compaction.
//!
//! Every live block is moved into a gap-free run starting right after the
//! header, keeping each member's chain order, and the host is truncated
//! behind the last one.  Afterwards the free list is empty.
//!
//! Blocks are renumbered in ascending order of their old index, so a block
//! never moves to a higher index.  A block's new slot can still be the old
//! slot of another live block that has not been relocated yet, which is why
//! all live blocks are read into memory before the first one is written.

use serde::Serialize;
use tracing::{debug, info};

use crate::analyze::{analyze, live_blocks, FragmentationInfo};
use crate::block::{BlockStore, Storage};
use crate::error::{Result, StarError};
use crate::header::{Header, NO_BLOCK};

#[derive(Debug, Clone, Serialize)]
pub struct PackReport {
    pub before:       FragmentationInfo,
    pub after:        FragmentationInfo,
    /// Blocks owned by members, all of which survive.
    pub live_blocks:  u32,
    /// Blocks that landed at a different index.
    pub moved_blocks: u32,
    pub bytes_before: u64,
    pub bytes_after:  u64,
}

/// Compact the archive and persist the updated header.
///
/// On an I/O error part-way through, the host is left in whatever state
/// the completed writes produced; there is no rollback.
pub fn compact<S: Storage>(store: &mut BlockStore<S>, header: &mut Header) -> Result<PackReport> {
    let before = analyze(store, header)?;
    let bytes_before = store.byte_len()?;
    let first = store.first_block();

    let mut live = live_blocks(store, header)?;
    live.sort_unstable();

    let remap = |old: u32| -> Result<u32> {
        if old == NO_BLOCK {
            return Ok(NO_BLOCK);
        }
        live.binary_search(&old)
            .map(|pos| first + pos as u32)
            .map_err(|_| StarError::BlockOutOfRange { block: old, first, count: first + live.len() as u32 })
    };

    let mut blocks = Vec::with_capacity(live.len());
    for &old in &live {
        blocks.push(store.read_block(old)?);
    }

    let mut moved = 0u32;
    for (&old, mut block) in live.iter().zip(blocks) {
        let new  = remap(old)?;
        let next = remap(block.next)?;
        if new == old && next == block.next {
            continue;
        }
        block.next = next;
        store.write_block(new, &block)?;
        if new != old {
            moved += 1;
        }
    }
    debug!(live = live.len(), moved, "blocks relocated");

    for entry in header.entries_mut() {
        entry.start_block = remap(entry.start_block)?;
    }
    header.free_head = NO_BLOCK;

    store.write_header(header)?;
    store.truncate(first + live.len() as u32)?;
    store.flush()?;

    let after = analyze(store, header)?;
    let bytes_after = store.byte_len()?;
    info!(
        live = live.len(),
        moved,
        freed = before.total_blocks - after.total_blocks,
        bytes_before,
        bytes_after,
        "archive compacted"
    );

    Ok(PackReport {
        before,
        after,
        live_blocks: live.len() as u32,
        moved_blocks: moved,
        bytes_before,
        bytes_after,
    })
}
